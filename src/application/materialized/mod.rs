//! Materialized updater: maintains the wide `(symbol, date, hour)` features
//! table by joining the latest observations across the domain tables.
//!
//! Two loops share this implementation: the online loop processes price rows
//! past the high-water mark, the backfill loop an explicit window. Batched
//! secondary lookups (one query per domain, never per-row), NULL-aware merge
//! rules, schema-drift projection and completeness scoring live here.

pub mod lookup;

use crate::application::collectors::{Collector, TickContext, TickOutcome};
use crate::config::ConfigHandle;
use crate::domain::feature_set::{FeatureSet, MACRO_SERIES};
use crate::domain::ports::DateRange;
use crate::domain::repositories::{
    DataDomain, FeatureRepository, FeatureValue, MacroRepository, MergeRecord,
    MonitoringRepository, OnchainRepository, PriceRepository, SentimentRepository,
    TechnicalRepository,
};
use crate::domain::types::PriceObservation;
use crate::infrastructure::observability::AlertSink;
use crate::infrastructure::persistence::database::SYMBOL_COLLATION;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use lookup::{LookupMaps, LookupWindows};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const COMPONENT: &str = "materialized_updater";
const COLUMN_CACHE_TTL: Duration = Duration::from_secs(15 * 60);
const WRITE_RETRIES: u32 = 3;
/// Degraded when more than this share of a run's rows were lock-skipped.
const DEGRADED_LOCK_RATIO: f64 = 0.05;
/// Coarse worst-case resident cost of one symbol's lookup maps, used to
/// bound the per-run batch against the memory budget.
const EST_BYTES_PER_SYMBOL: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdaterPhase {
    Idle,
    Scanning,
    Joining,
    Writing,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    high_water_mark: Option<DateTime<Utc>>,
}

struct ColumnCache {
    columns: HashSet<String>,
    refreshed_at: Option<Instant>,
    warned_unknown: HashSet<String>,
}

pub struct MaterializedUpdater {
    prices: Arc<dyn PriceRepository>,
    technicals: Arc<dyn TechnicalRepository>,
    macros: Arc<dyn MacroRepository>,
    onchain: Arc<dyn OnchainRepository>,
    sentiment: Arc<dyn SentimentRepository>,
    features: Arc<dyn FeatureRepository>,
    monitoring: Arc<dyn MonitoringRepository>,
    alerts: AlertSink,
    config: ConfigHandle,
    feature_set: FeatureSet,
    phase: RwLock<UpdaterPhase>,
    column_cache: RwLock<ColumnCache>,
    hwm: RwLock<Option<DateTime<Utc>>>,
    degraded: AtomicBool,
}

impl MaterializedUpdater {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        prices: Arc<dyn PriceRepository>,
        technicals: Arc<dyn TechnicalRepository>,
        macros: Arc<dyn MacroRepository>,
        onchain: Arc<dyn OnchainRepository>,
        sentiment: Arc<dyn SentimentRepository>,
        features: Arc<dyn FeatureRepository>,
        monitoring: Arc<dyn MonitoringRepository>,
        alerts: AlertSink,
        config: ConfigHandle,
        feature_set: FeatureSet,
    ) -> Self {
        Self {
            prices,
            technicals,
            macros,
            onchain,
            sentiment,
            features,
            monitoring,
            alerts,
            config,
            feature_set,
            phase: RwLock::new(UpdaterPhase::Idle),
            column_cache: RwLock::new(ColumnCache {
                columns: HashSet::new(),
                refreshed_at: None,
                warned_unknown: HashSet::new(),
            }),
            hwm: RwLock::new(None),
            degraded: AtomicBool::new(false),
        }
    }

    pub async fn phase(&self) -> UpdaterPhase {
        *self.phase.read().await
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub async fn high_water_mark(&self) -> Option<DateTime<Utc>> {
        *self.hwm.read().await
    }

    async fn set_phase(&self, phase: UpdaterPhase) {
        *self.phase.write().await = phase;
    }

    // -- high-water mark ----------------------------------------------------

    async fn load_hwm(&self) -> Result<DateTime<Utc>> {
        if let Some(hwm) = *self.hwm.read().await {
            return Ok(hwm);
        }
        let persisted = self
            .monitoring
            .load_state(COMPONENT)
            .await?
            .and_then(|json| serde_json::from_str::<PersistedState>(&json).ok())
            .and_then(|state| state.high_water_mark);
        let hwm = persisted.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        *self.hwm.write().await = Some(hwm);
        Ok(hwm)
    }

    async fn advance_hwm(&self, new_hwm: DateTime<Utc>) -> Result<()> {
        {
            let mut hwm = self.hwm.write().await;
            match *hwm {
                Some(current) if current >= new_hwm => return Ok(()),
                _ => *hwm = Some(new_hwm),
            }
        }
        let state = PersistedState {
            high_water_mark: Some(new_hwm),
        };
        self.monitoring
            .save_state(COMPONENT, &serde_json::to_string(&state)?)
            .await
            .context("failed to persist high-water mark")
    }

    // -- schema drift -------------------------------------------------------

    /// Refresh the destination-column cache when stale; also verifies the
    /// symbol collation. A collation mismatch is a schema defect: fatal
    /// alert plus `Degraded`, never a silent broken join.
    async fn refresh_columns(&self) -> Result<HashSet<String>> {
        {
            let cache = self.column_cache.read().await;
            if let Some(at) = cache.refreshed_at
                && at.elapsed() < COLUMN_CACHE_TTL
            {
                return Ok(cache.columns.clone());
            }
        }

        let columns: HashSet<String> =
            self.features.destination_columns().await?.into_iter().collect();

        if let Some(collation) = self.features.symbol_collation().await?
            && collation != SYMBOL_COLLATION
        {
            let mut labels = std::collections::HashMap::new();
            labels.insert("expected".to_string(), SYMBOL_COLLATION.to_string());
            labels.insert("actual".to_string(), collation.clone());
            self.alerts.emit(
                "critical",
                "features symbol collation mismatch, joins are unsound",
                labels,
            );
            self.degraded.store(true, Ordering::Relaxed);
            anyhow::bail!("symbol collation mismatch: expected {SYMBOL_COLLATION}, found {collation}");
        }

        let mut cache = self.column_cache.write().await;
        cache.columns = columns.clone();
        cache.refreshed_at = Some(Instant::now());
        debug!(columns = columns.len(), "destination column cache refreshed");
        Ok(columns)
    }

    /// Drop record values whose column does not exist on the destination.
    /// One warning per column, not per row.
    async fn project_records(&self, records: &mut [MergeRecord], columns: &HashSet<String>) {
        let mut newly_warned: Vec<String> = Vec::new();
        {
            let cache = self.column_cache.read().await;
            for record in records.iter() {
                for column in record.values.keys() {
                    if !columns.contains(column)
                        && !cache.warned_unknown.contains(column)
                        && !newly_warned.contains(column)
                    {
                        newly_warned.push(column.clone());
                    }
                }
            }
        }
        for column in &newly_warned {
            warn!(column = %column, "merge record column missing from destination, dropping");
        }
        if !newly_warned.is_empty() {
            let mut cache = self.column_cache.write().await;
            cache.warned_unknown.extend(newly_warned);
        }
        for record in records.iter_mut() {
            record.values.retain(|column, _| columns.contains(column));
        }
    }

    // -- merge --------------------------------------------------------------

    fn build_record(&self, maps: &LookupMaps, price: &PriceObservation) -> MergeRecord {
        let date = price.ts.date_naive();
        let hour = price.ts.hour() as u8;
        let mut record = MergeRecord::new(&price.symbol, date, hour);

        record.set("current_price", FeatureValue::Float(price.current_price));
        record.set_opt_f64("high_24h", price.high_24h);
        record.set_opt_f64("low_24h", price.low_24h);
        record.set_opt_f64("open_24h", price.open_24h);
        record.set_opt_f64("volume_24h", price.volume_24h);
        record.set_opt_f64("price_change_pct_24h", price.price_change_pct_24h);
        record.set_opt_f64("market_cap", price.market_cap);
        if let Some(rank) = price.market_cap_rank {
            record.set("market_cap_rank", FeatureValue::Int(rank as i64));
        }

        if let Some(technical) = maps.technical_at(&price.symbol, price.ts) {
            debug_assert!(!lookup::violates_no_future(price.ts, technical.ts));
            record.set_opt_f64("sma_20", technical.sma_20);
            record.set_opt_f64("sma_50", technical.sma_50);
            record.set_opt_f64("sma_200", technical.sma_200);
            record.set_opt_f64("ema_12", technical.ema_12);
            record.set_opt_f64("ema_26", technical.ema_26);
            record.set_opt_f64("rsi_14", technical.rsi_14);
            record.set_opt_f64("macd", technical.macd);
            record.set_opt_f64("macd_signal", technical.macd_signal);
            record.set_opt_f64("macd_histogram", technical.macd_histogram);
            record.set_opt_f64("bb_upper", technical.bb_upper);
            record.set_opt_f64("bb_middle", technical.bb_middle);
            record.set_opt_f64("bb_lower", technical.bb_lower);
            record.set_opt_f64("atr_14", technical.atr_14);
        }

        for (_series, column) in MACRO_SERIES {
            record.set_opt_f64(column, maps.macro_at(column, date));
        }

        if let Some(onchain) = maps.onchain_at(&price.symbol, date) {
            record.set_opt_f64("circulating_supply", onchain.circulating_supply);
            record.set_opt_f64("total_supply", onchain.total_supply);
            record.set_opt_f64("max_supply", onchain.max_supply);
            for (column, value) in [
                ("active_addresses", onchain.active_addresses),
                ("transaction_count", onchain.transaction_count),
                ("twitter_followers", onchain.twitter_followers),
                ("reddit_subscribers", onchain.reddit_subscribers),
                ("github_stars", onchain.github_stars),
                ("github_commits_4w", onchain.github_commits_4w),
            ] {
                if let Some(v) = value {
                    record.set(column, FeatureValue::Int(v));
                }
            }
            record.set_opt_f64("developer_score", onchain.developer_score);
            record.set_opt_f64("community_score", onchain.community_score);
            record.set_opt_f64("liquidity_score", onchain.liquidity_score);
            record.set_opt_f64("public_interest_score", onchain.public_interest_score);
        }

        if let Some(sentiment) = maps.sentiment_at(&price.symbol, price.ts) {
            record.set("avg_sentiment", FeatureValue::Float(sentiment.avg_sentiment));
            record.set("avg_confidence", FeatureValue::Float(sentiment.avg_confidence));
            record.set("article_count", FeatureValue::Int(sentiment.article_count));
            record.set_opt_f64("fear_greed_index", sentiment.fear_greed_index);
        }

        let non_null = record
            .values
            .keys()
            .filter(|column| self.feature_set.contains(column))
            .count();
        record.set(
            "data_completeness_percentage",
            FeatureValue::Float(self.feature_set.completeness(non_null)),
        );
        record.set("data_source", FeatureValue::Text("materialized".to_string()));
        record
    }

    // -- runs ---------------------------------------------------------------

    async fn effective_max_symbols(&self) -> usize {
        let config = self.config.read().await;
        let by_memory =
            (config.materialized_max_memory_mb * 1024 * 1024) / EST_BYTES_PER_SYMBOL;
        config.materialized_max_batch_symbols.min(by_memory.max(1))
    }

    async fn process_rows(&self, price_rows: Vec<PriceObservation>) -> Result<TickOutcome> {
        let mut outcome = TickOutcome::default();
        if price_rows.is_empty() {
            self.set_phase(UpdaterPhase::Idle).await;
            return Ok(outcome);
        }

        self.set_phase(UpdaterPhase::Joining).await;

        let timestamps: Vec<DateTime<Utc>> = price_rows.iter().map(|p| p.ts).collect();
        let windows = LookupWindows::from_price_ts(&timestamps)
            .context("price batch unexpectedly empty")?;
        let mut symbols: Vec<String> =
            price_rows.iter().map(|p| p.symbol.clone()).collect();
        symbols.sort();
        symbols.dedup();

        // One batched query per domain, never per-row.
        let (technical_rows, macro_rows, onchain_rows, sentiment_rows) = futures::try_join!(
            self.technicals.in_range(&symbols, windows.technical_window()),
            self.macros.in_range(windows.macro_range()),
            self.onchain.in_range(&symbols, windows.onchain_range()),
            self.sentiment.in_range(&symbols, windows.hour_window()),
        )?;

        let maps = LookupMaps::new(technical_rows, macro_rows, onchain_rows, sentiment_rows);
        {
            let budget_bytes = self.config.read().await.materialized_max_memory_mb * 1024 * 1024;
            let estimated = maps.estimated_bytes();
            if estimated > budget_bytes {
                warn!(
                    estimated_bytes = estimated,
                    budget_bytes, "lookup maps exceed the memory budget; consider lowering MATERIALIZED_MAX_BATCH_SYMBOLS"
                );
            }
        }

        let mut records: Vec<MergeRecord> = price_rows
            .iter()
            .map(|price| self.build_record(&maps, price))
            .collect();

        self.set_phase(UpdaterPhase::Writing).await;
        let columns = self.refresh_columns().await?;
        self.project_records(&mut records, &columns).await;

        let write_started = Instant::now();
        let mut attempt = 0u32;
        let write_outcome = loop {
            match self.features.upsert_rows(&records, &columns).await {
                Ok(write_outcome) => break write_outcome,
                Err(err) => {
                    attempt += 1;
                    if attempt >= WRITE_RETRIES {
                        // High-water mark stays put; the next tick retries
                        // this whole batch.
                        self.set_phase(UpdaterPhase::Idle).await;
                        return Err(err.context("feature write failed after retries"));
                    }
                    warn!(attempt, error = %format!("{err:#}"), "feature write failed, retrying batch");
                    tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
                }
            }
        };
        outcome.db_write_duration = write_started.elapsed();
        outcome.db_writes = (records.len() as u64).div_ceil(500);
        outcome.collected = write_outcome.written;

        let lock_ratio = write_outcome.locked_skipped as f64 / records.len().max(1) as f64;
        if lock_ratio > DEGRADED_LOCK_RATIO {
            self.degraded.store(true, Ordering::Relaxed);
            let mut labels = std::collections::HashMap::new();
            labels.insert("locked_skipped".to_string(), write_outcome.locked_skipped.to_string());
            self.alerts.emit(
                "warning",
                format!(
                    "materialized run degraded: {:.1}% of rows lock-skipped",
                    lock_ratio * 100.0
                ),
                labels,
            );
        } else {
            self.degraded.store(false, Ordering::Relaxed);
        }
        if write_outcome.locked_skipped > 0 {
            info!(
                locked_skipped = write_outcome.locked_skipped,
                written = write_outcome.written,
                "run finished with lock skips"
            );
        }

        self.set_phase(UpdaterPhase::Idle).await;
        Ok(outcome)
    }

    /// Online loop: price rows past the high-water mark.
    #[tracing::instrument(skip_all, name = "materialized_online")]
    pub async fn run_online(&self) -> Result<TickOutcome> {
        self.set_phase(UpdaterPhase::Scanning).await;
        let hwm = self.load_hwm().await?;
        let max_symbols = self.effective_max_symbols().await;
        let price_rows = self.prices.rows_after(hwm, max_symbols).await?;

        let max_ts = price_rows.iter().map(|p| p.ts).max();
        let outcome = self.process_rows(price_rows).await?;
        if let Some(max_ts) = max_ts {
            self.advance_hwm(max_ts).await?;
        }
        Ok(outcome)
    }

    /// Backfill loop: an explicit window, independent of the high-water mark.
    #[tracing::instrument(skip(self), name = "materialized_backfill")]
    pub async fn run_backfill(&self, range: DateRange, force: bool) -> Result<TickOutcome> {
        self.set_phase(UpdaterPhase::Scanning).await;
        let window = LookupWindows {
            first_date: range.start,
            last_date: range.end,
        }
        .hour_window();

        let max_symbols = self.effective_max_symbols().await;
        let all_rows = self
            .prices
            .rows_after(window.start - chrono::Duration::seconds(1), max_symbols)
            .await?;
        let mut price_rows: Vec<PriceObservation> = all_rows
            .into_iter()
            .filter(|p| p.ts < window.end)
            .collect();

        if !force {
            let threshold = self.config.read().await.completeness_threshold;
            let mut kept = Vec::with_capacity(price_rows.len());
            for row in price_rows {
                let existing = self
                    .features
                    .get(&row.symbol, row.ts.date_naive(), row.ts.hour() as u8)
                    .await?;
                let complete = existing
                    .and_then(|r| r.completeness())
                    .map(|c| c >= threshold)
                    .unwrap_or(false);
                if !complete {
                    kept.push(row);
                }
            }
            price_rows = kept;
        }

        // The high-water mark is untouched: backfill owns its window, the
        // online loop owns the frontier.
        self.process_rows(price_rows).await
    }
}

#[async_trait]
impl Collector for MaterializedUpdater {
    fn name(&self) -> &'static str {
        "materialized"
    }

    fn domain(&self) -> DataDomain {
        DataDomain::Features
    }

    async fn collect(&self, _ctx: &TickContext) -> Result<TickOutcome> {
        self.run_online().await
    }

    async fn backfill(&self, _ctx: &TickContext, range: DateRange, force: bool) -> Result<TickOutcome> {
        self.run_backfill(range, force).await
    }

    fn estimate_backfill_records(&self, symbols: usize, range: &DateRange) -> u64 {
        symbols as u64 * range.days().max(0) as u64 * 24
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{
        COMPLETENESS_FULL, MacroIndicator, OnchainObservation, SentimentSignal,
        TechnicalIndicator,
    };
    use crate::infrastructure::persistence::in_memory::{
        InMemoryFeatureRepository, InMemoryMacroRepository, InMemoryMonitoringRepository,
        InMemoryOnchainRepository, InMemoryPriceRepository, InMemorySentimentRepository,
        InMemoryTechnicalRepository,
    };
    use crate::domain::repositories::{
        MacroRepository as _, OnchainRepository as _, PriceRepository as _,
        SentimentRepository as _, TechnicalRepository as _,
    };
    use chrono::{NaiveDate, TimeZone};

    struct Fixture {
        prices: Arc<InMemoryPriceRepository>,
        technicals: Arc<InMemoryTechnicalRepository>,
        macros: Arc<InMemoryMacroRepository>,
        onchain: Arc<InMemoryOnchainRepository>,
        sentiment: Arc<InMemorySentimentRepository>,
        features: Arc<InMemoryFeatureRepository>,
        monitoring: Arc<InMemoryMonitoringRepository>,
        updater: MaterializedUpdater,
    }

    fn fixture() -> Fixture {
        let prices = Arc::new(InMemoryPriceRepository::new());
        let technicals = Arc::new(InMemoryTechnicalRepository::new());
        let macros = Arc::new(InMemoryMacroRepository::new());
        let onchain = Arc::new(InMemoryOnchainRepository::new());
        let sentiment = Arc::new(InMemorySentimentRepository::new());
        let features = Arc::new(InMemoryFeatureRepository::new());
        let monitoring = Arc::new(InMemoryMonitoringRepository::new());
        let config = Arc::new(RwLock::new(crate::config::Config::from_env().expect("config")));
        let updater = MaterializedUpdater::new(
            prices.clone(),
            technicals.clone(),
            macros.clone(),
            onchain.clone(),
            sentiment.clone(),
            features.clone(),
            monitoring.clone(),
            AlertSink::default(),
            config,
            FeatureSet::resolve("v1").expect("v1"),
        );
        Fixture {
            prices,
            technicals,
            macros,
            onchain,
            sentiment,
            features,
            monitoring,
            updater,
        }
    }

    fn price(symbol: &str, day: u32, hour: u32, value: f64) -> PriceObservation {
        PriceObservation {
            symbol: symbol.to_string(),
            ts: Utc.with_ymd_and_hms(2025, 3, day, hour, 5, 0).unwrap(),
            current_price: value,
            high_24h: Some(value * 1.02),
            low_24h: Some(value * 0.98),
            open_24h: Some(value * 0.99),
            volume_24h: Some(1e9),
            price_change_pct_24h: Some(1.0),
            market_cap: Some(value * 1e7),
            market_cap_rank: Some(1),
            data_source: "coingecko".to_string(),
            data_completeness_percentage: 100.0,
        }
    }

    #[tokio::test]
    async fn online_run_joins_all_domains_and_advances_hwm() {
        let f = fixture();
        f.prices.upsert_batch(&[price("BTC", 10, 9, 40_000.0)]).await.unwrap();
        f.technicals
            .upsert_batch(&[TechnicalIndicator {
                symbol: "BTC".to_string(),
                ts: Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap(),
                rsi_14: Some(55.0),
                sma_20: Some(39_500.0),
                data_source: "derived".to_string(),
                data_completeness_percentage: 60.0,
                ..Default::default()
            }])
            .await
            .unwrap();
        f.macros
            .upsert_batch(&[MacroIndicator {
                series_id: "VIXCLS".to_string(),
                date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
                value: 20.0,
                frequency: None,
                data_source: "fred".to_string(),
            }])
            .await
            .unwrap();
        f.onchain
            .upsert_batch(&[OnchainObservation {
                symbol: "BTC".to_string(),
                date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
                circulating_supply: Some(19.0e6),
                data_source: "coingecko".to_string(),
                data_completeness_percentage: 55.0,
                ..Default::default()
            }])
            .await
            .unwrap();
        f.sentiment
            .upsert_batch(&[SentimentSignal {
                symbol: "BTC".to_string(),
                bucket_start: Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap(),
                avg_sentiment: 0.4,
                avg_confidence: 0.7,
                article_count: 3,
                fear_greed_index: Some(60.0),
                data_source: "news_aggregation".to_string(),
                data_completeness_percentage: 100.0,
            }])
            .await
            .unwrap();

        let outcome = f.updater.run_online().await.unwrap();
        assert_eq!(outcome.collected, 1);

        let row = f
            .features
            .get("BTC", NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(), 9)
            .await
            .unwrap()
            .expect("feature row written");
        assert_eq!(
            row.values.get("current_price"),
            Some(&FeatureValue::Float(40_000.0))
        );
        assert_eq!(row.values.get("rsi_14"), Some(&FeatureValue::Float(55.0)));
        assert_eq!(row.values.get("vix"), Some(&FeatureValue::Float(20.0)));
        assert_eq!(
            row.values.get("circulating_supply"),
            Some(&FeatureValue::Float(19.0e6))
        );
        assert_eq!(
            row.values.get("avg_sentiment"),
            Some(&FeatureValue::Float(0.4))
        );
        let completeness = row.completeness().unwrap();
        assert!(completeness > 0.0 && completeness <= COMPLETENESS_FULL);

        // HWM advanced to the processed price row.
        assert_eq!(
            f.updater.high_water_mark().await,
            Some(Utc.with_ymd_and_hms(2025, 3, 10, 9, 5, 0).unwrap())
        );
        // And persisted for restarts.
        assert!(f.monitoring.load_state(COMPONENT).await.unwrap().is_some());

        // A second run with nothing new is a no-op.
        let outcome = f.updater.run_online().await.unwrap();
        assert_eq!(outcome.collected, 0);
    }

    #[tokio::test]
    async fn completeness_matches_feature_set_formula() {
        let f = fixture();
        // Price only: exactly the 8 price columns of v1 are non-null.
        f.prices.upsert_batch(&[price("BTC", 10, 9, 40_000.0)]).await.unwrap();
        f.updater.run_online().await.unwrap();

        let row = f
            .features
            .get("BTC", NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(), 9)
            .await
            .unwrap()
            .expect("feature row written");
        let set = FeatureSet::resolve("v1").unwrap();
        let expected = set.completeness(8);
        assert_eq!(row.completeness(), Some(expected));
    }

    #[tokio::test]
    async fn sentiment_gap_hour_stays_null() {
        let f = fixture();
        f.prices
            .upsert_batch(&[price("BTC", 10, 9, 40_000.0), price("BTC", 10, 10, 40_100.0)])
            .await
            .unwrap();
        f.sentiment
            .upsert_batch(&[SentimentSignal {
                symbol: "BTC".to_string(),
                bucket_start: Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap(),
                avg_sentiment: 0.4,
                avg_confidence: 0.7,
                article_count: 1,
                fear_greed_index: None,
                data_source: "news_aggregation".to_string(),
                data_completeness_percentage: 50.0,
            }])
            .await
            .unwrap();

        f.updater.run_online().await.unwrap();

        let hour_9 = f
            .features
            .get("BTC", NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(), 9)
            .await
            .unwrap()
            .unwrap();
        assert!(hour_9.values.contains_key("avg_sentiment"));

        let hour_10 = f
            .features
            .get("BTC", NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(), 10)
            .await
            .unwrap()
            .unwrap();
        assert!(
            !hour_10.values.contains_key("avg_sentiment"),
            "sentiment must not carry into the next hour"
        );
    }

    #[tokio::test]
    async fn schema_drift_drops_unknown_columns_but_writes_the_row() {
        let f = fixture();
        // Destination lost the rsi_14 column.
        let mut columns = f.features.destination_columns().await.unwrap();
        columns.retain(|c| c != "rsi_14");
        f.features.set_columns(columns).await;

        f.prices.upsert_batch(&[price("BTC", 10, 9, 40_000.0)]).await.unwrap();
        f.technicals
            .upsert_batch(&[TechnicalIndicator {
                symbol: "BTC".to_string(),
                ts: Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap(),
                rsi_14: Some(55.0),
                data_source: "derived".to_string(),
                data_completeness_percentage: 55.0,
                ..Default::default()
            }])
            .await
            .unwrap();

        let outcome = f.updater.run_online().await.unwrap();
        assert_eq!(outcome.collected, 1, "insert must not raise");

        let row = f
            .features
            .get("BTC", NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(), 9)
            .await
            .unwrap()
            .unwrap();
        assert!(!row.values.contains_key("rsi_14"));
        assert!(row.values.contains_key("current_price"));
    }

    #[tokio::test]
    async fn lock_contention_skips_key_and_continues() {
        let f = fixture();
        f.prices
            .upsert_batch(&[price("BTC", 10, 9, 40_000.0), price("ETH", 10, 9, 2_500.0)])
            .await
            .unwrap();
        f.features
            .lock_key("BTC", NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(), 9)
            .await;

        let outcome = f.updater.run_online().await.unwrap();
        assert_eq!(outcome.collected, 1, "unlocked key still written");

        assert!(
            f.features
                .get("ETH", NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(), 9)
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            f.features
                .get("BTC", NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(), 9)
                .await
                .unwrap()
                .is_none(),
            "locked key skipped this run"
        );
        // 1 of 2 rows skipped: well over the degraded threshold.
        assert!(f.updater.is_degraded());

        // Contention clears, a healthy run recovers.
        f.features.unlock_all().await;
        f.updater
            .run_backfill(
                DateRange::new(
                    NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
                    NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
                ),
                false,
            )
            .await
            .unwrap();
        assert!(!f.updater.is_degraded());
    }

    #[tokio::test]
    async fn backfill_force_false_skips_complete_rows() {
        let f = fixture();
        f.prices.upsert_batch(&[price("BTC", 10, 9, 40_000.0)]).await.unwrap();
        f.updater.run_online().await.unwrap();

        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
        );
        let second = f.updater.run_backfill(range, false).await.unwrap();
        assert_eq!(second.collected, 0, "already-complete rows are skipped");

        let forced = f.updater.run_backfill(range, true).await.unwrap();
        assert_eq!(forced.collected, 1, "force rewrites regardless");
    }

    #[tokio::test]
    async fn macro_carry_forward_scenario() {
        let f = fixture();
        // VIX published on the 10th, gap until the 15th.
        f.macros
            .upsert_batch(&[
                MacroIndicator {
                    series_id: "VIXCLS".to_string(),
                    date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
                    value: 20.0,
                    frequency: None,
                    data_source: "fred".to_string(),
                },
                MacroIndicator {
                    series_id: "VIXCLS".to_string(),
                    date: NaiveDate::from_ymd_opt(2025, 3, 15).unwrap(),
                    value: 22.0,
                    frequency: None,
                    data_source: "fred".to_string(),
                },
            ])
            .await
            .unwrap();
        f.prices
            .upsert_batch(&[
                price("BTC", 12, 9, 40_000.0),
                price("BTC", 15, 9, 41_000.0),
                price("BTC", 23, 9, 42_000.0),
            ])
            .await
            .unwrap();

        f.updater.run_online().await.unwrap();

        let get_vix = |day: u32| {
            let f = &f;
            async move {
                f.features
                    .get("BTC", NaiveDate::from_ymd_opt(2025, 3, day).unwrap(), 9)
                    .await
                    .unwrap()
                    .unwrap()
                    .values
                    .get("vix")
                    .cloned()
            }
        };
        assert_eq!(get_vix(12).await, Some(FeatureValue::Float(20.0)), "carried from the 10th");
        assert_eq!(get_vix(15).await, Some(FeatureValue::Float(22.0)), "fresh value wins");
        assert_eq!(get_vix(23).await, None, "past the 7-day carry window");
    }
}
