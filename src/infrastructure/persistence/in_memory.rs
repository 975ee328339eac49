//! In-memory repository implementations.
//!
//! Thread-safe doubles with the same merge semantics as the MySQL
//! repositories (idempotent keyed upserts, monotone completeness, column
//! projection on the features table). Integration tests run entire collector
//! and updater flows against these without a database; the feature double
//! can additionally simulate per-key lock contention.

use crate::domain::ports::DateRange;
use crate::domain::repositories::{
    AssetRepository, CompletenessStats, DataDomain, DerivativesRepository, FeatureRepository,
    FeatureValue, FeatureWriteOutcome, MacroRepository, MarketRepository, MergeRecord,
    MonitoringRepository, NewsRepository, OhlcRepository, OnchainRepository, PlaceholderStore,
    PriceRepository, SentimentRepository, TechnicalRepository,
};
use crate::domain::types::{
    Asset, AssetPatch, ArticleScores, COMPLETENESS_PARTIAL, DerivativesObservation,
    MacroIndicator, MarketSnapshot, NewsArticle, OhlcBar, OnchainObservation, PLACEHOLDER_SOURCE,
    PlaceholderKey, PriceObservation, SentimentSignal, TechnicalIndicator, TimeWindow, Timeframe,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight is valid"))
}

fn stats_from<'a, I>(rows: I) -> CompletenessStats
where
    I: Iterator<Item = &'a f64>,
{
    let mut total = 0u64;
    let mut filled = 0u64;
    let mut sum = 0.0;
    for completeness in rows {
        total += 1;
        sum += completeness;
        if *completeness >= COMPLETENESS_PARTIAL {
            filled += 1;
        }
    }
    CompletenessStats {
        total,
        filled,
        avg_completeness: if total == 0 { 0.0 } else { sum / total as f64 },
    }
}

// ---------------------------------------------------------------------------
// Assets
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryAssetRepository {
    assets: RwLock<BTreeMap<String, Asset>>,
}

impl InMemoryAssetRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_assets(assets: Vec<Asset>) -> Self {
        let map = assets.into_iter().map(|a| (a.symbol.clone(), a)).collect();
        Self {
            assets: RwLock::new(map),
        }
    }
}

#[async_trait]
impl AssetRepository for InMemoryAssetRepository {
    async fn active_assets(&self) -> Result<Vec<Asset>> {
        let assets = self.assets.read().await;
        Ok(assets.values().filter(|a| a.is_active).cloned().collect())
    }

    async fn find(&self, symbol: &str) -> Result<Option<Asset>> {
        Ok(self.assets.read().await.get(symbol).cloned())
    }

    async fn upsert(&self, asset: &Asset) -> Result<()> {
        self.assets
            .write()
            .await
            .insert(asset.symbol.clone(), asset.clone());
        Ok(())
    }

    async fn update_metadata(&self, symbol: &str, patch: &AssetPatch) -> Result<()> {
        let mut assets = self.assets.write().await;
        if let Some(asset) = assets.get_mut(symbol) {
            if let Some(name) = &patch.name {
                asset.name = name.clone();
            }
            if let Some(id) = &patch.coingecko_id {
                asset.coingecko_id = Some(id.clone());
            }
            if let Some(pair) = &patch.binance_symbol {
                asset.binance_symbol = Some(pair.clone());
            }
            if let Some(category) = &patch.category {
                asset.category = Some(category.clone());
            }
            if let Some(rank) = patch.market_cap_rank {
                asset.market_cap_rank = Some(rank);
            }
            if let Some(flag) = patch.supports_derivatives {
                asset.supports_derivatives = flag;
            }
        }
        Ok(())
    }

    async fn set_active(&self, symbol: &str, active: bool) -> Result<()> {
        if let Some(asset) = self.assets.write().await.get_mut(symbol) {
            asset.is_active = active;
        }
        Ok(())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.assets.read().await.len() as u64)
    }
}

// ---------------------------------------------------------------------------
// Price
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryPriceRepository {
    rows: RwLock<BTreeMap<(String, DateTime<Utc>), PriceObservation>>,
}

impl InMemoryPriceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<PriceObservation> {
        self.rows.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl PriceRepository for InMemoryPriceRepository {
    async fn upsert_batch(&self, batch: &[PriceObservation]) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let mut written = 0;
        for row in batch {
            let key = (row.symbol.clone(), row.ts);
            match rows.get(&key) {
                Some(existing)
                    if row.data_completeness_percentage
                        < existing.data_completeness_percentage => {}
                _ => {
                    rows.insert(key, row.clone());
                    written += 1;
                }
            }
        }
        Ok(written)
    }

    async fn rows_after(
        &self,
        hwm: DateTime<Utc>,
        max_symbols: usize,
    ) -> Result<Vec<PriceObservation>> {
        let rows = self.rows.read().await;
        let mut symbols: Vec<&String> = rows
            .values()
            .filter(|r| r.ts > hwm && r.data_source != PLACEHOLDER_SOURCE)
            .map(|r| &r.symbol)
            .collect();
        symbols.sort();
        symbols.dedup();
        let selected: HashSet<String> =
            symbols.into_iter().take(max_symbols).cloned().collect();

        let mut out: Vec<PriceObservation> = rows
            .values()
            .filter(|r| {
                r.ts > hwm
                    && r.data_source != PLACEHOLDER_SOURCE
                    && selected.contains(&r.symbol)
            })
            .cloned()
            .collect();
        out.sort_by_key(|r| r.ts);
        Ok(out)
    }

    async fn series_before(
        &self,
        symbol: &str,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PriceObservation>> {
        let rows = self.rows.read().await;
        let mut series: Vec<PriceObservation> = rows
            .values()
            .filter(|r| {
                r.symbol == symbol && r.ts <= before && r.data_source != PLACEHOLDER_SOURCE
            })
            .cloned()
            .collect();
        series.sort_by_key(|r| r.ts);
        if series.len() > limit {
            series.drain(..series.len() - limit);
        }
        Ok(series)
    }

    async fn max_ts(&self) -> Result<Option<DateTime<Utc>>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|r| r.data_source != PLACEHOLDER_SOURCE)
            .map(|r| r.ts)
            .max())
    }
}

#[async_trait]
impl PlaceholderStore for InMemoryPriceRepository {
    fn placeholder_domain(&self) -> DataDomain {
        DataDomain::Price
    }

    async fn ensure_placeholders(&self, keys: &[PlaceholderKey]) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let mut inserted = 0;
        for key in keys {
            let map_key = (key.symbol.clone(), key.slot);
            if !rows.contains_key(&map_key) {
                rows.insert(
                    map_key,
                    PriceObservation {
                        symbol: key.symbol.clone(),
                        ts: key.slot,
                        current_price: 0.0,
                        high_24h: None,
                        low_24h: None,
                        open_24h: None,
                        volume_24h: None,
                        price_change_pct_24h: None,
                        market_cap: None,
                        market_cap_rank: None,
                        data_source: PLACEHOLDER_SOURCE.to_string(),
                        data_completeness_percentage: 0.0,
                    },
                );
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn gap_keys(&self, window: TimeWindow, threshold: f64) -> Result<Vec<PlaceholderKey>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|r| window.contains(r.ts) && r.data_completeness_percentage < threshold)
            .map(|r| PlaceholderKey {
                symbol: r.symbol.clone(),
                slot: r.ts,
            })
            .collect())
    }

    async fn completeness_stats(&self) -> Result<CompletenessStats> {
        let rows = self.rows.read().await;
        Ok(stats_from(
            rows.values().map(|r| &r.data_completeness_percentage),
        ))
    }
}

// ---------------------------------------------------------------------------
// OHLC
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryOhlcRepository {
    rows: RwLock<BTreeMap<(String, &'static str, DateTime<Utc>), OhlcBar>>,
}

impl InMemoryOhlcRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }
}

#[async_trait]
impl OhlcRepository for InMemoryOhlcRepository {
    async fn upsert_batch(&self, batch: &[OhlcBar]) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let mut written = 0;
        for bar in batch {
            let key = (bar.symbol.clone(), bar.timeframe.as_str(), bar.ts);
            match rows.get(&key) {
                Some(existing)
                    if bar.data_completeness_percentage
                        < existing.data_completeness_percentage => {}
                _ => {
                    rows.insert(key, bar.clone());
                    written += 1;
                }
            }
        }
        Ok(written)
    }

    async fn series(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        window: TimeWindow,
    ) -> Result<Vec<OhlcBar>> {
        let rows = self.rows.read().await;
        let mut out: Vec<OhlcBar> = rows
            .values()
            .filter(|b| b.symbol == symbol && b.timeframe == timeframe && window.contains(b.ts))
            .cloned()
            .collect();
        out.sort_by_key(|b| b.ts);
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Onchain
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryOnchainRepository {
    rows: RwLock<BTreeMap<(String, NaiveDate), OnchainObservation>>,
}

impl InMemoryOnchainRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OnchainRepository for InMemoryOnchainRepository {
    async fn upsert_batch(&self, batch: &[OnchainObservation]) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let mut written = 0;
        for row in batch {
            let key = (row.symbol.clone(), row.date);
            match rows.get(&key) {
                Some(existing)
                    if row.data_completeness_percentage
                        < existing.data_completeness_percentage => {}
                _ => {
                    rows.insert(key, row.clone());
                    written += 1;
                }
            }
        }
        Ok(written)
    }

    async fn in_range(
        &self,
        symbols: &[String],
        range: DateRange,
    ) -> Result<Vec<OnchainObservation>> {
        let rows = self.rows.read().await;
        let wanted: HashSet<&String> = symbols.iter().collect();
        let mut out: Vec<OnchainObservation> = rows
            .values()
            .filter(|r| {
                wanted.contains(&r.symbol)
                    && r.date >= range.start
                    && r.date <= range.end
                    && r.data_source != PLACEHOLDER_SOURCE
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| (&a.symbol, a.date).cmp(&(&b.symbol, b.date)));
        Ok(out)
    }
}

#[async_trait]
impl PlaceholderStore for InMemoryOnchainRepository {
    fn placeholder_domain(&self) -> DataDomain {
        DataDomain::Onchain
    }

    async fn ensure_placeholders(&self, keys: &[PlaceholderKey]) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let mut inserted = 0;
        for key in keys {
            let map_key = (key.symbol.clone(), key.slot.date_naive());
            if !rows.contains_key(&map_key) {
                rows.insert(
                    map_key,
                    OnchainObservation {
                        symbol: key.symbol.clone(),
                        date: key.slot.date_naive(),
                        data_source: PLACEHOLDER_SOURCE.to_string(),
                        data_completeness_percentage: 0.0,
                        ..Default::default()
                    },
                );
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn gap_keys(&self, window: TimeWindow, threshold: f64) -> Result<Vec<PlaceholderKey>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|r| {
                let slot = day_start(r.date);
                window.contains(slot) && r.data_completeness_percentage < threshold
            })
            .map(|r| PlaceholderKey {
                symbol: r.symbol.clone(),
                slot: day_start(r.date),
            })
            .collect())
    }

    async fn completeness_stats(&self) -> Result<CompletenessStats> {
        let rows = self.rows.read().await;
        Ok(stats_from(
            rows.values().map(|r| &r.data_completeness_percentage),
        ))
    }
}

// ---------------------------------------------------------------------------
// Macro
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryMacroRepository {
    rows: RwLock<BTreeMap<(String, NaiveDate), MacroIndicator>>,
}

impl InMemoryMacroRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MacroRepository for InMemoryMacroRepository {
    async fn upsert_batch(&self, batch: &[MacroIndicator]) -> Result<u64> {
        let mut rows = self.rows.write().await;
        for row in batch {
            rows.insert((row.series_id.clone(), row.date), row.clone());
        }
        Ok(batch.len() as u64)
    }

    async fn in_range(&self, range: DateRange) -> Result<Vec<MacroIndicator>> {
        let rows = self.rows.read().await;
        let mut out: Vec<MacroIndicator> = rows
            .values()
            .filter(|r| r.date >= range.start && r.date <= range.end)
            .cloned()
            .collect();
        out.sort_by(|a, b| (&a.series_id, a.date).cmp(&(&b.series_id, b.date)));
        Ok(out)
    }

    async fn latest_date(&self, series_id: &str) -> Result<Option<NaiveDate>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|r| r.series_id == series_id)
            .map(|r| r.date)
            .max())
    }
}

// ---------------------------------------------------------------------------
// News
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryNewsRepository {
    rows: RwLock<HashMap<String, NewsArticle>>,
}

impl InMemoryNewsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, url_hash: &str) -> Option<NewsArticle> {
        self.rows.read().await.get(url_hash).cloned()
    }
}

#[async_trait]
impl NewsRepository for InMemoryNewsRepository {
    async fn insert_new(&self, articles: &[NewsArticle]) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let mut inserted = 0;
        for article in articles {
            if !rows.contains_key(&article.url_hash) {
                rows.insert(article.url_hash.clone(), article.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn unscored(&self, limit: usize) -> Result<Vec<NewsArticle>> {
        let rows = self.rows.read().await;
        let mut out: Vec<NewsArticle> = rows
            .values()
            .filter(|a| !a.is_scored())
            .cloned()
            .collect();
        out.sort_by_key(|a| std::cmp::Reverse(a.published_at));
        out.truncate(limit);
        Ok(out)
    }

    async fn apply_scores(&self, url_hash: &str, scores: &ArticleScores) -> Result<()> {
        let mut rows = self.rows.write().await;
        if let Some(article) = rows.get_mut(url_hash) {
            article.sentiment_score = Some(scores.generic.0);
            article.sentiment_confidence = Some(scores.generic.1);
            article.crypto_sentiment_score = Some(scores.crypto.0);
            article.crypto_sentiment_confidence = Some(scores.crypto.1);
            article.stock_sentiment_score = Some(scores.stock.0);
            article.stock_sentiment_confidence = Some(scores.stock.1);
        }
        Ok(())
    }

    async fn scored_in(&self, window: TimeWindow) -> Result<Vec<NewsArticle>> {
        let rows = self.rows.read().await;
        let mut out: Vec<NewsArticle> = rows
            .values()
            .filter(|a| a.is_scored() && window.contains(a.published_at))
            .cloned()
            .collect();
        out.sort_by_key(|a| a.published_at);
        Ok(out)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.rows.read().await.len() as u64)
    }
}

// ---------------------------------------------------------------------------
// Sentiment
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemorySentimentRepository {
    rows: RwLock<BTreeMap<(String, DateTime<Utc>), SentimentSignal>>,
}

impl InMemorySentimentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SentimentRepository for InMemorySentimentRepository {
    async fn upsert_batch(&self, batch: &[SentimentSignal]) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let mut written = 0;
        for signal in batch {
            let key = (signal.symbol.clone(), signal.bucket_start);
            match rows.get(&key) {
                Some(existing)
                    if signal.data_completeness_percentage
                        < existing.data_completeness_percentage => {}
                _ => {
                    rows.insert(key, signal.clone());
                    written += 1;
                }
            }
        }
        Ok(written)
    }

    async fn in_range(
        &self,
        symbols: &[String],
        window: TimeWindow,
    ) -> Result<Vec<SentimentSignal>> {
        let rows = self.rows.read().await;
        let wanted: HashSet<&String> = symbols.iter().collect();
        let mut out: Vec<SentimentSignal> = rows
            .values()
            .filter(|s| {
                wanted.contains(&s.symbol)
                    && window.contains(s.bucket_start)
                    && s.data_source != PLACEHOLDER_SOURCE
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| (&a.symbol, a.bucket_start).cmp(&(&b.symbol, b.bucket_start)));
        Ok(out)
    }
}

#[async_trait]
impl PlaceholderStore for InMemorySentimentRepository {
    fn placeholder_domain(&self) -> DataDomain {
        DataDomain::Sentiment
    }

    async fn ensure_placeholders(&self, keys: &[PlaceholderKey]) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let mut inserted = 0;
        for key in keys {
            let map_key = (key.symbol.clone(), key.slot);
            if !rows.contains_key(&map_key) {
                rows.insert(
                    map_key,
                    SentimentSignal {
                        symbol: key.symbol.clone(),
                        bucket_start: key.slot,
                        avg_sentiment: 0.0,
                        avg_confidence: 0.0,
                        article_count: 0,
                        fear_greed_index: None,
                        data_source: PLACEHOLDER_SOURCE.to_string(),
                        data_completeness_percentage: 0.0,
                    },
                );
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn gap_keys(&self, window: TimeWindow, threshold: f64) -> Result<Vec<PlaceholderKey>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|s| window.contains(s.bucket_start) && s.data_completeness_percentage < threshold)
            .map(|s| PlaceholderKey {
                symbol: s.symbol.clone(),
                slot: s.bucket_start,
            })
            .collect())
    }

    async fn completeness_stats(&self) -> Result<CompletenessStats> {
        let rows = self.rows.read().await;
        Ok(stats_from(
            rows.values().map(|s| &s.data_completeness_percentage),
        ))
    }
}

// ---------------------------------------------------------------------------
// Technical
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryTechnicalRepository {
    rows: RwLock<BTreeMap<(String, DateTime<Utc>), TechnicalIndicator>>,
}

impl InMemoryTechnicalRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<TechnicalIndicator> {
        self.rows.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl TechnicalRepository for InMemoryTechnicalRepository {
    async fn upsert_batch(&self, batch: &[TechnicalIndicator]) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let mut written = 0;
        for row in batch {
            let key = (row.symbol.clone(), row.ts);
            match rows.get(&key) {
                Some(existing)
                    if row.data_completeness_percentage
                        < existing.data_completeness_percentage => {}
                _ => {
                    rows.insert(key, row.clone());
                    written += 1;
                }
            }
        }
        Ok(written)
    }

    async fn in_range(
        &self,
        symbols: &[String],
        window: TimeWindow,
    ) -> Result<Vec<TechnicalIndicator>> {
        let rows = self.rows.read().await;
        let wanted: HashSet<&String> = symbols.iter().collect();
        let mut out: Vec<TechnicalIndicator> = rows
            .values()
            .filter(|t| wanted.contains(&t.symbol) && window.contains(t.ts))
            .cloned()
            .collect();
        out.sort_by(|a, b| (&a.symbol, a.ts).cmp(&(&b.symbol, b.ts)));
        Ok(out)
    }

    async fn latest_ts(&self, symbol: &str) -> Result<Option<DateTime<Utc>>> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|t| t.symbol == symbol)
            .map(|t| t.ts)
            .max())
    }
}

// ---------------------------------------------------------------------------
// Derivatives / Market
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryDerivativesRepository {
    rows: RwLock<BTreeMap<(String, DateTime<Utc>), DerivativesObservation>>,
}

impl InMemoryDerivativesRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }
}

#[async_trait]
impl DerivativesRepository for InMemoryDerivativesRepository {
    async fn upsert_batch(&self, batch: &[DerivativesObservation]) -> Result<u64> {
        let mut rows = self.rows.write().await;
        for row in batch {
            rows.insert((row.symbol.clone(), row.ts), row.clone());
        }
        Ok(batch.len() as u64)
    }
}

#[derive(Default)]
pub struct InMemoryMarketRepository {
    rows: RwLock<BTreeMap<DateTime<Utc>, MarketSnapshot>>,
}

impl InMemoryMarketRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }
}

#[async_trait]
impl MarketRepository for InMemoryMarketRepository {
    async fn upsert_batch(&self, batch: &[MarketSnapshot]) -> Result<u64> {
        let mut rows = self.rows.write().await;
        for row in batch {
            rows.insert(row.ts, row.clone());
        }
        Ok(batch.len() as u64)
    }
}

// ---------------------------------------------------------------------------
// Features
// ---------------------------------------------------------------------------

type FeatureKey = (String, NaiveDate, u8);

pub struct InMemoryFeatureRepository {
    rows: RwLock<HashMap<FeatureKey, MergeRecord>>,
    columns: RwLock<Vec<String>>,
    collation: RwLock<Option<String>>,
    /// Keys that report lock contention on write, for contention tests.
    locked_keys: RwLock<HashSet<FeatureKey>>,
}

impl InMemoryFeatureRepository {
    /// Destination columns default to key + every v1 feature column +
    /// bookkeeping, mirroring the shipped DDL.
    pub fn new() -> Self {
        let mut columns: Vec<String> = vec![
            "symbol".to_string(),
            "feature_date".to_string(),
            "feature_hour".to_string(),
        ];
        if let Some(set) = crate::domain::feature_set::FeatureSet::resolve("v1") {
            columns.extend(set.columns.iter().map(|c| c.to_string()));
        }
        columns.push("data_source".to_string());
        columns.push("data_completeness_percentage".to_string());
        Self::with_columns(columns)
    }

    pub fn with_columns(columns: Vec<String>) -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            columns: RwLock::new(columns),
            collation: RwLock::new(Some(
                crate::infrastructure::persistence::database::SYMBOL_COLLATION.to_string(),
            )),
            locked_keys: RwLock::new(HashSet::new()),
        }
    }

    pub async fn set_columns(&self, columns: Vec<String>) {
        *self.columns.write().await = columns;
    }

    pub async fn set_collation(&self, collation: Option<String>) {
        *self.collation.write().await = collation;
    }

    pub async fn lock_key(&self, symbol: &str, date: NaiveDate, hour: u8) {
        self.locked_keys
            .write()
            .await
            .insert((symbol.to_string(), date, hour));
    }

    pub async fn unlock_all(&self) {
        self.locked_keys.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }
}

impl Default for InMemoryFeatureRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeatureRepository for InMemoryFeatureRepository {
    async fn destination_columns(&self) -> Result<Vec<String>> {
        Ok(self.columns.read().await.clone())
    }

    async fn symbol_collation(&self) -> Result<Option<String>> {
        Ok(self.collation.read().await.clone())
    }

    async fn upsert_rows(
        &self,
        records: &[MergeRecord],
        columns: &HashSet<String>,
    ) -> Result<FeatureWriteOutcome> {
        let mut outcome = FeatureWriteOutcome::default();
        let locked = self.locked_keys.read().await.clone();
        let mut rows = self.rows.write().await;

        for record in records {
            let key = (record.symbol.clone(), record.date, record.hour);
            if locked.contains(&key) {
                outcome.locked_skipped += 1;
                continue;
            }

            let incoming_completeness = record.completeness().unwrap_or(0.0);
            let projected: BTreeMap<String, FeatureValue> = record
                .values
                .iter()
                .filter(|(column, _)| columns.contains(*column))
                .map(|(column, value)| (column.clone(), value.clone()))
                .collect();

            match rows.get_mut(&key) {
                Some(existing) => {
                    let existing_completeness = existing.completeness().unwrap_or(0.0);
                    if incoming_completeness >= existing_completeness {
                        // Statement columns only; untouched columns persist.
                        for (column, value) in projected {
                            existing.values.insert(column, value);
                        }
                        existing.values.insert(
                            "data_completeness_percentage".to_string(),
                            FeatureValue::Float(
                                incoming_completeness.max(existing_completeness),
                            ),
                        );
                        outcome.written += 1;
                    }
                }
                None => {
                    let mut fresh = MergeRecord::new(&record.symbol, record.date, record.hour);
                    fresh.values = projected;
                    fresh.values.insert(
                        "data_completeness_percentage".to_string(),
                        FeatureValue::Float(incoming_completeness),
                    );
                    rows.insert(key, fresh);
                    outcome.written += 1;
                }
            }
        }
        Ok(outcome)
    }

    async fn get(&self, symbol: &str, date: NaiveDate, hour: u8) -> Result<Option<MergeRecord>> {
        Ok(self
            .rows
            .read()
            .await
            .get(&(symbol.to_string(), date, hour))
            .cloned())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.rows.read().await.len() as u64)
    }
}

// ---------------------------------------------------------------------------
// Monitoring
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryMonitoringRepository {
    states: RwLock<HashMap<String, String>>,
}

impl InMemoryMonitoringRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MonitoringRepository for InMemoryMonitoringRepository {
    async fn save_state(&self, component: &str, state_json: &str) -> Result<()> {
        self.states
            .write()
            .await
            .insert(component.to_string(), state_json.to_string());
        Ok(())
    }

    async fn load_state(&self, component: &str) -> Result<Option<String>> {
        Ok(self.states.read().await.get(component).cloned())
    }
}
