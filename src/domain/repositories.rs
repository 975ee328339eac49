//! Repository contracts for the observation tables and the features table.
//!
//! Every observation table has a unique natural key; writes are idempotent
//! upserts on that key and never lower an existing row's completeness.
//! MySQL implementations live in `infrastructure::persistence::repositories`,
//! in-memory test doubles in `infrastructure::persistence::in_memory`.

use crate::domain::types::{
    ArticleScores, Asset, AssetPatch, DerivativesObservation, MacroIndicator, MarketSnapshot,
    NewsArticle, OhlcBar, OnchainObservation, PlaceholderKey, PriceObservation, SentimentSignal,
    TechnicalIndicator, TimeWindow, Timeframe,
};
use crate::domain::ports::DateRange;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashSet};

/// The domain tables the system writes. Used for placeholder sweeps, gap
/// detection and completeness reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataDomain {
    Price,
    Ohlc,
    Onchain,
    Macro,
    News,
    Sentiment,
    Technical,
    Derivatives,
    Market,
    Features,
}

impl DataDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataDomain::Price => "price",
            DataDomain::Ohlc => "ohlc",
            DataDomain::Onchain => "onchain",
            DataDomain::Macro => "macro",
            DataDomain::News => "news",
            DataDomain::Sentiment => "sentiment",
            DataDomain::Technical => "technical",
            DataDomain::Derivatives => "derivatives",
            DataDomain::Market => "market",
            DataDomain::Features => "features",
        }
    }
}

/// Per-domain completeness summary.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CompletenessStats {
    pub total: u64,
    pub filled: u64,
    pub avg_completeness: f64,
}

/// Implemented by repositories whose domain participates in gap detection.
/// Placeholder rows carry only the key, completeness 0 and
/// `data_source = "placeholder"`; inserting uses ignore-on-conflict so the
/// sweep is idempotent.
#[async_trait]
pub trait PlaceholderStore: Send + Sync {
    fn placeholder_domain(&self) -> DataDomain;

    /// Insert skeleton rows for the keys not already present.
    /// Returns the number actually inserted.
    async fn ensure_placeholders(&self, keys: &[PlaceholderKey]) -> Result<u64>;

    /// Keys in the window whose completeness is below `threshold`.
    async fn gap_keys(&self, window: TimeWindow, threshold: f64) -> Result<Vec<PlaceholderKey>>;

    async fn completeness_stats(&self) -> Result<CompletenessStats>;
}

#[async_trait]
pub trait AssetRepository: Send + Sync {
    /// Active assets in stable symbol order.
    async fn active_assets(&self) -> Result<Vec<Asset>>;
    async fn find(&self, symbol: &str) -> Result<Option<Asset>>;
    async fn upsert(&self, asset: &Asset) -> Result<()>;
    /// Partial metadata update. Never touches `is_active`.
    async fn update_metadata(&self, symbol: &str, patch: &AssetPatch) -> Result<()>;
    async fn set_active(&self, symbol: &str, active: bool) -> Result<()>;
    async fn count(&self) -> Result<u64>;
}

#[async_trait]
pub trait PriceRepository: PlaceholderStore {
    async fn upsert_batch(&self, rows: &[PriceObservation]) -> Result<u64>;
    /// Rows strictly after the high-water mark, ascending by ts, covering at
    /// most `max_symbols` distinct symbols.
    async fn rows_after(
        &self,
        hwm: DateTime<Utc>,
        max_symbols: usize,
    ) -> Result<Vec<PriceObservation>>;
    /// Most recent `limit` observations for `symbol` with `ts <= before`,
    /// ascending. Input series for the technical collector.
    async fn series_before(
        &self,
        symbol: &str,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PriceObservation>>;
    async fn max_ts(&self) -> Result<Option<DateTime<Utc>>>;
}

#[async_trait]
pub trait OhlcRepository: Send + Sync {
    async fn upsert_batch(&self, rows: &[OhlcBar]) -> Result<u64>;
    async fn series(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        window: TimeWindow,
    ) -> Result<Vec<OhlcBar>>;
}

#[async_trait]
pub trait OnchainRepository: PlaceholderStore {
    async fn upsert_batch(&self, rows: &[OnchainObservation]) -> Result<u64>;
    /// Rows for `symbols` within the date range (inclusive), ascending by date.
    async fn in_range(&self, symbols: &[String], range: DateRange)
        -> Result<Vec<OnchainObservation>>;
}

#[async_trait]
pub trait MacroRepository: Send + Sync {
    async fn upsert_batch(&self, rows: &[MacroIndicator]) -> Result<u64>;
    /// All series observations within the date range (inclusive).
    async fn in_range(&self, range: DateRange) -> Result<Vec<MacroIndicator>>;
    async fn latest_date(&self, series_id: &str) -> Result<Option<NaiveDate>>;
}

#[async_trait]
pub trait NewsRepository: Send + Sync {
    /// Insert articles not already present (by `url_hash`).
    /// Returns the number actually inserted; the rest are duplicates.
    async fn insert_new(&self, articles: &[NewsArticle]) -> Result<u64>;
    async fn unscored(&self, limit: usize) -> Result<Vec<NewsArticle>>;
    async fn apply_scores(&self, url_hash: &str, scores: &ArticleScores) -> Result<()>;
    /// Scored articles published within the window.
    async fn scored_in(&self, window: TimeWindow) -> Result<Vec<NewsArticle>>;
    async fn count(&self) -> Result<u64>;
}

#[async_trait]
pub trait SentimentRepository: PlaceholderStore {
    async fn upsert_batch(&self, rows: &[SentimentSignal]) -> Result<u64>;
    async fn in_range(&self, symbols: &[String], window: TimeWindow)
        -> Result<Vec<SentimentSignal>>;
}

#[async_trait]
pub trait TechnicalRepository: Send + Sync {
    async fn upsert_batch(&self, rows: &[TechnicalIndicator]) -> Result<u64>;
    async fn in_range(
        &self,
        symbols: &[String],
        window: TimeWindow,
    ) -> Result<Vec<TechnicalIndicator>>;
    async fn latest_ts(&self, symbol: &str) -> Result<Option<DateTime<Utc>>>;
}

#[async_trait]
pub trait DerivativesRepository: Send + Sync {
    async fn upsert_batch(&self, rows: &[DerivativesObservation]) -> Result<u64>;
}

#[async_trait]
pub trait MarketRepository: Send + Sync {
    async fn upsert_batch(&self, rows: &[MarketSnapshot]) -> Result<u64>;
}

/// One value of a materialized feature column.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Float(f64),
    Int(i64),
    Text(String),
}

impl FeatureValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Float(v) => Some(*v),
            FeatureValue::Int(v) => Some(*v as f64),
            FeatureValue::Text(_) => None,
        }
    }
}

/// The wide joined record keyed by `(symbol, date, hour)` that the
/// materialized updater writes. Non-key columns live in `values`; a column
/// absent from the map is omitted from the insert statement, never sent as
/// NULL.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MergeRecord {
    pub symbol: String,
    pub date: NaiveDate,
    pub hour: u8,
    pub values: BTreeMap<String, FeatureValue>,
}

impl MergeRecord {
    pub fn new(symbol: impl Into<String>, date: NaiveDate, hour: u8) -> Self {
        Self {
            symbol: symbol.into(),
            date,
            hour,
            values: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, column: &str, value: FeatureValue) {
        self.values.insert(column.to_string(), value);
    }

    pub fn set_opt_f64(&mut self, column: &str, value: Option<f64>) {
        if let Some(v) = value {
            self.values.insert(column.to_string(), FeatureValue::Float(v));
        }
    }

    pub fn completeness(&self) -> Option<f64> {
        self.values
            .get("data_completeness_percentage")
            .and_then(FeatureValue::as_f64)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureWriteOutcome {
    pub written: u64,
    /// Keys skipped in this run because of lock contention; retried on the
    /// next tick.
    pub locked_skipped: u64,
}

#[async_trait]
pub trait FeatureRepository: Send + Sync {
    /// Columns that currently exist on the destination table. Feeds the
    /// schema-drift cache.
    async fn destination_columns(&self) -> Result<Vec<String>>;

    /// Collation of the destination symbol column, if the backend reports
    /// one. A mismatch against the expected collation is a schema defect.
    async fn symbol_collation(&self) -> Result<Option<String>>;

    /// Batched completeness-gated upsert. `columns` is the drift cache:
    /// record values outside it must not reach the statement.
    async fn upsert_rows(
        &self,
        rows: &[MergeRecord],
        columns: &HashSet<String>,
    ) -> Result<FeatureWriteOutcome>;

    async fn get(&self, symbol: &str, date: NaiveDate, hour: u8) -> Result<Option<MergeRecord>>;
    async fn count(&self) -> Result<u64>;
}

/// Last-known state per component (`service_monitoring` table): lifecycle
/// state, stats snapshot, high-water marks, circuit-breaker state.
#[async_trait]
pub trait MonitoringRepository: Send + Sync {
    async fn save_state(&self, component: &str, state_json: &str) -> Result<()>;
    async fn load_state(&self, component: &str) -> Result<Option<String>>;
}
