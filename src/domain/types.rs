use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Reserved `data_source` marker for skeleton rows created ahead of real data.
pub const PLACEHOLDER_SOURCE: &str = "placeholder";

/// Completeness floor for a row that carries at least the key fields plus a
/// partial payload. Real writes never go below this.
pub const COMPLETENESS_PARTIAL: f64 = 50.0;
pub const COMPLETENESS_FULL: f64 = 100.0;

/// External providers for which an asset may carry a native identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExternalSource {
    CoinGecko,
    Fred,
    Binance,
}

impl std::fmt::Display for ExternalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExternalSource::CoinGecko => write!(f, "coingecko"),
            ExternalSource::Fred => write!(f, "fred"),
            ExternalSource::Binance => write!(f, "binance"),
        }
    }
}

/// A tracked asset and its per-source identifiers. Symbols are uppercase,
/// at most 16 chars, unique. Rows are never deleted while referenced;
/// `is_active` is toggled instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub symbol: String,
    pub name: String,
    pub coingecko_id: Option<String>,
    pub binance_symbol: Option<String>,
    pub category: Option<String>,
    pub market_cap_rank: Option<u32>,
    pub is_active: bool,
    pub supports_derivatives: bool,
}

impl Asset {
    pub fn external_id(&self, source: ExternalSource) -> Option<&str> {
        match source {
            ExternalSource::CoinGecko => self.coingecko_id.as_deref(),
            ExternalSource::Binance => self.binance_symbol.as_deref(),
            ExternalSource::Fred => None,
        }
    }
}

/// Partial update for an asset. `None` fields are left untouched.
/// Deliberately has no `is_active` member: activation is an explicit,
/// separate operation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssetPatch {
    pub name: Option<String>,
    pub coingecko_id: Option<String>,
    pub binance_symbol: Option<String>,
    pub category: Option<String>,
    pub market_cap_rank: Option<u32>,
    pub supports_derivatives: Option<bool>,
}

/// Spot price snapshot keyed by `(symbol, ts)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceObservation {
    pub symbol: String,
    pub ts: DateTime<Utc>,
    pub current_price: f64,
    pub high_24h: Option<f64>,
    pub low_24h: Option<f64>,
    pub open_24h: Option<f64>,
    pub volume_24h: Option<f64>,
    pub price_change_pct_24h: Option<f64>,
    pub market_cap: Option<f64>,
    pub market_cap_rank: Option<u32>,
    pub data_source: String,
    pub data_completeness_percentage: f64,
}

impl PriceObservation {
    /// Fraction of the optional payload that is populated, mapped onto the
    /// partial..full completeness band.
    pub fn computed_completeness(&self) -> f64 {
        let fields = [
            self.high_24h,
            self.low_24h,
            self.open_24h,
            self.volume_24h,
            self.price_change_pct_24h,
            self.market_cap,
        ];
        let filled = fields.iter().filter(|f| f.is_some()).count() as f64;
        let span = COMPLETENESS_FULL - COMPLETENESS_PARTIAL;
        COMPLETENESS_PARTIAL + span * filled / fields.len() as f64
    }
}

/// Candle timeframe. Wire form matches provider conventions ("1h", "1d").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1h" => Some(Timeframe::H1),
            "4h" => Some(Timeframe::H4),
            "1d" => Some(Timeframe::D1),
            _ => None,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// OHLC candle keyed by `(symbol, timeframe, ts)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OhlcBar {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub ts: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<f64>,
    pub data_source: String,
    pub data_completeness_percentage: f64,
}

/// Daily on-chain / community / developer snapshot keyed by `(symbol, date)`.
/// Providers omit many of these; absence stays absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OnchainObservation {
    pub symbol: String,
    pub date: NaiveDate,
    pub circulating_supply: Option<f64>,
    pub total_supply: Option<f64>,
    pub max_supply: Option<f64>,
    pub active_addresses: Option<i64>,
    pub transaction_count: Option<i64>,
    pub twitter_followers: Option<i64>,
    pub reddit_subscribers: Option<i64>,
    pub github_stars: Option<i64>,
    pub github_commits_4w: Option<i64>,
    pub developer_score: Option<f64>,
    pub community_score: Option<f64>,
    pub liquidity_score: Option<f64>,
    pub public_interest_score: Option<f64>,
    pub data_source: String,
    pub data_completeness_percentage: f64,
}

impl OnchainObservation {
    pub fn populated_field_count(&self) -> usize {
        let floats = [
            self.circulating_supply,
            self.total_supply,
            self.max_supply,
            self.developer_score,
            self.community_score,
            self.liquidity_score,
            self.public_interest_score,
        ];
        let ints = [
            self.active_addresses,
            self.transaction_count,
            self.twitter_followers,
            self.reddit_subscribers,
            self.github_stars,
            self.github_commits_4w,
        ];
        floats.iter().filter(|f| f.is_some()).count() + ints.iter().filter(|f| f.is_some()).count()
    }

    pub const FIELD_COUNT: usize = 13;
}

/// One observation of a macroeconomic series, keyed by `(series_id, date)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroIndicator {
    pub series_id: String,
    pub date: NaiveDate,
    pub value: f64,
    pub frequency: Option<String>,
    pub data_source: String,
}

/// A news article, deduplicated by `url_hash`. Sentiment fields are filled
/// by the sentiment collector after ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsArticle {
    pub url_hash: String,
    pub url: String,
    pub title: String,
    pub source: String,
    pub published_at: DateTime<Utc>,
    pub content: Option<String>,
    pub symbols_mentioned: Vec<String>,
    pub sentiment_score: Option<f64>,
    pub sentiment_confidence: Option<f64>,
    pub crypto_sentiment_score: Option<f64>,
    pub crypto_sentiment_confidence: Option<f64>,
    pub stock_sentiment_score: Option<f64>,
    pub stock_sentiment_confidence: Option<f64>,
    pub collected_at: DateTime<Utc>,
}

impl NewsArticle {
    pub fn is_scored(&self) -> bool {
        self.sentiment_score.is_some()
    }
}

/// Sentiment scores for one article under the three lexicon flavors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArticleScores {
    pub generic: (f64, f64),
    pub crypto: (f64, f64),
    pub stock: (f64, f64),
}

/// Hourly sentiment aggregate keyed by `(symbol, bucket_start)`.
/// `avg_sentiment` is the confidence-weighted mean of the bucket's article
/// scores; buckets with no articles produce no row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentSignal {
    pub symbol: String,
    pub bucket_start: DateTime<Utc>,
    pub avg_sentiment: f64,
    pub avg_confidence: f64,
    pub article_count: i64,
    pub fear_greed_index: Option<f64>,
    pub data_source: String,
    pub data_completeness_percentage: f64,
}

/// Derived technical series keyed by `(symbol, ts)`. Computed from stored
/// price history; no external I/O.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TechnicalIndicator {
    pub symbol: String,
    pub ts: DateTime<Utc>,
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub sma_200: Option<f64>,
    pub ema_12: Option<f64>,
    pub ema_26: Option<f64>,
    pub rsi_14: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub atr_14: Option<f64>,
    pub data_source: String,
    pub data_completeness_percentage: f64,
}

/// Funding / open-interest snapshot keyed by `(symbol, ts)`. Only present
/// for assets with a supported perpetual market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivativesObservation {
    pub symbol: String,
    pub ts: DateTime<Utc>,
    pub funding_rate: Option<f64>,
    pub open_interest: Option<f64>,
    pub mark_price: Option<f64>,
    pub index_price: Option<f64>,
    pub data_source: String,
    pub data_completeness_percentage: f64,
}

/// Global market aggregates keyed by `ts` alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub ts: DateTime<Utc>,
    pub total_market_cap_usd: Option<f64>,
    pub total_volume_24h_usd: Option<f64>,
    pub btc_dominance_pct: Option<f64>,
    pub eth_dominance_pct: Option<f64>,
    pub active_cryptocurrencies: Option<i64>,
    pub markets: Option<i64>,
    pub data_source: String,
    pub data_completeness_percentage: f64,
}

/// A key expected to eventually hold real data. `slot` is the hour start for
/// hourly domains and midnight UTC for daily domains.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PlaceholderKey {
    pub symbol: String,
    pub slot: DateTime<Utc>,
}

/// Half-open time window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn price(symbol: &str) -> PriceObservation {
        PriceObservation {
            symbol: symbol.to_string(),
            ts: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            current_price: 40_000.0,
            high_24h: Some(41_000.0),
            low_24h: Some(39_500.0),
            open_24h: Some(39_800.0),
            volume_24h: Some(1e9),
            price_change_pct_24h: None,
            market_cap: None,
            market_cap_rank: None,
            data_source: "coingecko".to_string(),
            data_completeness_percentage: 0.0,
        }
    }

    #[test]
    fn price_completeness_scales_with_populated_fields() {
        let mut p = price("BTC");
        let partial = p.computed_completeness();
        assert!(partial >= COMPLETENESS_PARTIAL && partial < COMPLETENESS_FULL);

        p.price_change_pct_24h = Some(1.2);
        p.market_cap = Some(8e11);
        assert_eq!(p.computed_completeness(), COMPLETENESS_FULL);
    }

    #[test]
    fn empty_onchain_row_reports_zero_populated() {
        let row = OnchainObservation {
            symbol: "BTC".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            data_source: PLACEHOLDER_SOURCE.to_string(),
            ..Default::default()
        };
        assert_eq!(row.populated_field_count(), 0);
    }

    #[test]
    fn timeframe_round_trips() {
        for tf in [Timeframe::H1, Timeframe::H4, Timeframe::D1] {
            assert_eq!(Timeframe::parse(tf.as_str()), Some(tf));
        }
        assert_eq!(Timeframe::parse("5m"), None);
    }

    #[test]
    fn window_is_half_open() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        let w = TimeWindow::new(start, end);
        assert!(w.contains(start));
        assert!(!w.contains(end));
    }
}
