//! Named, versioned feature-set definitions.
//!
//! Completeness of a materialized row is computed over the column list of the
//! configured feature set, not over whatever columns the destination table
//! happens to have: adding columns to the schema does not silently change
//! completeness scores.

/// Macro series tracked by the macro collector, with the feature column each
/// one broadcasts into.
pub const MACRO_SERIES: &[(&str, &str)] = &[
    ("VIXCLS", "vix"),
    ("DFF", "fed_funds_rate"),
    ("DGS10", "treasury_10y"),
    ("CPIAUCSL", "cpi"),
    ("DTWEXBGS", "dxy"),
    ("SP500", "sp500"),
    ("DCOILWTICO", "wti_oil"),
    ("GOLDAMGBD228NLBM", "gold"),
];

pub fn macro_column(series_id: &str) -> Option<&'static str> {
    MACRO_SERIES
        .iter()
        .find(|(id, _)| *id == series_id)
        .map(|(_, col)| *col)
}

const FEATURE_SET_V1: &[&str] = &[
    // price
    "current_price",
    "high_24h",
    "low_24h",
    "open_24h",
    "volume_24h",
    "price_change_pct_24h",
    "market_cap",
    "market_cap_rank",
    // technical
    "sma_20",
    "sma_50",
    "sma_200",
    "ema_12",
    "ema_26",
    "rsi_14",
    "macd",
    "macd_signal",
    "macd_histogram",
    "bb_upper",
    "bb_middle",
    "bb_lower",
    "atr_14",
    // macro (broadcast by date)
    "vix",
    "fed_funds_rate",
    "treasury_10y",
    "cpi",
    "dxy",
    "sp500",
    "wti_oil",
    "gold",
    // onchain (broadcast by date)
    "circulating_supply",
    "total_supply",
    "max_supply",
    "active_addresses",
    "transaction_count",
    "twitter_followers",
    "reddit_subscribers",
    "github_stars",
    "github_commits_4w",
    "developer_score",
    "community_score",
    "liquidity_score",
    "public_interest_score",
    // sentiment (exact hour bucket)
    "avg_sentiment",
    "avg_confidence",
    "article_count",
    "fear_greed_index",
];

#[derive(Debug, Clone, Copy)]
pub struct FeatureSet {
    pub version: &'static str,
    pub columns: &'static [&'static str],
}

impl FeatureSet {
    /// Resolve a named feature set. Unknown versions are a startup
    /// configuration error, handled by the caller.
    pub fn resolve(version: &str) -> Option<FeatureSet> {
        match version {
            "v1" => Some(FeatureSet {
                version: "v1",
                columns: FEATURE_SET_V1,
            }),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains(&column)
    }

    /// `100 × non-null feature columns / total feature columns`.
    pub fn completeness(&self, non_null: usize) -> f64 {
        if self.columns.is_empty() {
            return 0.0;
        }
        100.0 * non_null.min(self.columns.len()) as f64 / self.columns.len() as f64
    }
}
