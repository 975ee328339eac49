use crate::domain::errors::FetchError;
use crate::domain::types::{
    ArticleScores, Asset, DerivativesObservation, MacroIndicator, MarketSnapshot, NewsArticle,
    OhlcBar, OnchainObservation, PriceObservation, TimeWindow, Timeframe,
};
use async_trait::async_trait;
use chrono::NaiveDate;

/// Inclusive date range used by daily-cadence sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn iter(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        let start = self.start;
        (0..self.days()).filter_map(move |d| start.checked_add_days(chrono::Days::new(d as u64)))
    }
}

// Source capability contracts, one per external provider concern. Adapters
// normalize provider-native payloads into domain records before returning;
// they are stateless apart from their rate-limit bucket and safe for
// concurrent use by their owning collector.

#[async_trait]
pub trait PriceSource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch_prices(&self, assets: &[Asset]) -> Result<Vec<PriceObservation>, FetchError>;
}

#[async_trait]
pub trait OhlcSource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch_ohlc(
        &self,
        asset: &Asset,
        timeframe: Timeframe,
        range: DateRange,
    ) -> Result<Vec<OhlcBar>, FetchError>;
}

#[async_trait]
pub trait OnchainSource: Send + Sync {
    fn name(&self) -> &'static str;
    /// Current-day snapshot. Providers do not expose historical community
    /// data, so backfill replays only what the provider returns.
    async fn fetch_onchain(&self, asset: &Asset) -> Result<OnchainObservation, FetchError>;
}

#[async_trait]
pub trait MacroSource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch_series(
        &self,
        series_id: &str,
        range: DateRange,
    ) -> Result<Vec<MacroIndicator>, FetchError>;
}

#[async_trait]
pub trait NewsSource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch_articles(&self, window: TimeWindow) -> Result<Vec<NewsArticle>, FetchError>;
}

#[async_trait]
pub trait DerivativesSource: Send + Sync {
    fn name(&self) -> &'static str;
    /// Returns `Ok(None)` when the asset has no supported perpetual market.
    async fn fetch_derivatives(
        &self,
        asset: &Asset,
    ) -> Result<Option<DerivativesObservation>, FetchError>;
}

#[async_trait]
pub trait MarketSource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch_global(&self) -> Result<MarketSnapshot, FetchError>;
}

/// Daily fear & greed readings, social input to the sentiment collector.
#[async_trait]
pub trait SocialIndexSource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch_index(&self, range: DateRange) -> Result<Vec<(NaiveDate, f64)>, FetchError>;
}

/// Sentiment classifier contract. Implementations are pure and synchronous;
/// the sentiment collector drives them over unscored articles.
pub trait Classifier: Send + Sync {
    /// Score a single text. Returns `(score in [-1, 1], confidence in [0, 1])`.
    fn score(&self, text: &str) -> (f64, f64);

    /// Score an article under the generic, crypto and stock lexicon flavors.
    fn score_article(&self, title: &str, content: &str) -> ArticleScores;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_range_iterates_inclusively() {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 3).unwrap(),
        );
        let days: Vec<NaiveDate> = range.iter().collect();
        assert_eq!(days.len(), 3);
        assert_eq!(days[0], range.start);
        assert_eq!(days[2], range.end);
    }

    #[test]
    fn single_day_range_has_one_day() {
        let d = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        assert_eq!(DateRange::new(d, d).days(), 1);
    }
}
