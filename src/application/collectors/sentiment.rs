//! Sentiment collector: scores unscored news articles through the
//! classifier, then aggregates per (symbol, hour bucket). Empty buckets get
//! no row, and sentiment never carries across hours.

use super::{Collector, TickContext, TickOutcome, is_tick_fatal};
use crate::domain::ports::{Classifier, DateRange, SocialIndexSource};
use crate::domain::repositories::{DataDomain, NewsRepository, SentimentRepository};
use crate::domain::types::{
    COMPLETENESS_FULL, COMPLETENESS_PARTIAL, NewsArticle, SentimentSignal, TimeWindow,
};
use crate::domain::validation::{RecordValidator, retain_valid};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, DurationRound, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Live ticks re-aggregate this trailing window; upserts make that
/// idempotent while late-arriving articles still land in their bucket.
const AGGREGATION_WINDOW_HOURS: i64 = 24;

/// Buckets with at least this many articles count as fully observed.
const FULL_BUCKET_ARTICLES: i64 = 3;

pub struct SentimentCollector {
    news: Arc<dyn NewsRepository>,
    repo: Arc<dyn SentimentRepository>,
    classifier: Arc<dyn Classifier>,
    social: Option<Arc<dyn SocialIndexSource>>,
}

impl SentimentCollector {
    pub fn new(
        news: Arc<dyn NewsRepository>,
        repo: Arc<dyn SentimentRepository>,
        classifier: Arc<dyn Classifier>,
        social: Option<Arc<dyn SocialIndexSource>>,
    ) -> Self {
        Self {
            news,
            repo,
            classifier,
            social,
        }
    }

    /// Confidence-weighted mean of the crypto-flavor scores in one bucket.
    fn aggregate_bucket(articles: &[&NewsArticle]) -> Option<(f64, f64)> {
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        let mut confidence_sum = 0.0;
        let mut n = 0usize;
        for article in articles {
            let (Some(score), Some(confidence)) = (
                article.crypto_sentiment_score,
                article.crypto_sentiment_confidence,
            ) else {
                continue;
            };
            // A floor keeps zero-confidence articles from vanishing from the
            // mean entirely.
            let weight = confidence.max(0.05);
            weighted_sum += score * weight;
            weight_total += weight;
            confidence_sum += confidence;
            n += 1;
        }
        if n == 0 || weight_total == 0.0 {
            return None;
        }
        Some((weighted_sum / weight_total, confidence_sum / n as f64))
    }

    fn build_signals(
        articles: &[NewsArticle],
        fear_greed: &HashMap<NaiveDate, f64>,
    ) -> Vec<SentimentSignal> {
        let mut buckets: BTreeMap<(String, DateTime<Utc>), Vec<&NewsArticle>> = BTreeMap::new();
        for article in articles {
            let Ok(bucket_start) = article.published_at.duration_trunc(ChronoDuration::hours(1))
            else {
                continue;
            };
            for symbol in &article.symbols_mentioned {
                buckets
                    .entry((symbol.clone(), bucket_start))
                    .or_default()
                    .push(article);
            }
        }

        let mut signals = Vec::with_capacity(buckets.len());
        for ((symbol, bucket_start), bucket_articles) in buckets {
            let Some((avg_sentiment, avg_confidence)) = Self::aggregate_bucket(&bucket_articles)
            else {
                continue;
            };
            let article_count = bucket_articles.len() as i64;
            signals.push(SentimentSignal {
                symbol,
                bucket_start,
                avg_sentiment,
                avg_confidence,
                article_count,
                fear_greed_index: fear_greed.get(&bucket_start.date_naive()).copied(),
                data_source: "news_aggregation".to_string(),
                data_completeness_percentage: if article_count >= FULL_BUCKET_ARTICLES {
                    COMPLETENESS_FULL
                } else {
                    COMPLETENESS_PARTIAL
                },
            });
        }
        signals
    }

    async fn fetch_fear_greed(
        &self,
        range: DateRange,
        outcome: &mut TickOutcome,
    ) -> Result<HashMap<NaiveDate, f64>> {
        let Some(social) = &self.social else {
            return Ok(HashMap::new());
        };
        outcome.api_calls += 1;
        match social.fetch_index(range).await {
            Ok(readings) => Ok(readings.into_iter().collect()),
            Err(err) if is_tick_fatal(&err) => Err(err.into()),
            Err(err) => {
                warn!(error = %err, "fear & greed fetch failed, signals carry no index");
                outcome.batch_errors += 1;
                Ok(HashMap::new())
            }
        }
    }

    async fn collect_window(&self, ctx: &TickContext, window: TimeWindow) -> Result<TickOutcome> {
        let mut outcome = TickOutcome::default();

        // Phase 1: classify whatever is still unscored.
        let unscored = self.news.unscored(ctx.batch_size).await?;
        for article in &unscored {
            if ctx.cancel.is_cancelled() {
                break;
            }
            let scores = self
                .classifier
                .score_article(&article.title, article.content.as_deref().unwrap_or(""));
            self.news.apply_scores(&article.url_hash, &scores).await?;
            outcome.db_writes += 1;
        }

        // Phase 2: social index for the window's dates.
        let range = DateRange::new(window.start.date_naive(), window.end.date_naive());
        let fear_greed = self.fetch_fear_greed(range, &mut outcome).await?;

        // Phase 3: aggregate scored articles into hourly signals.
        let scored = self.news.scored_in(window).await?;
        let signals = Self::build_signals(&scored, &fear_greed);

        let (valid, rejected) = retain_valid(signals, RecordValidator::validate_sentiment);
        outcome.invalid_records += rejected.len() as u64;
        outcome.validation_errors.extend(rejected);

        if !valid.is_empty() {
            let write_started = Instant::now();
            for batch in valid.chunks(ctx.batch_size) {
                self.repo.upsert_batch(batch).await?;
                outcome.db_writes += 1;
            }
            outcome.db_write_duration += write_started.elapsed();
            outcome.collected = valid.len() as u64;
        }
        Ok(outcome)
    }
}

#[async_trait]
impl Collector for SentimentCollector {
    fn name(&self) -> &'static str {
        "sentiment"
    }

    fn domain(&self) -> DataDomain {
        DataDomain::Sentiment
    }

    async fn collect(&self, ctx: &TickContext) -> Result<TickOutcome> {
        let window = TimeWindow::new(
            ctx.now - ChronoDuration::hours(AGGREGATION_WINDOW_HOURS),
            ctx.now,
        );
        self.collect_window(ctx, window).await
    }

    async fn backfill(&self, ctx: &TickContext, range: DateRange, _force: bool) -> Result<TickOutcome> {
        let window = TimeWindow::new(
            chrono::TimeZone::from_utc_datetime(
                &Utc,
                &range.start.and_hms_opt(0, 0, 0).expect("midnight is valid"),
            ),
            chrono::TimeZone::from_utc_datetime(
                &Utc,
                &range.end.and_hms_opt(0, 0, 0).expect("midnight is valid"),
            ) + ChronoDuration::days(1),
        );
        self.collect_window(ctx, window).await
    }

    fn estimate_backfill_records(&self, symbols: usize, range: &DateRange) -> u64 {
        symbols as u64 * range.days().max(0) as u64 * 24
    }
}
