//! News collector: pulls articles from every configured news source,
//! deduplicates by URL hash and extracts symbol mentions from title and
//! content. Sentiment fields are filled later by the sentiment collector.

use super::{Collector, TickContext, TickOutcome, is_tick_fatal};
use crate::domain::ports::NewsSource;
use crate::domain::repositories::{DataDomain, NewsRepository};
use crate::domain::types::{Asset, NewsArticle, TimeWindow};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Live window: overlapping fetches are harmless because the URL hash
/// deduplicates across ticks and across sources.
const LIVE_WINDOW_HOURS: i64 = 2;

pub struct NewsCollector {
    sources: Vec<Arc<dyn NewsSource>>,
    repo: Arc<dyn NewsRepository>,
}

impl NewsCollector {
    pub fn new(sources: Vec<Arc<dyn NewsSource>>, repo: Arc<dyn NewsRepository>) -> Self {
        Self { sources, repo }
    }

    /// Symbols mentioned in title or content: the ticker as a standalone
    /// uppercase token, or the asset name as a case-insensitive substring.
    pub fn extract_mentions(title: &str, content: Option<&str>, assets: &[Asset]) -> Vec<String> {
        let text = match content {
            Some(content) => format!("{title} {content}"),
            None => title.to_string(),
        };
        let lower = text.to_lowercase();
        let tokens: HashSet<&str> = text
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        let mut mentions = Vec::new();
        for asset in assets {
            let by_ticker = tokens.contains(asset.symbol.as_str());
            let by_name = lower.contains(&asset.name.to_lowercase());
            if by_ticker || by_name {
                mentions.push(asset.symbol.clone());
            }
        }
        mentions
    }

    async fn collect_window(&self, ctx: &TickContext, window: TimeWindow) -> Result<TickOutcome> {
        let mut outcome = TickOutcome::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut articles: Vec<NewsArticle> = Vec::new();

        for source in &self.sources {
            if ctx.cancel.is_cancelled() {
                break;
            }
            outcome.api_calls += 1;
            let fetched = match source.fetch_articles(window).await {
                Ok(fetched) => fetched,
                Err(err) if is_tick_fatal(&err) => return Err(err.into()),
                Err(err) => {
                    warn!(source = source.name(), error = %err, "news fetch failed, skipping");
                    outcome.batch_errors += 1;
                    continue;
                }
            };
            for mut article in fetched {
                if !seen.insert(article.url_hash.clone()) {
                    outcome.duplicate_records += 1;
                    continue;
                }
                article.symbols_mentioned = Self::extract_mentions(
                    &article.title,
                    article.content.as_deref(),
                    &ctx.symbols,
                );
                articles.push(article);
            }
        }

        if !articles.is_empty() {
            let write_started = Instant::now();
            let mut inserted = 0;
            for batch in articles.chunks(ctx.batch_size) {
                inserted += self.repo.insert_new(batch).await?;
                outcome.db_writes += 1;
            }
            outcome.db_write_duration = write_started.elapsed();
            outcome.collected = inserted;
            // Already-present hashes from earlier ticks count as duplicates.
            outcome.duplicate_records += articles.len() as u64 - inserted;
        }
        Ok(outcome)
    }
}

#[async_trait]
impl Collector for NewsCollector {
    fn name(&self) -> &'static str {
        "news"
    }

    fn domain(&self) -> DataDomain {
        DataDomain::News
    }

    async fn collect(&self, ctx: &TickContext) -> Result<TickOutcome> {
        let window = TimeWindow::new(
            ctx.now - ChronoDuration::hours(LIVE_WINDOW_HOURS),
            ctx.now,
        );
        self.collect_window(ctx, window).await
    }

    async fn backfill(
        &self,
        ctx: &TickContext,
        range: crate::domain::ports::DateRange,
        _force: bool,
    ) -> Result<TickOutcome> {
        let window = TimeWindow::new(
            chrono::TimeZone::from_utc_datetime(
                &chrono::Utc,
                &range.start.and_hms_opt(0, 0, 0).expect("midnight is valid"),
            ),
            chrono::TimeZone::from_utc_datetime(
                &chrono::Utc,
                &range.end.and_hms_opt(0, 0, 0).expect("midnight is valid"),
            ) + ChronoDuration::days(1),
        );
        self.collect_window(ctx, window).await
    }

    fn estimate_backfill_records(&self, _symbols: usize, range: &crate::domain::ports::DateRange) -> u64 {
        // Rough: a few dozen articles per source per day.
        self.sources.len() as u64 * range.days().max(0) as u64 * 50
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::placeholder::PlaceholderManager;
    use crate::domain::errors::FetchError;
    use crate::infrastructure::adapters::url_hash;
    use crate::infrastructure::persistence::in_memory::InMemoryNewsRepository;
    use chrono::{TimeZone, Utc};
    use tokio_util::sync::CancellationToken;

    struct StubNewsSource {
        articles: Vec<NewsArticle>,
    }

    #[async_trait]
    impl NewsSource for StubNewsSource {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn fetch_articles(&self, _window: TimeWindow) -> Result<Vec<NewsArticle>, FetchError> {
            Ok(self.articles.clone())
        }
    }

    fn article(url: &str, title: &str) -> NewsArticle {
        NewsArticle {
            url_hash: url_hash(url),
            url: url.to_string(),
            title: title.to_string(),
            source: "stub".to_string(),
            published_at: Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap(),
            content: None,
            symbols_mentioned: Vec::new(),
            sentiment_score: None,
            sentiment_confidence: None,
            crypto_sentiment_score: None,
            crypto_sentiment_confidence: None,
            stock_sentiment_score: None,
            stock_sentiment_confidence: None,
            collected_at: Utc.with_ymd_and_hms(2025, 1, 1, 10, 5, 0).unwrap(),
        }
    }

    fn asset(symbol: &str, name: &str) -> Asset {
        Asset {
            symbol: symbol.to_string(),
            name: name.to_string(),
            coingecko_id: None,
            binance_symbol: None,
            category: None,
            market_cap_rank: None,
            is_active: true,
            supports_derivatives: false,
        }
    }

    fn ctx(symbols: Vec<Asset>) -> TickContext {
        TickContext {
            symbols,
            batch_size: 100,
            completeness_threshold: 50.0,
            placeholders: Arc::new(PlaceholderManager::new(vec![], 50.0)),
            cancel: CancellationToken::new(),
            now: Utc.with_ymd_and_hms(2025, 1, 1, 11, 0, 0).unwrap(),
        }
    }

    #[test]
    fn mentions_by_ticker_token_and_name() {
        let assets = vec![asset("BTC", "Bitcoin"), asset("ETH", "Ethereum"), asset("SOL", "Solana")];
        let mentions = NewsCollector::extract_mentions(
            "BTC rallies as Ethereum upgrade lands",
            Some("Analysts expect solana to follow."),
            &assets,
        );
        assert_eq!(mentions, vec!["BTC", "ETH", "SOL"]);

        // Lowercase "btc" inside a word must not match the ticker.
        let none = NewsCollector::extract_mentions("subtcutaneous readings", None, &assets[..1]);
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn cross_source_and_cross_tick_dedup() {
        let repo = Arc::new(InMemoryNewsRepository::new());
        let shared = article("https://example.com/a", "Bitcoin steady");
        let source_a = Arc::new(StubNewsSource {
            articles: vec![shared.clone(), article("https://example.com/b", "ETH news")],
        });
        let source_b = Arc::new(StubNewsSource {
            articles: vec![shared.clone()],
        });
        let collector = NewsCollector::new(vec![source_a, source_b], repo.clone());
        let context = ctx(vec![asset("BTC", "Bitcoin"), asset("ETH", "Ethereum")]);

        let first = collector.collect(&context).await.unwrap();
        assert_eq!(first.collected, 2);
        assert_eq!(first.duplicate_records, 1, "same hash from second source");

        let second = collector.collect(&context).await.unwrap();
        assert_eq!(second.collected, 0, "re-fetch inserts nothing new");
        assert_eq!(repo.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn mentions_are_stored_with_the_article() {
        let repo = Arc::new(InMemoryNewsRepository::new());
        let source = Arc::new(StubNewsSource {
            articles: vec![article("https://example.com/btc", "Bitcoin hits new level")],
        });
        let collector = NewsCollector::new(vec![source], repo.clone());
        collector
            .collect(&ctx(vec![asset("BTC", "Bitcoin")]))
            .await
            .unwrap();

        let stored = repo.get(&url_hash("https://example.com/btc")).await.unwrap();
        assert_eq!(stored.symbols_mentioned, vec!["BTC"]);
        assert!(stored.sentiment_score.is_none(), "scoring happens later");
    }
}
