//! RSS feed adapter. Ingested alongside NewsAPI; the collector's cadence
//! drives polling, and cross-source deduplication happens on `url_hash`.

use crate::domain::errors::{FetchError, FetchErrorKind};
use crate::domain::ports::NewsSource;
use crate::domain::types::{NewsArticle, TimeWindow};
use crate::infrastructure::core::rate_limiter::RateLimiter;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest_middleware::ClientWithMiddleware;
use rss::Channel;
use std::io::Cursor;
use tracing::{debug, warn};

use super::{SourceClient, url_hash};

const SOURCE_NAME: &str = "rss";

pub struct RssNewsAdapter {
    client: SourceClient,
    feed_urls: Vec<String>,
}

impl RssNewsAdapter {
    pub fn new(http: ClientWithMiddleware, feed_urls: Vec<String>) -> Self {
        let limiter = RateLimiter::new(SOURCE_NAME, 1.0, 30);
        Self {
            client: SourceClient::new(SOURCE_NAME, http, limiter),
            feed_urls,
        }
    }

    fn parse_channel(&self, body: &str, window: TimeWindow, out: &mut Vec<NewsArticle>) {
        let channel = match Channel::read_from(Cursor::new(body.as_bytes())) {
            Ok(c) => c,
            Err(e) => {
                warn!(source = SOURCE_NAME, error = %e, "unparseable feed, skipping");
                return;
            }
        };

        let feed_title = channel.title().to_string();
        let now = Utc::now();
        for item in channel.items() {
            let Some(link) = item.link() else {
                // No link means no stable identity; the item cannot be
                // deduplicated, so it is dropped.
                debug!(feed = %feed_title, "item without link, skipping");
                continue;
            };
            let Some(title) = item.title() else {
                continue;
            };
            // RSS dates are RFC 2822.
            let Some(published_at) = item
                .pub_date()
                .and_then(|d| DateTime::parse_from_rfc2822(d).ok())
                .map(|d| d.with_timezone(&Utc))
            else {
                continue;
            };
            if !window.contains(published_at) {
                continue;
            }

            out.push(NewsArticle {
                url_hash: url_hash(link),
                url: link.to_string(),
                title: title.to_string(),
                source: feed_title.clone(),
                published_at,
                content: item.description().map(|d| d.to_string()),
                symbols_mentioned: Vec::new(),
                sentiment_score: None,
                sentiment_confidence: None,
                crypto_sentiment_score: None,
                crypto_sentiment_confidence: None,
                stock_sentiment_score: None,
                stock_sentiment_confidence: None,
                collected_at: now,
            });
        }
    }
}

#[async_trait]
impl NewsSource for RssNewsAdapter {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn fetch_articles(&self, window: TimeWindow) -> Result<Vec<NewsArticle>, FetchError> {
        let mut out = Vec::new();
        let mut last_err: Option<FetchError> = None;

        for feed_url in &self.feed_urls {
            match self.client.get_text(feed_url).await {
                Ok(body) => self.parse_channel(&body, window, &mut out),
                Err(e) => {
                    warn!(source = SOURCE_NAME, feed = %feed_url, error = %e, "feed fetch failed");
                    last_err = Some(e);
                }
            }
        }

        // Partial success wins; only fail the call when every feed failed.
        if out.is_empty()
            && let Some(err) = last_err
        {
            return Err(err);
        }
        if out.is_empty() && self.feed_urls.is_empty() {
            return Err(FetchError::new(
                SOURCE_NAME,
                FetchErrorKind::Unavailable,
                "no feeds configured",
            ));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::core::http_client_factory::HttpClientFactory;
    use chrono::TimeZone;

    fn adapter() -> RssNewsAdapter {
        RssNewsAdapter::new(HttpClientFactory::create_client(), vec![])
    }

    const FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
<title>Crypto Wire</title>
<item>
  <title>Bitcoin surges past resistance</title>
  <link>https://example.com/btc-surge</link>
  <description>BTC rallies.</description>
  <pubDate>Wed, 01 Jan 2025 12:30:00 GMT</pubDate>
</item>
<item>
  <title>Stale item outside the window</title>
  <link>https://example.com/stale</link>
  <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
</item>
<item>
  <title>No link item</title>
  <pubDate>Wed, 01 Jan 2025 13:00:00 GMT</pubDate>
</item>
</channel></rss>"#;

    #[test]
    fn parses_items_within_window_and_skips_the_rest() {
        let adapter = adapter();
        let window = TimeWindow::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap(),
        );
        let mut out = Vec::new();
        adapter.parse_channel(FEED, window, &mut out);

        assert_eq!(out.len(), 1);
        let article = &out[0];
        assert_eq!(article.title, "Bitcoin surges past resistance");
        assert_eq!(article.source, "Crypto Wire");
        assert_eq!(article.url_hash, url_hash("https://example.com/btc-surge"));
        assert!(article.sentiment_score.is_none());
    }
}
