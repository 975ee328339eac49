//! NewsAPI adapter: keyword search over crypto news.

use crate::domain::errors::{FetchError, FetchErrorKind};
use crate::domain::ports::NewsSource;
use crate::domain::types::{NewsArticle, TimeWindow};
use crate::infrastructure::core::http_client_factory::build_url_with_query;
use crate::infrastructure::core::rate_limiter::RateLimiter;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;

use super::{SourceClient, url_hash};

const SOURCE_NAME: &str = "newsapi";
const DEFAULT_BASE_URL: &str = "https://newsapi.org/v2";
const QUERY: &str = "cryptocurrency OR bitcoin OR ethereum";

pub struct NewsApiAdapter {
    client: SourceClient,
    base_url: String,
}

impl NewsApiAdapter {
    pub fn new(http: ClientWithMiddleware, api_key: String) -> Self {
        Self::with_base_url(http, api_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(http: ClientWithMiddleware, api_key: String, base_url: String) -> Self {
        // Free tier: 100 requests/day. The cadence keeps usage far lower;
        // the bucket just prevents a runaway backfill from burning the quota.
        let limiter = RateLimiter::new(SOURCE_NAME, 0.2, 5);
        let client =
            SourceClient::new(SOURCE_NAME, http, limiter).with_header("X-Api-Key", api_key);
        Self { client, base_url }
    }
}

#[derive(Debug, Deserialize)]
struct EverythingResponse {
    status: String,
    articles: Option<Vec<ApiArticle>>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiArticle {
    source: ApiSource,
    title: Option<String>,
    description: Option<String>,
    content: Option<String>,
    url: String,
    #[serde(rename = "publishedAt")]
    published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ApiSource {
    name: Option<String>,
}

#[async_trait]
impl NewsSource for NewsApiAdapter {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn fetch_articles(&self, window: TimeWindow) -> Result<Vec<NewsArticle>, FetchError> {
        let url = build_url_with_query(
            &format!("{}/everything", self.base_url),
            &[
                ("q", QUERY),
                ("language", "en"),
                ("sortBy", "publishedAt"),
                ("pageSize", "100"),
                (
                    "from",
                    window.start.to_rfc3339_opts(SecondsFormat::Secs, true).as_str(),
                ),
                (
                    "to",
                    window.end.to_rfc3339_opts(SecondsFormat::Secs, true).as_str(),
                ),
            ],
        );
        let response: EverythingResponse = self.client.get_json(&url).await?;

        if response.status != "ok" {
            return Err(FetchError::new(
                SOURCE_NAME,
                FetchErrorKind::Malformed,
                response
                    .message
                    .unwrap_or_else(|| "provider reported an error".to_string()),
            ));
        }

        let now = Utc::now();
        let articles = response
            .articles
            .unwrap_or_default()
            .into_iter()
            .filter_map(|a| {
                let title = a.title?;
                let published_at = a.published_at?;
                let content = match (a.content, a.description) {
                    (Some(c), _) => Some(c),
                    (None, d) => d,
                };
                Some(NewsArticle {
                    url_hash: url_hash(&a.url),
                    url: a.url,
                    title,
                    source: a.source.name.unwrap_or_else(|| SOURCE_NAME.to_string()),
                    published_at,
                    content,
                    symbols_mentioned: Vec::new(),
                    sentiment_score: None,
                    sentiment_confidence: None,
                    crypto_sentiment_score: None,
                    crypto_sentiment_confidence: None,
                    stock_sentiment_score: None,
                    stock_sentiment_confidence: None,
                    collected_at: now,
                })
            })
            .collect();
        Ok(articles)
    }
}
