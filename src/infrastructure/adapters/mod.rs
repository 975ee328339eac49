//! Source adapters, one per external provider.
//!
//! Adapters normalize provider-native payloads into domain records. They are
//! stateless apart from their rate-limit bucket and safe for concurrent use
//! by their owning collector. Retry policy lives here: `Transient` and
//! `RateLimited` responses are retried with jittered exponential backoff (up
//! to 5 attempts, `Retry-After` honored, 60 s cap); everything else is
//! terminal for the call.

pub mod alternative_me;
pub mod binance;
pub mod coingecko;
pub mod fred;
pub mod newsapi;
pub mod rss_feed;

use crate::domain::errors::{FetchError, FetchErrorKind};
use crate::infrastructure::core::rate_limiter::RateLimiter;
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::warn;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const BACKOFF_CAP_SECS: f64 = 60.0;

/// Shared request machinery for the HTTP adapters: rate limiting,
/// status classification, and the retry loop.
pub struct SourceClient {
    name: &'static str,
    client: ClientWithMiddleware,
    limiter: RateLimiter,
    headers: Vec<(&'static str, String)>,
    max_attempts: u32,
}

impl SourceClient {
    pub fn new(name: &'static str, client: ClientWithMiddleware, limiter: RateLimiter) -> Self {
        Self {
            name,
            client,
            limiter,
            headers: Vec::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_header(mut self, key: &'static str, value: String) -> Self {
        self.headers.push((key, value));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// GET `url` and decode the JSON body, applying the retry policy.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let body = self.get_text(url).await?;
        serde_json::from_str::<T>(&body).map_err(|e| {
            FetchError::new(
                self.name,
                FetchErrorKind::Malformed,
                format!("undecodable response: {e}"),
            )
        })
    }

    /// GET `url` and return the raw body (non-JSON payloads such as RSS),
    /// with the same retry policy.
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let mut attempt = 0u32;
        loop {
            self.limiter.acquire().await;

            match self.try_get(url).await {
                Ok(body) => return Ok(body),
                Err(err) if err.kind.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = backoff_delay(attempt, err.retry_after_secs);
                    warn!(
                        source = self.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying fetch"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_get(&self, url: &str) -> Result<String, FetchError> {
        let mut req = self.client.get(url);
        for (key, value) in &self.headers {
            req = req.header(*key, value);
        }

        let response = req.send().await.map_err(|e| {
            FetchError::new(self.name, FetchErrorKind::Transient, format!("request failed: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            return Err(classify_status(self.name, status, retry_after));
        }

        response.text().await.map_err(|e| {
            FetchError::new(self.name, FetchErrorKind::Transient, format!("body read failed: {e}"))
        })
    }
}

/// Map an HTTP status onto the fetch error taxonomy.
pub fn classify_status(
    source: &'static str,
    status: StatusCode,
    retry_after: Option<u64>,
) -> FetchError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::new(
            source,
            FetchErrorKind::AuthFailed,
            format!("provider rejected credentials ({status})"),
        ),
        StatusCode::NOT_FOUND => {
            FetchError::new(source, FetchErrorKind::NotFound, "resource not found")
        }
        StatusCode::TOO_MANY_REQUESTS => {
            FetchError::rate_limited(source, retry_after, "provider rate limit")
        }
        StatusCode::SERVICE_UNAVAILABLE => FetchError::new(
            source,
            FetchErrorKind::Unavailable,
            "provider unavailable (503)",
        ),
        s if s.is_server_error() => {
            FetchError::new(source, FetchErrorKind::Transient, format!("server error ({s})"))
        }
        s => FetchError::new(source, FetchErrorKind::Malformed, format!("unexpected status {s}")),
    }
}

/// Jittered exponential backoff, `Retry-After` first, capped at 60 s.
pub fn backoff_delay(attempt: u32, retry_after_secs: Option<u64>) -> Duration {
    if let Some(secs) = retry_after_secs {
        return Duration::from_secs(secs.min(BACKOFF_CAP_SECS as u64));
    }
    let base = 0.5 * 2f64.powi(attempt.min(10) as i32);
    let jitter = rand::random::<f64>() * base * 0.3;
    Duration::from_secs_f64((base + jitter).min(BACKOFF_CAP_SECS))
}

/// Stable identity hash for news deduplication.
pub fn url_hash(url: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(url.as_bytes());
    hex::encode(&digest[..16])
}
