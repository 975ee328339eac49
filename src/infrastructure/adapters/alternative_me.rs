//! alternative.me Crypto Fear & Greed index, the social input to the
//! sentiment collector.

use crate::domain::errors::{FetchError, FetchErrorKind};
use crate::domain::ports::{DateRange, SocialIndexSource};
use crate::infrastructure::core::http_client_factory::build_url_with_query;
use crate::infrastructure::core::rate_limiter::RateLimiter;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;

use super::SourceClient;

const SOURCE_NAME: &str = "alternative_me";
const DEFAULT_BASE_URL: &str = "https://api.alternative.me";

pub struct FearGreedAdapter {
    client: SourceClient,
    base_url: String,
}

impl FearGreedAdapter {
    pub fn new(http: ClientWithMiddleware) -> Self {
        Self::with_base_url(http, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(http: ClientWithMiddleware, base_url: String) -> Self {
        let limiter = RateLimiter::new(SOURCE_NAME, 0.5, 20);
        Self {
            client: SourceClient::new(SOURCE_NAME, http, limiter),
            base_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FngResponse {
    data: Vec<FngReading>,
}

#[derive(Debug, Deserialize)]
struct FngReading {
    value: String,
    timestamp: String,
}

#[async_trait]
impl SocialIndexSource for FearGreedAdapter {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn fetch_index(&self, range: DateRange) -> Result<Vec<(NaiveDate, f64)>, FetchError> {
        let limit = range.days().max(1).to_string();
        let url = build_url_with_query(
            &format!("{}/fng/", self.base_url),
            &[("limit", limit.as_str()), ("format", "json")],
        );
        let response: FngResponse = self.client.get_json(&url).await?;

        let mut out = Vec::with_capacity(response.data.len());
        for reading in response.data {
            let value: f64 = reading.value.parse().map_err(|_| {
                FetchError::new(
                    SOURCE_NAME,
                    FetchErrorKind::Malformed,
                    format!("non-numeric index value {:?}", reading.value),
                )
            })?;
            let secs: i64 = reading.timestamp.parse().map_err(|_| {
                FetchError::new(
                    SOURCE_NAME,
                    FetchErrorKind::Malformed,
                    format!("non-numeric timestamp {:?}", reading.timestamp),
                )
            })?;
            let Some(date) = DateTime::from_timestamp(secs, 0).map(|d| d.date_naive()) else {
                continue;
            };
            if date >= range.start && date <= range.end {
                out.push((date, value));
            }
        }
        out.sort_by_key(|(date, _)| *date);
        Ok(out)
    }
}
