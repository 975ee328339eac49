//! FRED (Federal Reserve Economic Data) adapter for macro series.

use crate::domain::errors::FetchError;
use crate::domain::ports::{DateRange, MacroSource};
use crate::domain::types::MacroIndicator;
use crate::infrastructure::core::http_client_factory::build_url_with_query;
use crate::infrastructure::core::rate_limiter::RateLimiter;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use tracing::debug;

use super::SourceClient;

const SOURCE_NAME: &str = "fred";
const DEFAULT_BASE_URL: &str = "https://api.stlouisfed.org/fred";

pub struct FredAdapter {
    client: SourceClient,
    base_url: String,
    api_key: String,
}

impl FredAdapter {
    pub fn new(http: ClientWithMiddleware, api_key: String) -> Self {
        Self::with_base_url(http, api_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(http: ClientWithMiddleware, api_key: String, base_url: String) -> Self {
        // FRED allows 120 req/min; stay well under it.
        let limiter = RateLimiter::new(SOURCE_NAME, 1.0, 60);
        Self {
            client: SourceClient::new(SOURCE_NAME, http, limiter),
            base_url,
            api_key,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ObservationsResponse {
    observations: Vec<Observation>,
}

#[derive(Debug, Deserialize)]
struct Observation {
    date: NaiveDate,
    value: String,
}

#[async_trait]
impl MacroSource for FredAdapter {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn fetch_series(
        &self,
        series_id: &str,
        range: DateRange,
    ) -> Result<Vec<MacroIndicator>, FetchError> {
        let url = build_url_with_query(
            &format!("{}/series/observations", self.base_url),
            &[
                ("series_id", series_id),
                ("api_key", self.api_key.as_str()),
                ("file_type", "json"),
                ("observation_start", range.start.to_string().as_str()),
                ("observation_end", range.end.to_string().as_str()),
            ],
        );
        let response: ObservationsResponse = self.client.get_json(&url).await?;

        let mut out = Vec::with_capacity(response.observations.len());
        for obs in response.observations {
            // FRED encodes "no reading" as ".": weekends, holidays, series
            // gaps. Those days simply get no row.
            let Ok(value) = obs.value.parse::<f64>() else {
                debug!(series = series_id, date = %obs.date, "unpublished observation, skipping");
                continue;
            };
            out.push(MacroIndicator {
                series_id: series_id.to_string(),
                date: obs.date,
                value,
                frequency: None,
                data_source: SOURCE_NAME.to_string(),
            });
        }
        Ok(out)
    }
}
