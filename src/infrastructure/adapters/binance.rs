//! Binance futures adapter: funding rate and open interest for assets with a
//! supported perpetual market. Public endpoints only, no signing.

use crate::domain::errors::{FetchError, FetchErrorKind};
use crate::domain::ports::DerivativesSource;
use crate::domain::types::{Asset, DerivativesObservation, ExternalSource};
use crate::infrastructure::core::http_client_factory::build_url_with_query;
use crate::infrastructure::core::rate_limiter::RateLimiter;
use async_trait::async_trait;
use chrono::Utc;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use tracing::{debug, warn};

use super::SourceClient;

const SOURCE_NAME: &str = "binance";
const DEFAULT_BASE_URL: &str = "https://fapi.binance.com";

pub struct BinanceDerivativesAdapter {
    client: SourceClient,
    base_url: String,
}

impl BinanceDerivativesAdapter {
    pub fn new(http: ClientWithMiddleware) -> Self {
        Self::with_base_url(http, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(http: ClientWithMiddleware, base_url: String) -> Self {
        let limiter = RateLimiter::new(SOURCE_NAME, 5.0, 300);
        Self {
            client: SourceClient::new(SOURCE_NAME, http, limiter),
            base_url,
        }
    }
}

// Numeric fields arrive as strings on this API.
#[derive(Debug, Deserialize)]
struct PremiumIndex {
    #[serde(rename = "markPrice")]
    mark_price: Option<String>,
    #[serde(rename = "indexPrice")]
    index_price: Option<String>,
    #[serde(rename = "lastFundingRate")]
    last_funding_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenInterest {
    #[serde(rename = "openInterest")]
    open_interest: Option<String>,
}

fn parse_numeric(field: &Option<String>) -> Option<f64> {
    field.as_deref().and_then(|s| s.parse::<f64>().ok())
}

#[async_trait]
impl DerivativesSource for BinanceDerivativesAdapter {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn fetch_derivatives(
        &self,
        asset: &Asset,
    ) -> Result<Option<DerivativesObservation>, FetchError> {
        let Some(pair) = asset.external_id(ExternalSource::Binance) else {
            debug!(symbol = %asset.symbol, "no binance pair registered, skipping");
            return Ok(None);
        };

        let premium_url = build_url_with_query(
            &format!("{}/fapi/v1/premiumIndex", self.base_url),
            &[("symbol", pair)],
        );
        let premium: PremiumIndex = match self.client.get_json(&premium_url).await {
            Ok(p) => p,
            // An unlisted pair is not an error for an optional domain.
            Err(e) if e.kind == FetchErrorKind::NotFound => {
                debug!(symbol = %asset.symbol, pair, "no perpetual market, skipping");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let oi_url = build_url_with_query(
            &format!("{}/fapi/v1/openInterest", self.base_url),
            &[("symbol", pair)],
        );
        let open_interest = match self.client.get_json::<OpenInterest>(&oi_url).await {
            Ok(oi) => parse_numeric(&oi.open_interest),
            Err(e) if e.kind == FetchErrorKind::NotFound => None,
            Err(e) => {
                // Funding data alone is still worth a row.
                warn!(symbol = %asset.symbol, error = %e, "open interest fetch failed");
                None
            }
        };

        let mut row = DerivativesObservation {
            symbol: asset.symbol.clone(),
            ts: Utc::now(),
            funding_rate: parse_numeric(&premium.last_funding_rate),
            open_interest,
            mark_price: parse_numeric(&premium.mark_price),
            index_price: parse_numeric(&premium.index_price),
            data_source: SOURCE_NAME.to_string(),
            data_completeness_percentage: 0.0,
        };
        let fields = [row.funding_rate, row.open_interest, row.mark_price, row.index_price];
        let filled = fields.iter().filter(|f| f.is_some()).count();
        if filled == 0 {
            return Ok(None);
        }
        row.data_completeness_percentage = crate::domain::types::COMPLETENESS_PARTIAL
            + (crate::domain::types::COMPLETENESS_FULL - crate::domain::types::COMPLETENESS_PARTIAL)
                * filled as f64
                / fields.len() as f64;
        Ok(Some(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_strings_parse() {
        assert_eq!(parse_numeric(&Some("0.0001".to_string())), Some(0.0001));
        assert_eq!(parse_numeric(&Some("bogus".to_string())), None);
        assert_eq!(parse_numeric(&None), None);
    }
}
