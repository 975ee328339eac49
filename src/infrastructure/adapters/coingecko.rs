//! CoinGecko adapter: spot prices, OHLC candles, on-chain/community
//! snapshots and global market aggregates.

use crate::domain::errors::{FetchError, FetchErrorKind};
use crate::domain::ports::{DateRange, MarketSource, OhlcSource, OnchainSource, PriceSource};
use crate::domain::types::{
    Asset, ExternalSource, MarketSnapshot, OhlcBar, OnchainObservation, PriceObservation,
    Timeframe,
};
use crate::infrastructure::core::http_client_factory::build_url_with_query;
use crate::infrastructure::core::rate_limiter::RateLimiter;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::warn;

use super::SourceClient;

const SOURCE_NAME: &str = "coingecko";
const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";

pub struct CoinGeckoAdapter {
    client: SourceClient,
    base_url: String,
}

impl CoinGeckoAdapter {
    /// The public tier allows roughly 30 calls/min; the demo key raises it.
    pub fn new(http: ClientWithMiddleware, api_key: Option<String>) -> Self {
        Self::with_base_url(http, api_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(
        http: ClientWithMiddleware,
        api_key: Option<String>,
        base_url: String,
    ) -> Self {
        let limiter = RateLimiter::new(SOURCE_NAME, 0.5, 30);
        let mut client = SourceClient::new(SOURCE_NAME, http, limiter);
        if let Some(key) = api_key {
            client = client.with_header("x-cg-demo-api-key", key);
        }
        Self { client, base_url }
    }

    fn resolve_ids<'a>(&self, assets: &'a [Asset]) -> (Vec<&'a str>, HashMap<String, &'a Asset>) {
        let mut ids = Vec::new();
        let mut by_id = HashMap::new();
        for asset in assets {
            match asset.external_id(ExternalSource::CoinGecko) {
                Some(id) => {
                    ids.push(id);
                    by_id.insert(id.to_string(), asset);
                }
                None => {
                    warn!(symbol = %asset.symbol, source = SOURCE_NAME, "no external id registered, skipping");
                }
            }
        }
        (ids, by_id)
    }
}

#[derive(Debug, Deserialize)]
struct MarketsRow {
    id: String,
    current_price: Option<f64>,
    high_24h: Option<f64>,
    low_24h: Option<f64>,
    total_volume: Option<f64>,
    price_change_24h: Option<f64>,
    price_change_percentage_24h: Option<f64>,
    market_cap: Option<f64>,
    market_cap_rank: Option<u32>,
    last_updated: Option<DateTime<Utc>>,
}

#[async_trait]
impl PriceSource for CoinGeckoAdapter {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn fetch_prices(&self, assets: &[Asset]) -> Result<Vec<PriceObservation>, FetchError> {
        let (ids, by_id) = self.resolve_ids(assets);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let url = build_url_with_query(
            &format!("{}/coins/markets", self.base_url),
            &[
                ("vs_currency", "usd"),
                ("ids", ids.join(",").as_str()),
                ("per_page", "250"),
            ],
        );
        let rows: Vec<MarketsRow> = self.client.get_json(&url).await?;

        let now = Utc::now();
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(asset) = by_id.get(&row.id) else {
                continue;
            };
            let Some(current_price) = row.current_price else {
                warn!(id = %row.id, "provider returned no price, skipping");
                continue;
            };
            // 24h open is normalized from the reported absolute delta; it is
            // arithmetic over returned values, never a synthesized default.
            let open_24h = row.price_change_24h.map(|chg| current_price - chg);
            let mut obs = PriceObservation {
                symbol: asset.symbol.clone(),
                ts: row.last_updated.unwrap_or(now),
                current_price,
                high_24h: row.high_24h,
                low_24h: row.low_24h,
                open_24h,
                volume_24h: row.total_volume,
                price_change_pct_24h: row.price_change_percentage_24h,
                market_cap: row.market_cap,
                market_cap_rank: row.market_cap_rank,
                data_source: SOURCE_NAME.to_string(),
                data_completeness_percentage: 0.0,
            };
            obs.data_completeness_percentage = obs.computed_completeness();
            out.push(obs);
        }
        Ok(out)
    }
}

#[async_trait]
impl OhlcSource for CoinGeckoAdapter {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn fetch_ohlc(
        &self,
        asset: &Asset,
        timeframe: Timeframe,
        range: DateRange,
    ) -> Result<Vec<OhlcBar>, FetchError> {
        let Some(id) = asset.external_id(ExternalSource::CoinGecko) else {
            warn!(symbol = %asset.symbol, source = SOURCE_NAME, "no external id registered, skipping");
            return Ok(Vec::new());
        };

        // Provider granularity is driven by the days parameter: 1 day of
        // half-hour candles, up to 90 days of 4h candles, daily beyond.
        let days = match timeframe {
            Timeframe::H1 => 1,
            Timeframe::H4 => range.days().clamp(2, 90),
            Timeframe::D1 => range.days().clamp(91, 365),
        };
        let url = build_url_with_query(
            &format!("{}/coins/{}/ohlc", self.base_url, id),
            &[("vs_currency", "usd"), ("days", days.to_string().as_str())],
        );
        // Rows arrive as [ts_millis, open, high, low, close].
        let rows: Vec<[f64; 5]> = self.client.get_json(&url).await?;

        let mut bars = Vec::with_capacity(rows.len());
        for [ts_ms, open, high, low, close] in rows {
            let Some(ts) = DateTime::<Utc>::from_timestamp_millis(ts_ms as i64) else {
                return Err(FetchError::new(
                    SOURCE_NAME,
                    FetchErrorKind::Malformed,
                    format!("bad candle timestamp {ts_ms}"),
                ));
            };
            if ts.date_naive() < range.start || ts.date_naive() > range.end {
                continue;
            }
            bars.push(OhlcBar {
                symbol: asset.symbol.clone(),
                timeframe,
                ts,
                open,
                high,
                low,
                close,
                volume: None,
                data_source: SOURCE_NAME.to_string(),
                data_completeness_percentage: crate::domain::types::COMPLETENESS_PARTIAL,
            });
        }
        Ok(bars)
    }
}

#[derive(Debug, Deserialize)]
struct CoinDetail {
    market_data: Option<CoinMarketData>,
    community_data: Option<CommunityData>,
    developer_data: Option<DeveloperData>,
    developer_score: Option<f64>,
    community_score: Option<f64>,
    liquidity_score: Option<f64>,
    public_interest_score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CoinMarketData {
    circulating_supply: Option<f64>,
    total_supply: Option<f64>,
    max_supply: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CommunityData {
    twitter_followers: Option<i64>,
    reddit_subscribers: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct DeveloperData {
    stars: Option<i64>,
    commit_count_4_weeks: Option<i64>,
}

#[async_trait]
impl OnchainSource for CoinGeckoAdapter {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn fetch_onchain(&self, asset: &Asset) -> Result<OnchainObservation, FetchError> {
        let Some(id) = asset.external_id(ExternalSource::CoinGecko) else {
            return Err(FetchError::new(
                SOURCE_NAME,
                FetchErrorKind::NotFound,
                format!("{} has no coingecko id", asset.symbol),
            ));
        };

        let url = build_url_with_query(
            &format!("{}/coins/{}", self.base_url, id),
            &[
                ("localization", "false"),
                ("tickers", "false"),
                ("market_data", "true"),
                ("community_data", "true"),
                ("developer_data", "true"),
            ],
        );
        let detail: CoinDetail = self.client.get_json(&url).await?;

        let market = detail.market_data;
        let community = detail.community_data;
        let developer = detail.developer_data;

        let mut row = OnchainObservation {
            symbol: asset.symbol.clone(),
            date: Utc::now().date_naive(),
            circulating_supply: market.as_ref().and_then(|m| m.circulating_supply),
            total_supply: market.as_ref().and_then(|m| m.total_supply),
            max_supply: market.as_ref().and_then(|m| m.max_supply),
            twitter_followers: community.as_ref().and_then(|c| c.twitter_followers),
            reddit_subscribers: community.as_ref().and_then(|c| c.reddit_subscribers),
            github_stars: developer.as_ref().and_then(|d| d.stars),
            github_commits_4w: developer.as_ref().and_then(|d| d.commit_count_4_weeks),
            developer_score: detail.developer_score,
            community_score: detail.community_score,
            liquidity_score: detail.liquidity_score,
            public_interest_score: detail.public_interest_score,
            data_source: SOURCE_NAME.to_string(),
            ..Default::default()
        };
        let populated = row.populated_field_count();
        row.data_completeness_percentage = if populated == 0 {
            0.0
        } else {
            crate::domain::types::COMPLETENESS_PARTIAL
                + (crate::domain::types::COMPLETENESS_FULL
                    - crate::domain::types::COMPLETENESS_PARTIAL)
                    * populated as f64
                    / OnchainObservation::FIELD_COUNT as f64
        };
        Ok(row)
    }
}

#[derive(Debug, Deserialize)]
struct GlobalEnvelope {
    data: GlobalData,
}

#[derive(Debug, Deserialize)]
struct GlobalData {
    total_market_cap: Option<HashMap<String, f64>>,
    total_volume: Option<HashMap<String, f64>>,
    market_cap_percentage: Option<HashMap<String, f64>>,
    active_cryptocurrencies: Option<i64>,
    markets: Option<i64>,
}

#[async_trait]
impl MarketSource for CoinGeckoAdapter {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn fetch_global(&self) -> Result<MarketSnapshot, FetchError> {
        let url = format!("{}/global", self.base_url);
        let envelope: GlobalEnvelope = self.client.get_json(&url).await?;
        let data = envelope.data;

        let usd = |m: &Option<HashMap<String, f64>>| m.as_ref().and_then(|m| m.get("usd")).copied();
        let dominance =
            |m: &Option<HashMap<String, f64>>, k: &str| m.as_ref().and_then(|m| m.get(k)).copied();

        let snapshot = MarketSnapshot {
            ts: Utc::now(),
            total_market_cap_usd: usd(&data.total_market_cap),
            total_volume_24h_usd: usd(&data.total_volume),
            btc_dominance_pct: dominance(&data.market_cap_percentage, "btc"),
            eth_dominance_pct: dominance(&data.market_cap_percentage, "eth"),
            active_cryptocurrencies: data.active_cryptocurrencies,
            markets: data.markets,
            data_source: SOURCE_NAME.to_string(),
            data_completeness_percentage: crate::domain::types::COMPLETENESS_FULL,
        };
        Ok(snapshot)
    }
}
