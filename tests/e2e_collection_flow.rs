//! Cold-start collection flow: registry-driven work list, placeholder
//! pre-pass, fetch -> validate -> upsert, stats.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use cryptopulse::application::collectors::{CollectorRuntime, TickResult};
use cryptopulse::application::collectors::price::PriceCollector;
use cryptopulse::application::placeholder::{PlaceholderManager, today_window};
use cryptopulse::application::registry::SymbolRegistry;
use cryptopulse::config::Config;
use cryptopulse::domain::errors::FetchError;
use cryptopulse::domain::ports::PriceSource;
use cryptopulse::domain::repositories::{DataDomain, PlaceholderStore, PriceRepository};
use cryptopulse::domain::types::{Asset, PLACEHOLDER_SOURCE, PriceObservation};
use cryptopulse::infrastructure::observability::{AlertSink, Metrics};
use cryptopulse::infrastructure::persistence::in_memory::{
    InMemoryAssetRepository, InMemoryPriceRepository,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

struct BtcOnlySource;

#[async_trait]
impl PriceSource for BtcOnlySource {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn fetch_prices(&self, assets: &[Asset]) -> Result<Vec<PriceObservation>, FetchError> {
        // Only BTC has data this tick; ETH returns nothing.
        Ok(assets
            .iter()
            .filter(|a| a.symbol == "BTC")
            .map(|a| PriceObservation {
                symbol: a.symbol.clone(),
                ts: Utc::now(),
                current_price: 40_000.0,
                high_24h: Some(41_000.0),
                low_24h: Some(39_500.0),
                open_24h: Some(39_800.0),
                volume_24h: Some(1e9),
                price_change_pct_24h: None,
                market_cap: None,
                market_cap_rank: None,
                data_source: "stub".to_string(),
                data_completeness_percentage: 75.0,
            })
            .collect())
    }
}

fn asset(symbol: &str, name: &str) -> Asset {
    Asset {
        symbol: symbol.to_string(),
        name: name.to_string(),
        coingecko_id: Some(name.to_lowercase()),
        binance_symbol: None,
        category: None,
        market_cap_rank: None,
        is_active: true,
        supports_derivatives: false,
    }
}

#[tokio::test]
async fn cold_start_one_price_tick() {
    let assets = Arc::new(InMemoryAssetRepository::with_assets(vec![
        asset("BTC", "Bitcoin"),
        asset("ETH", "Ethereum"),
    ]));
    let registry = Arc::new(SymbolRegistry::new(assets));
    let prices = Arc::new(InMemoryPriceRepository::new());
    let placeholders = Arc::new(PlaceholderManager::new(vec![prices.clone()], 50.0));
    let config = Arc::new(RwLock::new(Config::from_env().expect("config")));

    let runtime = Arc::new(CollectorRuntime::new(
        Arc::new(PriceCollector::new(Arc::new(BtcOnlySource), prices.clone())),
        registry,
        placeholders.clone(),
        config,
        Metrics::new().expect("metrics"),
        AlertSink::default(),
        5,
        Duration::from_secs(300),
        CancellationToken::new(),
    ));

    runtime.start().await.expect("start");
    assert_eq!(runtime.run_tick().await, TickResult::Completed);

    // One real BTC row landed.
    let real: Vec<PriceObservation> = prices
        .all()
        .await
        .into_iter()
        .filter(|p| p.data_source != PLACEHOLDER_SOURCE)
        .collect();
    assert_eq!(real.len(), 1);
    assert_eq!(real[0].symbol, "BTC");
    assert_eq!(real[0].current_price, 40_000.0);

    // ETH exists only as zero-completeness placeholders for today.
    let eth_rows: Vec<PriceObservation> = prices
        .all()
        .await
        .into_iter()
        .filter(|p| p.symbol == "ETH")
        .collect();
    assert!(!eth_rows.is_empty(), "placeholder pre-pass must cover ETH");
    assert!(eth_rows.iter().all(|p| p.data_source == PLACEHOLDER_SOURCE));
    assert!(eth_rows.iter().all(|p| p.data_completeness_percentage == 0.0));

    // Gap detection sees ETH's empty hours but not BTC's filled one.
    let window = today_window(Utc::now());
    let gaps = placeholders
        .detect_gaps(DataDomain::Price, window)
        .await
        .expect("gaps");
    assert!(gaps.iter().any(|k| k.symbol == "ETH"));

    let stats = runtime.stats().await;
    assert_eq!(stats.total_collected, 1);
    assert_eq!(stats.invalid_records, 0);
    assert!(stats.last_success_at.is_some());
    assert!(runtime.is_ready());
}

#[tokio::test]
async fn placeholder_then_real_write_leaves_one_row() {
    let prices = Arc::new(InMemoryPriceRepository::new());
    let slot = Utc::now();

    prices
        .ensure_placeholders(&[cryptopulse::domain::types::PlaceholderKey {
            symbol: "BTC".to_string(),
            slot,
        }])
        .await
        .expect("placeholder");

    let real = PriceObservation {
        symbol: "BTC".to_string(),
        ts: slot,
        current_price: 40_000.0,
        high_24h: None,
        low_24h: None,
        open_24h: None,
        volume_24h: None,
        price_change_pct_24h: None,
        market_cap: None,
        market_cap_rank: None,
        data_source: "coingecko".to_string(),
        data_completeness_percentage: 50.0,
    };
    prices.upsert_batch(&[real]).await.expect("upsert");

    let rows = prices.all().await;
    assert_eq!(rows.len(), 1, "exactly one row for the key");
    assert_eq!(rows[0].data_source, "coingecko");

    // A later placeholder sweep must not downgrade the real row.
    prices
        .ensure_placeholders(&[cryptopulse::domain::types::PlaceholderKey {
            symbol: "BTC".to_string(),
            slot,
        }])
        .await
        .expect("sweep");
    let rows = prices.all().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].data_source, "coingecko");
    assert_eq!(rows[0].data_completeness_percentage, 50.0);
}
