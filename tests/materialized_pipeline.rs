//! Full pipeline: price rows through the technical collector and the
//! materialized updater, checking the predicted completeness and the
//! no-downgrade merge.

use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use cryptopulse::application::collectors::Collector;
use cryptopulse::application::collectors::technical::TechnicalCollector;
use cryptopulse::application::collectors::TickContext;
use cryptopulse::application::materialized::MaterializedUpdater;
use cryptopulse::application::placeholder::PlaceholderManager;
use cryptopulse::config::Config;
use cryptopulse::domain::feature_set::FeatureSet;
use cryptopulse::domain::repositories::{FeatureRepository, FeatureValue, PriceRepository};
use cryptopulse::domain::types::{Asset, PriceObservation};
use cryptopulse::infrastructure::observability::AlertSink;
use cryptopulse::infrastructure::persistence::in_memory::{
    InMemoryFeatureRepository, InMemoryMacroRepository, InMemoryMonitoringRepository,
    InMemoryOnchainRepository, InMemoryPriceRepository, InMemorySentimentRepository,
    InMemoryTechnicalRepository,
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

fn price_series(symbol: &str, hours: usize) -> Vec<PriceObservation> {
    let start = Utc.with_ymd_and_hms(2025, 3, 9, 0, 0, 0).unwrap();
    (0..hours)
        .map(|i| {
            let value = 40_000.0 + (i as f64 % 11.0) * 10.0;
            PriceObservation {
                symbol: symbol.to_string(),
                ts: start + ChronoDuration::hours(i as i64),
                current_price: value,
                high_24h: Some(value + 100.0),
                low_24h: Some(value - 100.0),
                open_24h: Some(value - 50.0),
                volume_24h: Some(1e9),
                price_change_pct_24h: Some(0.5),
                market_cap: Some(value * 1.9e7),
                market_cap_rank: Some(1),
                data_source: "coingecko".to_string(),
                data_completeness_percentage: 100.0,
            }
        })
        .collect()
}

struct Pipeline {
    prices: Arc<InMemoryPriceRepository>,
    technicals: Arc<InMemoryTechnicalRepository>,
    features: Arc<InMemoryFeatureRepository>,
    updater: MaterializedUpdater,
    technical_collector: TechnicalCollector,
}

fn pipeline() -> Pipeline {
    let prices = Arc::new(InMemoryPriceRepository::new());
    let technicals = Arc::new(InMemoryTechnicalRepository::new());
    let features = Arc::new(InMemoryFeatureRepository::new());
    let config = Arc::new(RwLock::new(Config::from_env().expect("config")));

    let updater = MaterializedUpdater::new(
        prices.clone(),
        technicals.clone(),
        Arc::new(InMemoryMacroRepository::new()),
        Arc::new(InMemoryOnchainRepository::new()),
        Arc::new(InMemorySentimentRepository::new()),
        features.clone(),
        Arc::new(InMemoryMonitoringRepository::new()),
        AlertSink::default(),
        config,
        FeatureSet::resolve("v1").expect("v1"),
    );
    let technical_collector = TechnicalCollector::new(prices.clone(), technicals.clone());
    Pipeline {
        prices,
        technicals,
        features,
        updater,
        technical_collector,
    }
}

fn ctx(now: chrono::DateTime<Utc>) -> TickContext {
    TickContext {
        symbols: vec![Asset {
            symbol: "BTC".to_string(),
            name: "Bitcoin".to_string(),
            coingecko_id: Some("bitcoin".to_string()),
            binance_symbol: None,
            category: None,
            market_cap_rank: None,
            is_active: true,
            supports_derivatives: false,
        }],
        batch_size: 500,
        completeness_threshold: 50.0,
        placeholders: Arc::new(PlaceholderManager::new(vec![], 50.0)),
        cancel: CancellationToken::new(),
        now,
    }
}

#[tokio::test]
async fn feature_rows_match_predicted_completeness() {
    let p = pipeline();
    let series = price_series("BTC", 30);
    let last_ts = series.last().unwrap().ts;
    p.prices.upsert_batch(&series).await.unwrap();

    // Technical pass first so the join has same-day indicator rows.
    p.technical_collector
        .collect(&ctx(last_ts + ChronoDuration::minutes(1)))
        .await
        .unwrap();
    assert_eq!(p.technicals.all().await.len(), 1);

    p.updater.run_online().await.unwrap();

    // The hour of the technical row carries price + short-window indicator
    // columns; the set is versioned, so the expected count is exact.
    let set = FeatureSet::resolve("v1").unwrap();
    let technical_row = &p.technicals.all().await[0];
    let row = p
        .features
        .get(
            "BTC",
            technical_row.ts.date_naive(),
            chrono::Timelike::hour(&technical_row.ts) as u8,
        )
        .await
        .unwrap()
        .expect("feature row for the technical hour");

    let feature_non_null = row
        .values
        .keys()
        .filter(|c| set.contains(c))
        .count();
    assert_eq!(row.completeness(), Some(set.completeness(feature_non_null)));

    // 8 price columns plus the populated technical columns (30 points warm
    // up sma_20, ema_12, ema_26, rsi_14, bb_*, atr_14 but not sma_50/200 or
    // MACD).
    assert_eq!(feature_non_null, 8 + 8);
}

#[tokio::test]
async fn merge_never_downgrades_completeness() {
    let p = pipeline();
    let series = price_series("BTC", 30);
    let last = series.last().unwrap().clone();
    p.prices.upsert_batch(&series).await.unwrap();
    p.technical_collector
        .collect(&ctx(last.ts + ChronoDuration::minutes(1)))
        .await
        .unwrap();
    p.updater.run_online().await.unwrap();

    let date = last.ts.date_naive();
    let hour = chrono::Timelike::hour(&last.ts) as u8;
    let rich = p.features.get("BTC", date, hour).await.unwrap().unwrap();
    let rich_completeness = rich.completeness().unwrap();

    // Replay the same window through an updater that cannot see the
    // technical table (a sparser concurrent writer): the richer row must
    // survive the completeness gate.
    let sparse_updater = MaterializedUpdater::new(
        p.prices.clone(),
        Arc::new(InMemoryTechnicalRepository::new()),
        Arc::new(InMemoryMacroRepository::new()),
        Arc::new(InMemoryOnchainRepository::new()),
        Arc::new(InMemorySentimentRepository::new()),
        p.features.clone(),
        Arc::new(InMemoryMonitoringRepository::new()),
        AlertSink::default(),
        Arc::new(RwLock::new(Config::from_env().expect("config"))),
        FeatureSet::resolve("v1").expect("v1"),
    );
    let range = cryptopulse::domain::ports::DateRange::new(date, date);
    sparse_updater.run_backfill(range, true).await.unwrap();

    let after = p.features.get("BTC", date, hour).await.unwrap().unwrap();
    assert!(
        after.completeness().unwrap() >= rich_completeness,
        "completeness must be monotone: {:?} -> {:?}",
        rich_completeness,
        after.completeness()
    );
    assert_eq!(
        after.values.get("rsi_14"),
        rich.values.get("rsi_14"),
        "technical columns survive the sparser rewrite"
    );
}

#[tokio::test]
async fn hwm_restart_resumes_from_persisted_state() {
    let prices = Arc::new(InMemoryPriceRepository::new());
    let monitoring = Arc::new(InMemoryMonitoringRepository::new());
    let features = Arc::new(InMemoryFeatureRepository::new());
    let config = Arc::new(RwLock::new(Config::from_env().expect("config")));

    let make_updater = |features: Arc<InMemoryFeatureRepository>,
                        monitoring: Arc<InMemoryMonitoringRepository>,
                        config: cryptopulse::config::ConfigHandle| {
        MaterializedUpdater::new(
            prices.clone(),
            Arc::new(InMemoryTechnicalRepository::new()),
            Arc::new(InMemoryMacroRepository::new()),
            Arc::new(InMemoryOnchainRepository::new()),
            Arc::new(InMemorySentimentRepository::new()),
            features,
            monitoring,
            AlertSink::default(),
            config,
            FeatureSet::resolve("v1").expect("v1"),
        )
    };

    prices.upsert_batch(&price_series("BTC", 5)).await.unwrap();
    let first = make_updater(features.clone(), monitoring.clone(), config.clone());
    first.run_online().await.unwrap();
    let hwm = first.high_water_mark().await.unwrap();

    // "Restart": a fresh updater over the same monitoring store picks up
    // the persisted mark and reprocesses nothing.
    let second = make_updater(features.clone(), monitoring, config);
    let outcome = second.run_online().await.unwrap();
    assert_eq!(outcome.collected, 0);
    assert_eq!(second.high_water_mark().await, Some(hwm));
}

#[tokio::test]
async fn feature_values_are_never_fabricated() {
    let p = pipeline();
    // Bare-minimum price rows: no optional fields at all.
    let sparse = PriceObservation {
        symbol: "BTC".to_string(),
        ts: Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap(),
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
    p.prices.upsert_batch(&[sparse]).await.unwrap();
    p.updater.run_online().await.unwrap();

    let row = p
        .features
        .get("BTC", NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(), 9)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        row.values.get("current_price"),
        Some(&FeatureValue::Float(40_000.0))
    );
    for absent in ["high_24h", "volume_24h", "vix", "rsi_14", "avg_sentiment"] {
        assert!(
            !row.values.contains_key(absent),
            "{absent} must be absent, not defaulted"
        );
    }
}
