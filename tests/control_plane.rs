//! Control-plane HTTP surface: endpoint shapes, lifecycle effects, and
//! error mapping, driven through the router without a network listener.

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use cryptopulse::application::collectors::{Collector, CollectorRuntime, TickContext, TickOutcome};
use cryptopulse::application::materialized::MaterializedUpdater;
use cryptopulse::application::placeholder::PlaceholderManager;
use cryptopulse::application::registry::SymbolRegistry;
use cryptopulse::application::scheduler::Scheduler;
use cryptopulse::config::Config;
use cryptopulse::domain::feature_set::FeatureSet;
use cryptopulse::domain::repositories::DataDomain;
use cryptopulse::infrastructure::observability::{AlertSink, LogBuffer, Metrics};
use cryptopulse::infrastructure::persistence::in_memory::{
    InMemoryAssetRepository, InMemoryFeatureRepository, InMemoryMacroRepository,
    InMemoryMonitoringRepository, InMemoryOnchainRepository, InMemoryPriceRepository,
    InMemorySentimentRepository, InMemoryTechnicalRepository,
};
use cryptopulse::interfaces::http::{AppState, router};
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

struct NoopCollector;

#[async_trait]
impl Collector for NoopCollector {
    fn name(&self) -> &'static str {
        "price"
    }

    fn domain(&self) -> DataDomain {
        DataDomain::Price
    }

    async fn collect(&self, _ctx: &TickContext) -> Result<TickOutcome> {
        Ok(TickOutcome {
            collected: 1,
            ..Default::default()
        })
    }
}

fn build_router() -> axum::Router {
    let cancel = CancellationToken::new();
    let registry = Arc::new(SymbolRegistry::new(Arc::new(InMemoryAssetRepository::new())));
    let prices = Arc::new(InMemoryPriceRepository::new());
    let placeholders = Arc::new(PlaceholderManager::new(vec![prices.clone()], 50.0));
    let config: cryptopulse::config::ConfigHandle =
        Arc::new(RwLock::new(Config::from_env().expect("config")));
    let metrics = Metrics::new().expect("metrics");
    let alerts = AlertSink::default();

    let runtime = Arc::new(CollectorRuntime::new(
        Arc::new(NoopCollector),
        registry.clone(),
        placeholders.clone(),
        config.clone(),
        metrics.clone(),
        alerts.clone(),
        5,
        Duration::from_secs(300),
        cancel.clone(),
    ));

    let updater = Arc::new(MaterializedUpdater::new(
        prices,
        Arc::new(InMemoryTechnicalRepository::new()),
        Arc::new(InMemoryMacroRepository::new()),
        Arc::new(InMemoryOnchainRepository::new()),
        Arc::new(InMemorySentimentRepository::new()),
        Arc::new(InMemoryFeatureRepository::new()),
        Arc::new(InMemoryMonitoringRepository::new()),
        alerts.clone(),
        config.clone(),
        FeatureSet::resolve("v1").expect("v1"),
    ));

    let mut scheduler = Scheduler::new(cancel);
    scheduler.register(runtime, Duration::from_secs(300), true);

    let state = Arc::new(AppState::new(
        Arc::new(scheduler),
        updater,
        placeholders,
        config,
        metrics,
        alerts,
        LogBuffer::new(100),
    ));
    router(state)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn health_and_ready_lifecycle() {
    let app = build_router();

    let response = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");

    // No successful tick yet: not ready.
    let response = app
        .clone()
        .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    // Start the collector and trigger a tick.
    let response = app
        .clone()
        .oneshot(
            Request::post("/start?collector=price")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["state"], "running");

    let response = app
        .clone()
        .oneshot(
            Request::post("/collect?collector=price")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "started");
    assert!(body["task_id"].is_string());

    // The spawned tick lands shortly after.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let response = app
        .clone()
        .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn illegal_transitions_map_to_conflict() {
    let app = build_router();

    // Stop before start: 409, no crash, no state change.
    let response = app
        .clone()
        .oneshot(
            Request::post("/stop?collector=price")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Unknown component: 404.
    let response = app
        .clone()
        .oneshot(
            Request::post("/start?collector=bogus")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn status_metrics_and_breaker_endpoints_render() {
    let app = build_router();

    let response = app
        .clone()
        .oneshot(Request::get("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["components"].is_array());
    assert!(body["updater"]["phase"].is_string());

    let response = app
        .clone()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(
            Request::get("/circuit-breaker-status?collector=price")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["state"], "closed");
    assert_eq!(body["failures"], 0);
}

#[tokio::test]
async fn validate_data_is_pure() {
    let app = build_router();

    let payload = serde_json::json!({
        "domain": "ohlc",
        "records": [
            {
                "symbol": "BTC", "timeframe": "H1",
                "ts": "2025-01-01T00:00:00Z",
                "open": 100.0, "high": 110.0, "low": 95.0, "close": 105.0,
                "volume": 10.0, "data_source": "test",
                "data_completeness_percentage": 100.0
            },
            {
                "symbol": "BTC", "timeframe": "H1",
                "ts": "2025-01-01T01:00:00Z",
                "open": 100.0, "high": 90.0, "low": 95.0, "close": 105.0,
                "volume": 10.0, "data_source": "test",
                "data_completeness_percentage": 100.0
            }
        ]
    });
    let response = app
        .clone()
        .oneshot(
            Request::post("/validate-data")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["valid"], false);
    assert_eq!(body["errors"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn config_patch_round_trip() {
    let app = build_router();

    let response = app
        .clone()
        .oneshot(Request::get("/config").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let before = body_json(response).await;
    assert_eq!(before["batch_size"], 500);

    let response = app
        .clone()
        .oneshot(
            Request::put("/config")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"batch_size": 250}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(Request::get("/config").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let after = body_json(response).await;
    assert_eq!(after["batch_size"], 250);

    // Unknown fields are rejected with 400.
    let response = app
        .clone()
        .oneshot(
            Request::put("/config")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"db": {"host": "x"}}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn alert_endpoint_returns_an_id() {
    let app = build_router();
    let response = app
        .oneshot(
            Request::post("/alert")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"level": "warning", "message": "test alert", "labels": {"source": "test"}}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_json(response).await["id"].is_string());
}
