//! Control-plane HTTP API.
//!
//! The only way to observe or drive the core. Collector-scoped operations
//! take `?collector=<name>` (or a JSON field); without it, read endpoints
//! return the aggregate view and lifecycle endpoints apply to every
//! component. State-changing endpoints: /start /stop /restart /collect
//! /backfill; everything else is idempotent.

use crate::application::collectors::{BackfillRequest, CollectorRuntime, LifecycleState};
use crate::application::materialized::MaterializedUpdater;
use crate::application::placeholder::PlaceholderManager;
use crate::application::scheduler::Scheduler;
use crate::config::ConfigHandle;
use crate::domain::errors::ControlError;
use crate::domain::types::{OhlcBar, PriceObservation};
use crate::domain::validation::RecordValidator;
use crate::infrastructure::observability::{AlertSink, LogBuffer, Metrics};
use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub updater: Arc<MaterializedUpdater>,
    pub placeholders: Arc<PlaceholderManager>,
    pub config: ConfigHandle,
    pub metrics: Metrics,
    pub alerts: AlertSink,
    pub logs: LogBuffer,
    pub started_at: Instant,
    system: Mutex<System>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scheduler: Arc<Scheduler>,
        updater: Arc<MaterializedUpdater>,
        placeholders: Arc<PlaceholderManager>,
        config: ConfigHandle,
        metrics: Metrics,
        alerts: AlertSink,
        logs: LogBuffer,
    ) -> Self {
        Self {
            scheduler,
            updater,
            placeholders,
            config,
            metrics,
            alerts,
            logs,
            started_at: Instant::now(),
            system: Mutex::new(System::new()),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .route("/collect", post(collect))
        .route("/backfill", post(backfill))
        .route("/data-quality", get(data_quality))
        .route("/performance", get(performance))
        .route("/alert", post(alert))
        .route("/validate-data", post(validate_data))
        .route("/circuit-breaker-status", get(circuit_breaker_status))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/restart", post(restart))
        .route("/config", get(get_config))
        .route("/config", put(put_config))
        .route("/logs", get(logs))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default)]
struct CollectorQuery {
    collector: Option<String>,
}

fn control_error(err: ControlError) -> Response {
    let status = match &err {
        ControlError::IllegalState { .. } => StatusCode::CONFLICT,
        ControlError::UnknownComponent(_) => StatusCode::NOT_FOUND,
    };
    (status, axum::Json(json!({"error": err.to_string()}))).into_response()
}

fn find_runtime(state: &AppState, name: &str) -> Result<Arc<CollectorRuntime>, ControlError> {
    state
        .scheduler
        .find(name)
        .ok_or_else(|| ControlError::UnknownComponent(name.to_string()))
}

// ---------------------------------------------------------------------------
// Observation endpoints
// ---------------------------------------------------------------------------

async fn health(State(state): State<Arc<AppState>>) -> Response {
    let runtimes = state.scheduler.runtimes();
    let any_alive = runtimes.is_empty()
        || futures::future::join_all(runtimes.iter().map(|r| r.state()))
            .await
            .iter()
            .any(|s| !matches!(s, LifecycleState::Stopped));
    if any_alive {
        axum::Json(json!({"status": "ok"})).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(json!({"status": "stopped"})),
        )
            .into_response()
    }
}

async fn ready(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CollectorQuery>,
) -> Response {
    let ready = match &query.collector {
        Some(name) => match find_runtime(&state, name) {
            Ok(runtime) => runtime.is_ready(),
            Err(err) => return control_error(err),
        },
        None => state.scheduler.runtimes().iter().any(|r| r.is_ready()),
    };
    if ready {
        StatusCode::OK.into_response()
    } else {
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    }
}

async fn status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CollectorQuery>,
) -> Response {
    if let Some(name) = &query.collector {
        return match find_runtime(&state, name) {
            Ok(runtime) => {
                let mut status = runtime.status_json().await;
                if name == "materialized"
                    && let Some(object) = status.as_object_mut()
                {
                    object.insert("phase".to_string(), json!(state.updater.phase().await));
                    object.insert("degraded".to_string(), json!(state.updater.is_degraded()));
                    object.insert(
                        "high_water_mark".to_string(),
                        json!(state.updater.high_water_mark().await),
                    );
                }
                axum::Json(status).into_response()
            }
            Err(err) => control_error(err),
        };
    }

    let mut components = Vec::new();
    for runtime in state.scheduler.runtimes() {
        components.push(runtime.status_json().await);
    }
    let completeness = state
        .placeholders
        .completeness_summary()
        .await
        .unwrap_or_default();
    axum::Json(json!({
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "components": components,
        "completeness": completeness,
        "updater": {
            "phase": state.updater.phase().await,
            "degraded": state.updater.is_degraded(),
            "high_water_mark": state.updater.high_water_mark().await,
        },
    }))
    .into_response()
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    ([("content-type", "text/plain; version=0.0.4")], state.metrics.render()).into_response()
}

async fn data_quality(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CollectorQuery>,
) -> Response {
    if let Some(name) = &query.collector {
        return match find_runtime(&state, name) {
            Ok(runtime) => axum::Json(runtime.data_quality_json().await).into_response(),
            Err(err) => control_error(err),
        };
    }

    let mut total = 0u64;
    let mut valid = 0u64;
    let mut invalid = 0u64;
    let mut duplicates = 0u64;
    let mut errors: Vec<serde_json::Value> = Vec::new();
    for runtime in state.scheduler.runtimes() {
        let quality = runtime.data_quality_json().await;
        total += quality["total_records"].as_u64().unwrap_or(0);
        valid += quality["valid_records"].as_u64().unwrap_or(0);
        invalid += quality["invalid_records"].as_u64().unwrap_or(0);
        duplicates += quality["duplicate_records"].as_u64().unwrap_or(0);
        if let Some(list) = quality["validation_errors"].as_array() {
            errors.extend(list.iter().cloned());
        }
    }
    let score = if total == 0 {
        100.0
    } else {
        100.0 * valid as f64 / total as f64
    };
    axum::Json(json!({
        "total_records": total,
        "valid_records": valid,
        "invalid_records": invalid,
        "duplicate_records": duplicates,
        "validation_errors": errors,
        "data_quality_score": score,
    }))
    .into_response()
}

async fn performance(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CollectorQuery>,
) -> Response {
    let (cpu_pct, mem_mb) = process_usage(&state);

    if let Some(name) = &query.collector {
        return match find_runtime(&state, name) {
            Ok(runtime) => {
                let mut perf = runtime.performance_json().await;
                if let Some(object) = perf.as_object_mut() {
                    object.insert("cpu_pct".to_string(), json!(cpu_pct));
                    object.insert("mem_mb".to_string(), json!(mem_mb));
                }
                axum::Json(perf).into_response()
            }
            Err(err) => control_error(err),
        };
    }

    let mut components = serde_json::Map::new();
    for runtime in state.scheduler.runtimes() {
        components.insert(runtime.name().to_string(), runtime.performance_json().await);
    }
    axum::Json(json!({
        "cpu_pct": cpu_pct,
        "mem_mb": mem_mb,
        "components": components,
    }))
    .into_response()
}

fn process_usage(state: &AppState) -> (f64, f64) {
    let Ok(mut system) = state.system.lock() else {
        return (0.0, 0.0);
    };
    let pid = Pid::from_u32(std::process::id());
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        ProcessRefreshKind::new().with_cpu().with_memory(),
    );
    match system.process(pid) {
        Some(process) => (
            process.cpu_usage() as f64,
            process.memory() as f64 / (1024.0 * 1024.0),
        ),
        None => (0.0, 0.0),
    }
}

async fn circuit_breaker_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CollectorQuery>,
) -> Response {
    if let Some(name) = &query.collector {
        return match find_runtime(&state, name) {
            Ok(runtime) => axum::Json(runtime.breaker_snapshot().await).into_response(),
            Err(err) => control_error(err),
        };
    }
    let mut breakers = serde_json::Map::new();
    for runtime in state.scheduler.runtimes() {
        breakers.insert(
            runtime.name().to_string(),
            serde_json::to_value(runtime.breaker_snapshot().await).unwrap_or_default(),
        );
    }
    axum::Json(serde_json::Value::Object(breakers)).into_response()
}

#[derive(Deserialize)]
struct LogsQuery {
    since: Option<u64>,
}

async fn logs(State(state): State<Arc<AppState>>, Query(query): Query<LogsQuery>) -> Response {
    axum::Json(json!({"lines": state.logs.since(query.since)})).into_response()
}

// ---------------------------------------------------------------------------
// Action endpoints
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default)]
struct CollectBody {
    collector: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    symbols: Option<Vec<String>>,
}

async fn collect(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CollectorQuery>,
    body: Option<axum::Json<CollectBody>>,
) -> Response {
    let body = body.map(|b| b.0).unwrap_or_default();
    let name = body
        .collector
        .or(query.collector)
        .unwrap_or_else(|| "price".to_string());

    match state.scheduler.trigger(&name) {
        Ok(task_id) => {
            info!(collector = %name, task_id = %task_id, "manual collect triggered");
            axum::Json(json!({"task_id": task_id, "status": "started"})).into_response()
        }
        Err(err) => control_error(err),
    }
}

#[derive(Deserialize)]
struct BackfillBody {
    collector: Option<String>,
    start_date: Option<chrono::NaiveDate>,
    end_date: Option<chrono::NaiveDate>,
    #[serde(default)]
    symbols: Option<Vec<String>>,
    #[serde(default)]
    force: bool,
}

async fn backfill(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CollectorQuery>,
    axum::Json(body): axum::Json<BackfillBody>,
) -> Response {
    let name = body
        .collector
        .or(query.collector)
        .unwrap_or_else(|| "price".to_string());
    let runtime = match find_runtime(&state, &name) {
        Ok(runtime) => runtime,
        Err(err) => return control_error(err),
    };

    // Default window: the configured lookback ending today.
    let (start_date, end_date) = {
        let config = state.config.read().await;
        let today = chrono::Utc::now().date_naive();
        let default_start = today
            .checked_sub_days(chrono::Days::new(config.backfill_lookback_days))
            .unwrap_or(today);
        (
            body.start_date.unwrap_or(default_start),
            body.end_date.unwrap_or(today),
        )
    };
    if end_date < start_date {
        return (
            StatusCode::BAD_REQUEST,
            axum::Json(json!({"error": "end_date before start_date"})),
        )
            .into_response();
    }

    let request = BackfillRequest {
        start_date,
        end_date,
        symbols: body.symbols,
        force: body.force,
    };
    match runtime.spawn_backfill(request).await {
        Ok(ticket) => axum::Json(json!({
            "task_id": ticket.task_id,
            "status": ticket.status,
            "estimated_records": ticket.estimated_records,
        }))
        .into_response(),
        Err(err) => control_error(err),
    }
}

#[derive(Deserialize)]
struct AlertBody {
    level: String,
    message: String,
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
}

async fn alert(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<AlertBody>,
) -> Response {
    let id = state
        .alerts
        .emit(&body.level, body.message, body.labels.unwrap_or_default());
    axum::Json(json!({"id": id})).into_response()
}

#[derive(Deserialize)]
struct ValidateBody {
    #[serde(default = "default_domain")]
    domain: String,
    records: Vec<serde_json::Value>,
}

fn default_domain() -> String {
    "price".to_string()
}

/// Pure validation of caller-supplied records; nothing is stored.
async fn validate_data(axum::Json(body): axum::Json<ValidateBody>) -> Response {
    let mut errors: Vec<String> = Vec::new();
    for (index, value) in body.records.iter().enumerate() {
        let result = match body.domain.as_str() {
            "price" => serde_json::from_value::<PriceObservation>(value.clone())
                .map_err(|e| format!("record {index}: undecodable: {e}"))
                .and_then(|r| {
                    RecordValidator::validate_price(&r).map_err(|e| format!("record {index}: {e}"))
                }),
            "ohlc" => serde_json::from_value::<OhlcBar>(value.clone())
                .map_err(|e| format!("record {index}: undecodable: {e}"))
                .and_then(|r| {
                    RecordValidator::validate_ohlc(&r).map_err(|e| format!("record {index}: {e}"))
                }),
            other => Err(format!("record {index}: unknown domain {other:?}")),
        };
        if let Err(error) = result {
            errors.push(error);
        }
    }
    axum::Json(json!({"valid": errors.is_empty(), "errors": errors})).into_response()
}

// ---------------------------------------------------------------------------
// Lifecycle endpoints
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum LifecycleOp {
    Start,
    Stop,
    Restart,
}

async fn lifecycle(
    state: Arc<AppState>,
    query: CollectorQuery,
    op: LifecycleOp,
) -> Response {
    let apply = |runtime: Arc<CollectorRuntime>| async move {
        match op {
            LifecycleOp::Start => runtime.start().await,
            LifecycleOp::Stop => runtime.stop().await,
            LifecycleOp::Restart => runtime.restart().await,
        }
    };

    if let Some(name) = &query.collector {
        return match find_runtime(&state, name) {
            Ok(runtime) => match apply(runtime).await {
                Ok(new_state) => axum::Json(json!({"state": new_state})).into_response(),
                Err(err) => control_error(err),
            },
            Err(err) => control_error(err),
        };
    }

    // Whole-platform operation: apply to every component, report per name.
    let mut states = serde_json::Map::new();
    for runtime in state.scheduler.runtimes() {
        let name = runtime.name().to_string();
        let outcome = match op {
            LifecycleOp::Start => runtime.start().await,
            LifecycleOp::Stop => runtime.stop().await,
            LifecycleOp::Restart => runtime.restart().await,
        };
        let value = match outcome {
            Ok(new_state) => json!(new_state),
            Err(err) => json!({"error": err.to_string()}),
        };
        states.insert(name, value);
    }
    axum::Json(json!({"state": states})).into_response()
}

async fn start(State(state): State<Arc<AppState>>, Query(query): Query<CollectorQuery>) -> Response {
    lifecycle(state, query, LifecycleOp::Start).await
}

async fn stop(State(state): State<Arc<AppState>>, Query(query): Query<CollectorQuery>) -> Response {
    lifecycle(state, query, LifecycleOp::Stop).await
}

async fn restart(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CollectorQuery>,
) -> Response {
    lifecycle(state, query, LifecycleOp::Restart).await
}

// ---------------------------------------------------------------------------
// Config endpoints
// ---------------------------------------------------------------------------

async fn get_config(State(state): State<Arc<AppState>>) -> Response {
    let config = state.config.read().await;
    axum::Json(config.public_view()).into_response()
}

/// In-memory patch only; the next tick reads the updated values.
async fn put_config(
    State(state): State<Arc<AppState>>,
    axum::Json(patch): axum::Json<serde_json::Value>,
) -> Response {
    let mut config = state.config.write().await;
    match config.apply_patch(&patch) {
        Ok(changed) => {
            info!(?changed, "config patched");
            axum::Json(json!({"applied": changed, "config": config.public_view()}))
                .into_response()
        }
        Err(err) => (
            StatusCode::BAD_REQUEST,
            axum::Json(json!({"error": err.to_string()})),
        )
            .into_response(),
    }
}
