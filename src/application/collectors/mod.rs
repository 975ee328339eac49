//! Collector template: the uniform contract every domain collector (and the
//! materialized updater) runs under.
//!
//! `CollectorRuntime` owns the lifecycle state machine, the per-collector
//! concurrency=1 guard, stats, the circuit breaker, backfill bookkeeping and
//! metrics publication. Domain collectors only implement `Collector`.

pub mod derivatives;
pub mod macro_econ;
pub mod market;
pub mod news;
pub mod ohlc;
pub mod onchain;
pub mod price;
pub mod sentiment;
pub mod technical;

use crate::application::placeholder::{PlaceholderManager, today_window};
use crate::application::registry::SymbolRegistry;
use crate::config::ConfigHandle;
use crate::domain::errors::ControlError;
use crate::domain::ports::DateRange;
use crate::domain::repositories::DataDomain;
use crate::domain::types::{Asset, TimeWindow};
use crate::infrastructure::core::circuit_breaker::{BreakerSnapshot, CircuitBreaker};
use crate::infrastructure::observability::{AlertSink, Metrics};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Everything a collector needs for one pass. Built by the runtime at the
/// start of each tick so config changes apply on the next tick.
pub struct TickContext {
    pub symbols: Vec<Asset>,
    pub batch_size: usize,
    pub completeness_threshold: f64,
    pub placeholders: Arc<PlaceholderManager>,
    pub cancel: CancellationToken,
    pub now: DateTime<Utc>,
}

/// Counters produced by one collection pass.
#[derive(Debug, Default, Clone)]
pub struct TickOutcome {
    pub collected: u64,
    pub api_calls: u64,
    pub db_writes: u64,
    pub invalid_records: u64,
    pub duplicate_records: u64,
    /// Batches skipped after an adapter error (logged, not fatal).
    pub batch_errors: u64,
    pub validation_errors: Vec<String>,
    pub db_write_duration: Duration,
}

impl TickOutcome {
    pub fn absorb(&mut self, other: TickOutcome) {
        self.collected += other.collected;
        self.api_calls += other.api_calls;
        self.db_writes += other.db_writes;
        self.invalid_records += other.invalid_records;
        self.duplicate_records += other.duplicate_records;
        self.batch_errors += other.batch_errors;
        self.validation_errors.extend(other.validation_errors);
        self.db_write_duration += other.db_write_duration;
    }
}

/// Auth failures abort the tick (alert + breaker); everything else is a
/// batch-level skip.
pub(crate) fn is_tick_fatal(err: &crate::domain::errors::FetchError) -> bool {
    matches!(err.kind, crate::domain::errors::FetchErrorKind::AuthFailed)
}

/// One domain collector: fetch, normalize, validate, upsert.
#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &'static str;
    fn domain(&self) -> DataDomain;

    /// One collection pass over the context's work-list.
    async fn collect(&self, ctx: &TickContext) -> Result<TickOutcome>;

    /// Historical pass over `range`. `force=false` implementations skip keys
    /// already at or above the completeness threshold. Collectors without a
    /// historical source replay their live pass.
    async fn backfill(&self, ctx: &TickContext, _range: DateRange, _force: bool) -> Result<TickOutcome> {
        self.collect(ctx).await
    }

    /// Rough record estimate for a backfill request, reported immediately.
    fn estimate_backfill_records(&self, symbols: usize, range: &DateRange) -> u64 {
        symbols as u64 * range.days().max(0) as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Created,
    Starting,
    Running,
    Paused,
    Stopping,
    Stopped,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Created => "created",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Paused => "paused",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
        }
    }
}

/// Result of asking the runtime for a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickResult {
    Completed,
    Failed,
    SkippedBusy,
    SkippedBreakerOpen,
    SkippedNotRunning,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct StatsSnapshot {
    pub total_collected: u64,
    pub collection_errors: u64,
    pub api_calls_made: u64,
    pub database_writes: u64,
    pub invalid_records: u64,
    pub duplicate_records: u64,
    pub ticks_run: u64,
    pub ticks_skipped_busy: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

struct StatsInner {
    snapshot: StatsSnapshot,
    tick_durations: VecDeque<Duration>,
    recent_outcomes: VecDeque<bool>,
    recent_validation_errors: VecDeque<String>,
}

impl StatsInner {
    fn new() -> Self {
        Self {
            snapshot: StatsSnapshot::default(),
            tick_durations: VecDeque::with_capacity(128),
            recent_outcomes: VecDeque::with_capacity(32),
            recent_validation_errors: VecDeque::with_capacity(32),
        }
    }

    fn push_bounded<T>(queue: &mut VecDeque<T>, value: T, cap: usize) {
        if queue.len() == cap {
            queue.pop_front();
        }
        queue.push_back(value);
    }

    fn health_score(&self) -> f64 {
        if self.recent_outcomes.is_empty() {
            return 100.0;
        }
        let ok = self.recent_outcomes.iter().filter(|b| **b).count();
        100.0 * ok as f64 / self.recent_outcomes.len() as f64
    }

    fn duration_percentile(&self, pct: f64) -> Duration {
        if self.tick_durations.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted: Vec<Duration> = self.tick_durations.iter().copied().collect();
        sorted.sort();
        let idx = ((sorted.len() as f64 - 1.0) * pct).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    fn avg_duration(&self) -> Duration {
        if self.tick_durations.is_empty() {
            return Duration::ZERO;
        }
        self.tick_durations.iter().sum::<Duration>() / self.tick_durations.len() as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillState {
    Started,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackfillStatus {
    pub task_id: Uuid,
    pub state: BackfillState,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub force: bool,
    pub records_written: u64,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct BackfillRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub symbols: Option<Vec<String>>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackfillTicket {
    pub task_id: Uuid,
    pub status: &'static str,
    pub estimated_records: u64,
}

/// Wraps a `Collector` with the uniform control surface.
pub struct CollectorRuntime {
    collector: Arc<dyn Collector>,
    registry: Arc<SymbolRegistry>,
    placeholders: Arc<PlaceholderManager>,
    config: ConfigHandle,
    metrics: Metrics,
    alerts: AlertSink,
    breaker: CircuitBreaker,
    state: RwLock<LifecycleState>,
    stats: RwLock<StatsInner>,
    tick_guard: Mutex<()>,
    backfills: RwLock<HashMap<Uuid, BackfillStatus>>,
    cancel: CancellationToken,
    had_success: AtomicBool,
}

impl CollectorRuntime {
    pub fn new(
        collector: Arc<dyn Collector>,
        registry: Arc<SymbolRegistry>,
        placeholders: Arc<PlaceholderManager>,
        config: ConfigHandle,
        metrics: Metrics,
        alerts: AlertSink,
        breaker_threshold: u32,
        breaker_cooldown: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let breaker = CircuitBreaker::new(collector.name(), breaker_threshold, breaker_cooldown);
        Self {
            collector,
            registry,
            placeholders,
            config,
            metrics,
            alerts,
            breaker,
            state: RwLock::new(LifecycleState::Created),
            stats: RwLock::new(StatsInner::new()),
            tick_guard: Mutex::new(()),
            backfills: RwLock::new(HashMap::new()),
            cancel,
            had_success: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &'static str {
        self.collector.name()
    }

    pub fn domain(&self) -> DataDomain {
        self.collector.domain()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.read().await
    }

    pub fn is_ready(&self) -> bool {
        self.had_success.load(Ordering::Relaxed)
    }

    // -- lifecycle ----------------------------------------------------------

    pub async fn start(&self) -> Result<LifecycleState, ControlError> {
        let mut state = self.state.write().await;
        match *state {
            LifecycleState::Created | LifecycleState::Stopped | LifecycleState::Paused => {
                *state = LifecycleState::Starting;
                *state = LifecycleState::Running;
                info!(collector = self.name(), "collector started");
                Ok(*state)
            }
            current => Err(ControlError::IllegalState {
                component: self.name().to_string(),
                state: current.as_str().to_string(),
                requested: "start".to_string(),
            }),
        }
    }

    pub async fn stop(&self) -> Result<LifecycleState, ControlError> {
        let mut state = self.state.write().await;
        match *state {
            LifecycleState::Running | LifecycleState::Paused => {
                // Pending-cancel: an in-flight tick observes the flag at its
                // next suspension point; no task is killed here.
                *state = LifecycleState::Stopping;
                *state = LifecycleState::Stopped;
                info!(collector = self.name(), "collector stopped");
                Ok(*state)
            }
            current => Err(ControlError::IllegalState {
                component: self.name().to_string(),
                state: current.as_str().to_string(),
                requested: "stop".to_string(),
            }),
        }
    }

    pub async fn restart(&self) -> Result<LifecycleState, ControlError> {
        {
            let mut state = self.state.write().await;
            match *state {
                LifecycleState::Running | LifecycleState::Paused | LifecycleState::Stopped => {
                    *state = LifecycleState::Running;
                }
                current => {
                    return Err(ControlError::IllegalState {
                        component: self.name().to_string(),
                        state: current.as_str().to_string(),
                        requested: "restart".to_string(),
                    });
                }
            }
        }
        self.breaker.record_success().await;
        info!(collector = self.name(), "collector restarted");
        Ok(LifecycleState::Running)
    }

    async fn pause_with_alert(&self, reason: &str) {
        {
            let mut state = self.state.write().await;
            if *state == LifecycleState::Running {
                *state = LifecycleState::Paused;
            }
        }
        let mut labels = HashMap::new();
        labels.insert("collector".to_string(), self.name().to_string());
        self.alerts.emit("error", format!("{} paused: {reason}", self.name()), labels);
    }

    // -- tick ---------------------------------------------------------------

    /// Run one tick if the lifecycle, breaker and in-flight guard allow it.
    pub async fn run_tick(&self) -> TickResult {
        if self.state().await != LifecycleState::Running {
            return TickResult::SkippedNotRunning;
        }
        if !self.breaker.allow_tick().await {
            return TickResult::SkippedBreakerOpen;
        }
        let Ok(_guard) = self.tick_guard.try_lock() else {
            let mut stats = self.stats.write().await;
            stats.snapshot.ticks_skipped_busy += 1;
            return TickResult::SkippedBusy;
        };
        self.run_tick_locked().await
    }

    async fn run_tick_locked(&self) -> TickResult {
        let name = self.name();
        let started = Instant::now();
        self.metrics.running.with_label_values(&[name]).set(1.0);

        let result = self.tick_inner().await;

        let elapsed = started.elapsed();
        self.metrics.running.with_label_values(&[name]).set(0.0);
        self.metrics
            .collection_duration_seconds
            .with_label_values(&[name])
            .observe(elapsed.as_secs_f64());

        let tick_result = {
            let mut stats = self.stats.write().await;
            stats.snapshot.ticks_run += 1;
            stats.snapshot.last_tick_at = Some(Utc::now());
            StatsInner::push_bounded(&mut stats.tick_durations, elapsed, 128);

            match result {
                Ok(outcome) => {
                    stats.snapshot.total_collected += outcome.collected;
                    stats.snapshot.api_calls_made += outcome.api_calls;
                    stats.snapshot.database_writes += outcome.db_writes;
                    stats.snapshot.invalid_records += outcome.invalid_records;
                    stats.snapshot.duplicate_records += outcome.duplicate_records;
                    stats.snapshot.collection_errors +=
                        outcome.invalid_records + outcome.batch_errors;
                    stats.snapshot.last_success_at = Some(Utc::now());
                    stats.snapshot.last_error = None;
                    for err in outcome.validation_errors {
                        StatsInner::push_bounded(&mut stats.recent_validation_errors, err, 32);
                    }
                    StatsInner::push_bounded(&mut stats.recent_outcomes, true, 32);
                    self.metrics
                        .db_write_duration_seconds
                        .with_label_values(&[name])
                        .observe(outcome.db_write_duration.as_secs_f64());
                    TickResult::Completed
                }
                Err(err) => {
                    stats.snapshot.collection_errors += 1;
                    stats.snapshot.last_error = Some(format!("{err:#}"));
                    StatsInner::push_bounded(&mut stats.recent_outcomes, false, 32);
                    error!(collector = name, error = %format!("{err:#}"), "tick failed");
                    TickResult::Failed
                }
            }
        };

        match tick_result {
            TickResult::Completed => {
                self.had_success.store(true, Ordering::Relaxed);
                self.breaker.record_success().await;
            }
            TickResult::Failed => {
                self.breaker.record_failure().await;
                if self.breaker.snapshot().await.state
                    == crate::infrastructure::core::circuit_breaker::CircuitState::Open
                {
                    let mut labels = HashMap::new();
                    labels.insert("collector".to_string(), name.to_string());
                    self.alerts.emit(
                        "error",
                        format!("{name} circuit breaker opened"),
                        labels,
                    );
                }
            }
            _ => {}
        }

        self.publish_gauges().await;
        tick_result
    }

    async fn tick_inner(&self) -> Result<TickOutcome> {
        let ctx = match self.build_context().await {
            Ok(ctx) => ctx,
            Err(err) => {
                // Registry loss is tick-fatal: pause and alert, the next
                // /start (or restart) resumes.
                self.pause_with_alert(&format!("work-list unavailable: {err:#}")).await;
                return Err(err);
            }
        };

        let window = today_window(ctx.now);
        if let Err(err) = self
            .placeholders
            .ensure_placeholders(self.domain(), &ctx.symbols, window)
            .await
        {
            warn!(collector = self.name(), error = %format!("{err:#}"), "placeholder pre-pass failed");
        }

        self.collector.collect(&ctx).await
    }

    async fn build_context(&self) -> Result<TickContext> {
        let symbols = self.registry.active_symbols().await?;
        let config = self.config.read().await;
        Ok(TickContext {
            symbols,
            batch_size: config.batch_size,
            completeness_threshold: config.completeness_threshold,
            placeholders: self.placeholders.clone(),
            cancel: self.cancel.clone(),
            now: Utc::now(),
        })
    }

    // -- backfill -----------------------------------------------------------

    pub async fn spawn_backfill(
        self: &Arc<Self>,
        request: BackfillRequest,
    ) -> Result<BackfillTicket, ControlError> {
        if self.state().await != LifecycleState::Running {
            return Err(ControlError::IllegalState {
                component: self.name().to_string(),
                state: self.state().await.as_str().to_string(),
                requested: "backfill".to_string(),
            });
        }

        let range = DateRange::new(request.start_date, request.end_date);
        let symbol_count = match &request.symbols {
            Some(symbols) => symbols.len(),
            None => self
                .registry
                .active_symbols()
                .await
                .map(|s| s.len())
                .unwrap_or(0),
        };
        let estimated_records = self
            .collector
            .estimate_backfill_records(symbol_count, &range);

        let task_id = Uuid::new_v4();
        let status = BackfillStatus {
            task_id,
            state: BackfillState::Started,
            start: request.start_date,
            end: request.end_date,
            force: request.force,
            records_written: 0,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.backfills.write().await.insert(task_id, status);

        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            runtime.run_backfill(task_id, request).await;
        });

        Ok(BackfillTicket {
            task_id,
            status: "started",
            estimated_records,
        })
    }

    async fn run_backfill(self: Arc<Self>, task_id: Uuid, request: BackfillRequest) {
        let set_state = |state: BackfillState, written: u64, error: Option<String>| {
            let runtime = Arc::clone(&self);
            async move {
                let mut backfills = runtime.backfills.write().await;
                if let Some(status) = backfills.get_mut(&task_id) {
                    status.state = state;
                    status.records_written = written;
                    status.error = error;
                    if matches!(state, BackfillState::Completed | BackfillState::Failed) {
                        status.finished_at = Some(Utc::now());
                    }
                }
            }
        };

        set_state(BackfillState::Running, 0, None).await;

        let mut total = TickOutcome::default();
        let range = DateRange::new(request.start_date, request.end_date);

        // Chunk day by day; each chunk takes the tick guard so backfill and
        // live ticks never write the same key concurrently.
        for date in range.iter() {
            if self.cancel.is_cancelled() {
                break;
            }
            let chunk = DateRange::new(date, date);
            let _guard = self.tick_guard.lock().await;

            let ctx = match self.build_context().await {
                Ok(mut ctx) => {
                    if let Some(filter) = &request.symbols {
                        ctx.symbols.retain(|a| filter.contains(&a.symbol));
                    }
                    ctx
                }
                Err(err) => {
                    error!(collector = self.name(), task_id = %task_id, error = %format!("{err:#}"), "backfill aborted");
                    set_state(BackfillState::Failed, total.collected, Some(format!("{err:#}"))).await;
                    return;
                }
            };

            match self.collector.backfill(&ctx, chunk, request.force).await {
                Ok(outcome) => total.absorb(outcome),
                Err(err) => {
                    // Batch-level failure: log, skip this chunk, carry on.
                    warn!(
                        collector = self.name(),
                        task_id = %task_id,
                        date = %date,
                        error = %format!("{err:#}"),
                        "backfill chunk failed, continuing"
                    );
                }
            }
            set_state(BackfillState::Running, total.collected, None).await;
        }

        {
            let mut stats = self.stats.write().await;
            stats.snapshot.total_collected += total.collected;
            stats.snapshot.api_calls_made += total.api_calls;
            stats.snapshot.database_writes += total.db_writes;
            stats.snapshot.invalid_records += total.invalid_records;
            stats.snapshot.duplicate_records += total.duplicate_records;
        }
        self.publish_gauges().await;

        info!(
            collector = self.name(),
            task_id = %task_id,
            records = total.collected,
            "backfill finished"
        );
        set_state(BackfillState::Completed, total.collected, None).await;
    }

    pub async fn backfill_status(&self, task_id: Uuid) -> Option<BackfillStatus> {
        self.backfills.read().await.get(&task_id).cloned()
    }

    pub async fn backfills(&self) -> Vec<BackfillStatus> {
        let mut all: Vec<BackfillStatus> = self.backfills.read().await.values().cloned().collect();
        all.sort_by_key(|b| b.started_at);
        all
    }

    // -- observation --------------------------------------------------------

    pub async fn stats(&self) -> StatsSnapshot {
        self.stats.read().await.snapshot.clone()
    }

    pub async fn health_score(&self) -> f64 {
        self.stats.read().await.health_score()
    }

    pub async fn breaker_snapshot(&self) -> BreakerSnapshot {
        self.breaker.snapshot().await
    }

    /// Hours below the completeness threshold over the trailing 24h.
    pub async fn gap_hours(&self) -> f64 {
        let now = Utc::now();
        let window = TimeWindow::new(now - ChronoDuration::hours(24), now);
        match self.placeholders.detect_gaps(self.domain(), window).await {
            Ok(gaps) => {
                let mut hours: Vec<DateTime<Utc>> = gaps.iter().map(|k| k.slot).collect();
                hours.sort();
                hours.dedup();
                hours.len() as f64
            }
            Err(_) => 0.0,
        }
    }

    pub async fn status_json(&self) -> serde_json::Value {
        let stats = self.stats().await;
        let gap_hours = self.gap_hours().await;
        serde_json::json!({
            "collector": self.name(),
            "state": self.state().await.as_str(),
            "last_tick": stats.last_tick_at,
            "stats": stats,
            "gap_hours": gap_hours,
            "health_score": self.health_score().await,
            "circuit_breaker": self.breaker_snapshot().await,
            "backfills": self.backfills().await,
        })
    }

    pub async fn data_quality_json(&self) -> serde_json::Value {
        let stats = self.stats.read().await;
        let snapshot = &stats.snapshot;
        let total = snapshot.total_collected + snapshot.invalid_records;
        let score = if total == 0 {
            100.0
        } else {
            100.0 * snapshot.total_collected as f64 / total as f64
        };
        serde_json::json!({
            "total_records": total,
            "valid_records": snapshot.total_collected,
            "invalid_records": snapshot.invalid_records,
            "duplicate_records": snapshot.duplicate_records,
            "validation_errors": stats.recent_validation_errors.iter().collect::<Vec<_>>(),
            "data_quality_score": score,
        })
    }

    pub async fn performance_json(&self) -> serde_json::Value {
        let stats = self.stats.read().await;
        let avg = stats.avg_duration();
        let p95 = stats.duration_percentile(0.95);
        let records_per_second = if avg.is_zero() {
            0.0
        } else {
            let per_tick = if stats.snapshot.ticks_run == 0 {
                0.0
            } else {
                stats.snapshot.total_collected as f64 / stats.snapshot.ticks_run as f64
            };
            per_tick / avg.as_secs_f64()
        };
        serde_json::json!({
            "avg_tick_duration_ms": avg.as_millis() as u64,
            "p95_tick_duration_ms": p95.as_millis() as u64,
            "records_per_second": records_per_second,
        })
    }

    async fn publish_gauges(&self) {
        let name = self.name();
        let stats = self.stats().await;
        let set = |gauge: &prometheus::GaugeVec, value: f64| {
            gauge.with_label_values(&[name]).set(value);
        };
        set(&self.metrics.total_collected, stats.total_collected as f64);
        set(&self.metrics.collection_errors, stats.collection_errors as f64);
        set(&self.metrics.api_calls_made, stats.api_calls_made as f64);
        set(&self.metrics.database_writes, stats.database_writes as f64);
        set(&self.metrics.health_score, self.health_score().await);
        set(&self.metrics.gap_hours, self.gap_hours().await);
    }
}
