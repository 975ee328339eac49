//! Drift-free scheduler. One logical task per collector; next tick fires at
//! `last_tick_start + cadence`, overlapping ticks are suppressed, first
//! ticks are jittered to spread startup load.

use crate::application::collectors::{CollectorRuntime, TickResult};
use crate::application::placeholder::PlaceholderManager;
use crate::application::registry::SymbolRegistry;
use crate::domain::errors::ControlError;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct ScheduledTask {
    runtime: Arc<CollectorRuntime>,
    cadence: Duration,
    enabled: bool,
}

pub struct Scheduler {
    tasks: Vec<ScheduledTask>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            tasks: Vec::new(),
            handles: Mutex::new(Vec::new()),
            cancel,
        }
    }

    pub fn register(&mut self, runtime: Arc<CollectorRuntime>, cadence: Duration, enabled: bool) {
        self.tasks.push(ScheduledTask {
            runtime,
            cadence,
            enabled,
        });
    }

    pub fn runtimes(&self) -> Vec<Arc<CollectorRuntime>> {
        self.tasks.iter().map(|t| t.runtime.clone()).collect()
    }

    pub fn find(&self, name: &str) -> Option<Arc<CollectorRuntime>> {
        self.tasks
            .iter()
            .find(|t| t.runtime.name() == name)
            .map(|t| t.runtime.clone())
    }

    /// Start every enabled collector and spawn its schedule loop.
    pub async fn spawn_all(&self) {
        let mut handles = self.handles.lock().await;
        for task in &self.tasks {
            if !task.enabled {
                info!(collector = task.runtime.name(), "disabled by config, not scheduled");
                continue;
            }
            if let Err(e) = task.runtime.start().await {
                warn!(collector = task.runtime.name(), error = %e, "could not start");
                continue;
            }
            let runtime = task.runtime.clone();
            let cadence = task.cadence;
            let cancel = self.cancel.clone();
            handles.push(tokio::spawn(async move {
                schedule_loop(runtime, cadence, cancel).await;
            }));
        }
    }

    /// Hourly placeholder sweep across all placeholder domains.
    pub async fn spawn_placeholder_sweep(
        &self,
        registry: Arc<SymbolRegistry>,
        placeholders: Arc<PlaceholderManager>,
    ) {
        let cancel = self.cancel.clone();
        let mut handles = self.handles.lock().await;
        handles.push(tokio::spawn(async move {
            let mut interval = time::interval(Duration::from_secs(3600));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = interval.tick() => {}
                }
                match registry.active_symbols().await {
                    Ok(symbols) => {
                        if let Err(e) = placeholders.sweep(&symbols, chrono::Utc::now()).await {
                            warn!(error = %format!("{e:#}"), "placeholder sweep failed");
                        }
                    }
                    Err(e) => warn!(error = %format!("{e:#}"), "sweep could not load symbols"),
                }
            }
        }));
    }

    /// Manual trigger: enqueue one tick now, subject to the same
    /// concurrency=1 guard as scheduled ticks.
    pub fn trigger(&self, name: &str) -> Result<Uuid, ControlError> {
        let runtime = self
            .find(name)
            .ok_or_else(|| ControlError::UnknownComponent(name.to_string()))?;
        let task_id = Uuid::new_v4();
        tokio::spawn(async move {
            let result = runtime.run_tick().await;
            debug!(collector = runtime.name(), task_id = %task_id, ?result, "manual tick finished");
        });
        Ok(task_id)
    }

    /// Cancel everything and wait for in-flight work, bounded by `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        info!(grace_secs = grace.as_secs(), "scheduler shutting down");
        self.cancel.cancel();
        let mut handles = self.handles.lock().await;
        let drain = async {
            for handle in handles.drain(..) {
                let _ = handle.await;
            }
        };
        if time::timeout(grace, drain).await.is_err() {
            warn!("grace period elapsed, abandoning remaining tasks");
        }
    }
}

async fn schedule_loop(
    runtime: Arc<CollectorRuntime>,
    cadence: Duration,
    cancel: CancellationToken,
) {
    // Spread startup load: first tick delayed by up to 10% of the cadence.
    let jitter_ms = {
        let max = (cadence.as_millis() as u64 / 10).max(1);
        rand::rng().random_range(0..max)
    };
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = time::sleep(Duration::from_millis(jitter_ms)) => {}
    }

    info!(
        collector = runtime.name(),
        cadence_secs = cadence.as_secs(),
        "scheduled"
    );

    // `interval` keeps the grid anchored at start time; Skip suppresses the
    // backlog when a tick overruns instead of firing a burst.
    let mut interval = time::interval(cadence);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut overlap_logged = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(collector = runtime.name(), "schedule loop cancelled");
                return;
            }
            _ = interval.tick() => {}
        }

        match runtime.run_tick().await {
            TickResult::SkippedBusy => {
                if !overlap_logged {
                    warn!(
                        collector = runtime.name(),
                        "previous tick still running, suppressing overlap"
                    );
                    overlap_logged = true;
                }
            }
            _ => {
                overlap_logged = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::collectors::{Collector, TickContext, TickOutcome};
    use crate::application::placeholder::PlaceholderManager;
    use crate::application::registry::SymbolRegistry;
    use crate::domain::repositories::DataDomain;
    use crate::infrastructure::observability::{AlertSink, Metrics};
    use crate::infrastructure::persistence::in_memory::InMemoryAssetRepository;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::RwLock;

    struct SlowCollector {
        ticks: AtomicU64,
        delay: Duration,
    }

    #[async_trait]
    impl Collector for SlowCollector {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn domain(&self) -> DataDomain {
            DataDomain::Price
        }

        async fn collect(&self, _ctx: &TickContext) -> Result<TickOutcome> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(TickOutcome::default())
        }
    }

    fn make_runtime(delay: Duration, cancel: CancellationToken) -> (Arc<CollectorRuntime>, Arc<SlowCollector>) {
        let collector = Arc::new(SlowCollector {
            ticks: AtomicU64::new(0),
            delay,
        });
        let registry = Arc::new(SymbolRegistry::new(Arc::new(InMemoryAssetRepository::new())));
        let placeholders = Arc::new(PlaceholderManager::new(vec![], 50.0));
        let config = Arc::new(RwLock::new(crate::config::Config::from_env().expect("config")));
        let runtime = Arc::new(CollectorRuntime::new(
            collector.clone(),
            registry,
            placeholders,
            config,
            Metrics::new().expect("metrics"),
            AlertSink::default(),
            5,
            Duration::from_secs(300),
            cancel,
        ));
        (runtime, collector)
    }

    #[tokio::test]
    async fn trigger_unknown_collector_is_rejected() {
        let scheduler = Scheduler::new(CancellationToken::new());
        assert!(matches!(
            scheduler.trigger("nope"),
            Err(ControlError::UnknownComponent(_))
        ));
    }

    #[tokio::test]
    async fn manual_trigger_obeys_concurrency_guard() {
        let cancel = CancellationToken::new();
        let (runtime, collector) = make_runtime(Duration::from_millis(200), cancel.clone());
        runtime.start().await.unwrap();

        let mut scheduler = Scheduler::new(cancel);
        scheduler.register(runtime.clone(), Duration::from_secs(3600), true);

        // Fire two manual triggers back to back; the second hits the busy
        // guard while the first sleeps.
        scheduler.trigger("slow").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.trigger("slow").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(collector.ticks.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.stats().await.ticks_skipped_busy, 1);
    }

    #[tokio::test]
    async fn shutdown_cancels_schedule_loops() {
        let cancel = CancellationToken::new();
        let (runtime, _collector) = make_runtime(Duration::from_millis(1), cancel.clone());

        let mut scheduler = Scheduler::new(cancel);
        scheduler.register(runtime, Duration::from_millis(50), true);
        scheduler.spawn_all().await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        scheduler.shutdown(Duration::from_secs(1)).await;
        // Reaching here without hanging is the assertion.
    }

    #[tokio::test]
    async fn disabled_collectors_are_not_scheduled() {
        let cancel = CancellationToken::new();
        let (runtime, collector) = make_runtime(Duration::from_millis(1), cancel.clone());

        let mut scheduler = Scheduler::new(cancel);
        scheduler.register(runtime.clone(), Duration::from_millis(10), false);
        scheduler.spawn_all().await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(collector.ticks.load(Ordering::SeqCst), 0);
        assert_eq!(
            runtime.state().await,
            crate::application::collectors::LifecycleState::Created
        );
    }
}
