//! Circuit breaker end to end: repeated auth failures open the gate, the
//! cooldown half-opens it, and one good tick closes it again.

use anyhow::Result;
use async_trait::async_trait;
use cryptopulse::application::collectors::{
    Collector, CollectorRuntime, TickContext, TickOutcome, TickResult,
};
use cryptopulse::application::placeholder::PlaceholderManager;
use cryptopulse::application::registry::SymbolRegistry;
use cryptopulse::config::Config;
use cryptopulse::domain::errors::{FetchError, FetchErrorKind};
use cryptopulse::domain::repositories::DataDomain;
use cryptopulse::infrastructure::core::circuit_breaker::CircuitState;
use cryptopulse::infrastructure::observability::{AlertSink, Metrics};
use cryptopulse::infrastructure::persistence::in_memory::InMemoryAssetRepository;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

struct FlakySource {
    healthy: AtomicBool,
}

#[async_trait]
impl Collector for FlakySource {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn domain(&self) -> DataDomain {
        DataDomain::Price
    }

    async fn collect(&self, _ctx: &TickContext) -> Result<TickOutcome> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(TickOutcome {
                collected: 1,
                ..Default::default()
            })
        } else {
            Err(FetchError::new("stub", FetchErrorKind::AuthFailed, "401 unauthorized").into())
        }
    }
}

fn build(cooldown: Duration) -> (Arc<CollectorRuntime>, Arc<FlakySource>, AlertSink) {
    let collector = Arc::new(FlakySource {
        healthy: AtomicBool::new(false),
    });
    let alerts = AlertSink::default();
    let runtime = Arc::new(CollectorRuntime::new(
        collector.clone(),
        Arc::new(SymbolRegistry::new(Arc::new(InMemoryAssetRepository::new()))),
        Arc::new(PlaceholderManager::new(vec![], 50.0)),
        Arc::new(RwLock::new(Config::from_env().expect("config"))),
        Metrics::new().expect("metrics"),
        alerts.clone(),
        5,
        cooldown,
        CancellationToken::new(),
    ));
    (runtime, collector, alerts)
}

#[tokio::test]
async fn breaker_full_cycle() {
    let (runtime, collector, alerts) = build(Duration::from_millis(100));
    runtime.start().await.expect("start");

    // Five consecutive auth failures open the breaker.
    for i in 0..5 {
        assert_eq!(runtime.run_tick().await, TickResult::Failed, "tick {i}");
    }
    let snapshot = runtime.breaker_snapshot().await;
    assert_eq!(snapshot.state, CircuitState::Open);
    assert_eq!(snapshot.failures, 5);
    assert!(snapshot.opened_at.is_some());

    // While open, ticks are rejected without reaching the collector.
    assert_eq!(runtime.run_tick().await, TickResult::SkippedBreakerOpen);

    // An alert about the opening was emitted.
    assert!(
        alerts
            .recent()
            .iter()
            .any(|a| a.message.contains("circuit breaker opened")),
        "expected a breaker alert, got {:?}",
        alerts.recent()
    );

    // After the cooldown the trial tick is admitted; still failing reopens.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(runtime.run_tick().await, TickResult::Failed);
    assert_eq!(runtime.breaker_snapshot().await.state, CircuitState::Open);

    // Source recovers: cooldown, trial tick succeeds, breaker closes.
    collector.healthy.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(runtime.run_tick().await, TickResult::Completed);

    let snapshot = runtime.breaker_snapshot().await;
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.failures, 0);
    assert!(snapshot.opened_at.is_none());

    // Health reflects the rough success ratio of recent ticks.
    let health = runtime.health_score().await;
    assert!(health > 0.0 && health < 100.0);
}

#[tokio::test]
async fn failures_do_not_crash_the_runtime() {
    let (runtime, _collector, _alerts) = build(Duration::from_secs(300));
    runtime.start().await.expect("start");

    for _ in 0..20 {
        let _ = runtime.run_tick().await;
    }

    // Runtime is still standing and observable.
    let stats = runtime.stats().await;
    assert_eq!(stats.ticks_run, 5, "breaker capped the failing ticks");
    assert!(stats.last_error.is_some());
    assert_eq!(
        runtime.state().await,
        cryptopulse::application::collectors::LifecycleState::Running
    );
}
