use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, ticks pass through.
    Closed,
    /// Failure threshold breached, ticks are rejected until the cooldown elapses.
    Open,
    /// Cooldown elapsed, one trial tick is allowed through.
    HalfOpen,
}

/// Per-collector gate: opens after `failure_threshold` consecutive tick
/// failures, transitions to half-open after `cooldown`, and a single
/// successful tick closes it again.
pub struct CircuitBreaker {
    state: RwLock<BreakerInner>,
    failure_threshold: u32,
    cooldown: Duration,
    name: String,
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    opened_at_wall: Option<DateTime<Utc>>,
}

/// Point-in-time view for `/circuit-breaker-status`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: RwLock::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                opened_at_wall: None,
            }),
            failure_threshold,
            cooldown,
            name: name.into(),
        }
    }

    /// Whether a tick may run now. Transitions Open -> HalfOpen once the
    /// cooldown has elapsed; in HalfOpen the single trial tick is admitted.
    pub async fn allow_tick(&self) -> bool {
        let mut inner = self.state.write().await;
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.cooldown {
                    info!(
                        breaker = %self.name,
                        "circuit breaker cooldown elapsed, allowing trial tick (open -> half_open)"
                    );
                    inner.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.state.write().await;
        if inner.state != CircuitState::Closed {
            info!(breaker = %self.name, "circuit breaker closing after successful tick");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.opened_at_wall = None;
    }

    pub async fn record_failure(&self) {
        let mut inner = self.state.write().await;
        inner.consecutive_failures += 1;

        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.failure_threshold {
                    error!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "circuit breaker opening"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.opened_at_wall = Some(Utc::now());
                }
            }
            CircuitState::HalfOpen => {
                warn!(breaker = %self.name, "trial tick failed, circuit breaker reopening");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.opened_at_wall = Some(Utc::now());
            }
            CircuitState::Open => {}
        }
    }

    pub async fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.state.read().await;
        BreakerSnapshot {
            state: inner.state,
            failures: inner.consecutive_failures,
            opened_at: inner.opened_at_wall,
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.state.read().await.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new("test", 3, Duration::from_secs(300));

        for _ in 0..2 {
            cb.record_failure().await;
            assert_eq!(cb.state().await, CircuitState::Closed);
        }
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(!cb.allow_tick().await);
    }

    #[tokio::test]
    async fn half_open_after_cooldown_then_closes_on_success() {
        let cb = CircuitBreaker::new("test", 2, Duration::from_millis(20));

        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(cb.allow_tick().await);
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
        let snap = cb.snapshot().await;
        assert_eq!(snap.failures, 0);
        assert!(snap.opened_at.is_none());
    }

    #[tokio::test]
    async fn trial_failure_reopens() {
        let cb = CircuitBreaker::new("test", 1, Duration::from_millis(10));

        cb.record_failure().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cb.allow_tick().await);

        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(!cb.allow_tick().await);
    }

    #[tokio::test]
    async fn snapshot_reports_opened_at() {
        let cb = CircuitBreaker::new("test", 1, Duration::from_secs(300));
        cb.record_failure().await;
        let snap = cb.snapshot().await;
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.failures, 1);
        assert!(snap.opened_at.is_some());
    }
}
