use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time;
use tracing::debug;

/// Token bucket with a per-second refill rate and a hard per-minute ceiling.
///
/// Each adapter owns one limiter; buckets are never shared across
/// collectors. `acquire` suspends until both constraints admit a request,
/// so callers cannot overrun the provider no matter how fast they loop.
pub struct RateLimiter {
    refill_per_second: f64,
    burst: f64,
    per_minute: usize,
    state: Mutex<LimiterState>,
    name: &'static str,
}

struct LimiterState {
    tokens: f64,
    last_refill: Instant,
    minute_window: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(name: &'static str, refill_per_second: f64, per_minute: usize) -> Self {
        let burst = refill_per_second.max(1.0);
        Self {
            refill_per_second,
            burst,
            per_minute,
            state: Mutex::new(LimiterState {
                tokens: burst,
                last_refill: Instant::now(),
                minute_window: VecDeque::new(),
            }),
            name,
        }
    }

    /// Wait until a request slot is available, then consume it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);
                self.prune_window(&mut state);

                if state.tokens >= 1.0 && state.minute_window.len() < self.per_minute {
                    state.tokens -= 1.0;
                    state.minute_window.push_back(Instant::now());
                    return;
                }

                if state.minute_window.len() >= self.per_minute {
                    // Oldest request ages out of the sliding window first.
                    let oldest = state.minute_window.front().copied();
                    oldest
                        .map(|t| Duration::from_secs(60).saturating_sub(t.elapsed()))
                        .unwrap_or(Duration::from_millis(250))
                } else {
                    let deficit = 1.0 - state.tokens;
                    Duration::from_secs_f64(deficit / self.refill_per_second)
                }
            };

            let wait = wait.max(Duration::from_millis(10));
            debug!(limiter = self.name, wait_ms = wait.as_millis() as u64, "rate limit wait");
            time::sleep(wait).await;
        }
    }

    fn refill(&self, state: &mut LimiterState) {
        let elapsed = state.last_refill.elapsed().as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_second).min(self.burst);
        state.last_refill = Instant::now();
    }

    fn prune_window(&self, state: &mut LimiterState) {
        let cutoff = Duration::from_secs(60);
        while let Some(front) = state.minute_window.front() {
            if front.elapsed() >= cutoff {
                state.minute_window.pop_front();
            } else {
                break;
            }
        }
    }
}
