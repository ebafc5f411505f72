//! Per-key rate limiting for the realtime core.
//!
//! Keys are opaque strings, typically `"connID:action"` or `"userID:global"`
//! per §4.5. This is a different shape from [`crate::utils::limiter`]'s
//! count-min-sketch approximate limiter (which is fine for coarse HTTP IP/user
//! throttling); the protocol's property tests (§8) need exact admission
//! counts, so these limiters keep exact per-key state behind a `DashMap`
//! instead of an approximate sketch.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Default per-connection message budget.
pub const DEFAULT_MESSAGE_RATE: f64 = 50.0;
pub const DEFAULT_MESSAGE_BURST: u32 = 100;
/// Default presence-update budget.
pub const DEFAULT_PRESENCE_RATE: u32 = 5;
/// Default typing-indicator budget, per conversation.
pub const DEFAULT_TYPING_RATE: u32 = 2;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket limiter: `rate` tokens/s refill, `burst` max tokens held.
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    buckets: DashMap<String, Mutex<BucketState>>,
}

impl TokenBucket {
    pub fn new(rate: f64, burst: u32) -> Self {
        Self {
            rate: rate.max(0.001),
            burst: f64::from(burst.max(1)),
            buckets: DashMap::new(),
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
        state.last_refill = now;
    }

    /// Non-blocking admission check: consumes one token if available.
    pub fn allow(&self, key: &str) -> bool {
        let entry = self.buckets.entry(key.to_string()).or_insert_with(|| {
            Mutex::new(BucketState {
                tokens: self.burst,
                last_refill: Instant::now(),
            })
        });
        let mut state = entry.lock().expect("rate limiter mutex poisoned");
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Block until a token is available, or the cancellation signal fires.
    pub async fn wait(
        &self,
        key: &str,
        cancel: &tokio::sync::Notify,
    ) -> Result<(), RateLimitCancelled> {
        loop {
            if self.allow(key) {
                return Ok(());
            }
            let sleep = tokio::time::sleep(Duration::from_millis(
                (1000.0 / self.rate).ceil() as u64,
            ));
            tokio::select! {
                () = sleep => continue,
                () = cancel.notified() => return Err(RateLimitCancelled),
            }
        }
    }

    /// Administrative reset of a single key's bucket.
    pub fn reset(&self, key: &str) {
        self.buckets.remove(key);
    }

    /// Drop keys whose bucket hasn't been touched in `older_than` (memory
    /// bound only — not required for correctness, recommended by §9).
    pub fn sweep(&self, older_than: Duration) {
        let now = Instant::now();
        self.buckets.retain(|_, state| {
            let state = state.lock().expect("rate limiter mutex poisoned");
            now.duration_since(state.last_refill) < older_than
        });
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitCancelled;

struct WindowState {
    hits: VecDeque<Instant>,
}

/// Sliding-window limiter: at most `limit` admissions within `window`.
pub struct SlidingWindow {
    limit: usize,
    window: Duration,
    keys: DashMap<String, Mutex<WindowState>>,
}

impl SlidingWindow {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit.max(1) as usize,
            window,
            keys: DashMap::new(),
        }
    }

    pub fn allow(&self, key: &str) -> bool {
        let entry = self.keys.entry(key.to_string()).or_insert_with(|| {
            Mutex::new(WindowState {
                hits: VecDeque::new(),
            })
        });
        let mut state = entry.lock().expect("rate limiter mutex poisoned");
        let now = Instant::now();
        while let Some(&front) = state.hits.front() {
            if now.duration_since(front) > self.window {
                state.hits.pop_front();
            } else {
                break;
            }
        }
        if state.hits.len() < self.limit {
            state.hits.push_back(now);
            true
        } else {
            false
        }
    }

    pub fn reset(&self, key: &str) {
        self.keys.remove(key);
    }

    pub fn sweep(&self, older_than: Duration) {
        let now = Instant::now();
        self.keys.retain(|_, state| {
            let state = state.lock().expect("rate limiter mutex poisoned");
            state
                .hits
                .back()
                .is_some_and(|&last| now.duration_since(last) < older_than)
        });
    }
}

/// Spawn a background sweep for both limiter kinds, mirroring
/// `crate::utils::limiter::periodic_rate_limit_report`'s periodic-task shape.
pub fn spawn_periodic_sweep(
    token_buckets: std::sync::Arc<TokenBucket>,
    sliding_windows: std::sync::Arc<SlidingWindow>,
    interval: Duration,
    idle_threshold: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            token_buckets.sweep(idle_threshold);
            sliding_windows.sweep(idle_threshold);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_bucket_admits_at_most_rate_times_t_plus_burst() {
        let bucket = TokenBucket::new(10.0, 5);
        let mut admitted = 0;
        for _ in 0..100 {
            if bucket.allow("k") {
                admitted += 1;
            }
        }
        // At t=0 only burst tokens are available.
        assert_eq!(admitted, 5);
    }

    #[test]
    fn token_bucket_keys_are_independent() {
        let bucket = TokenBucket::new(1.0, 2);
        assert!(bucket.allow("a"));
        assert!(bucket.allow("a"));
        assert!(!bucket.allow("a"));
        assert!(bucket.allow("b"));
    }

    #[test]
    fn sliding_window_admits_exactly_limit_within_window() {
        let window = SlidingWindow::new(2, Duration::from_secs(1));
        assert!(window.allow("conv"));
        assert!(window.allow("conv"));
        assert!(!window.allow("conv"));
    }

    #[test]
    fn sliding_window_reset_clears_state() {
        let window = SlidingWindow::new(1, Duration::from_secs(60));
        assert!(window.allow("k"));
        assert!(!window.allow("k"));
        window.reset("k");
        assert!(window.allow("k"));
    }
}
