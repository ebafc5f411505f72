//! Atomic counters and a bounded latency sample ring.
//!
//! Counters follow the lock-free style already used for
//! [`crate::utils::limiter::RATE_LIMITED_COUNTERS`]: plain `AtomicU64`s, no
//! locking on the hot path. Only the latency ring (small, capped at 1024
//! samples) takes a dedicated mutex, since percentiles require a sorted
//! snapshot rather than a running aggregate.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const DEFAULT_LATENCY_SAMPLE_CAP: usize = 1024;

#[derive(Debug, Default)]
struct Counter(AtomicU64);

impl Counter {
    fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
pub struct MetricsCollector {
    start: Option<Instant>,
    connections_total: Counter,
    connections_active: AtomicU64,
    connections_disconnected: Counter,
    connections_failed: Counter,
    messages_sent: Counter,
    messages_received: Counter,
    messages_send_failed: Counter,
    messages_dropped: Counter,
    bytes_sent: Counter,
    bytes_received: Counter,
    errors_total: Counter,
    errors_by_type: dashmap::DashMap<&'static str, AtomicU64>,
    latency_samples: Mutex<VecDeque<Duration>>,
    latency_cap: usize,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            start: Some(Instant::now()),
            latency_cap: DEFAULT_LATENCY_SAMPLE_CAP,
            ..Default::default()
        }
    }

    pub fn connection_opened(&self) {
        self.connections_total.inc();
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
        self.connections_disconnected.inc();
    }

    pub fn connection_failed(&self) {
        self.connections_failed.inc();
    }

    pub fn message_received(&self, bytes: usize) {
        self.messages_received.inc();
        self.bytes_received.add(bytes as u64);
    }

    pub fn message_sent(&self, bytes: usize) {
        self.messages_sent.inc();
        self.bytes_sent.add(bytes as u64);
    }

    pub fn message_send_failed(&self) {
        self.messages_send_failed.inc();
    }

    pub fn message_dropped(&self) {
        self.messages_dropped.inc();
    }

    pub fn error(&self, kind: &'static str) {
        self.errors_total.inc();
        self.errors_by_type
            .entry(kind)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record a latency sample, evicting the oldest (FIFO) once the cap is
    /// reached.
    pub fn record_latency(&self, d: Duration) {
        let mut samples = self.latency_samples.lock().expect("poisoned");
        if samples.len() >= self.latency_cap {
            samples.pop_front();
        }
        samples.push_back(d);
    }

    pub fn snapshot(&self) -> Snapshot {
        let samples = self.latency_samples.lock().expect("poisoned");
        let mut sorted: Vec<Duration> = samples.iter().copied().collect();
        sorted.sort_unstable();

        let percentile = |p: f64| -> Duration {
            if sorted.is_empty() {
                return Duration::ZERO;
            }
            let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
            sorted[idx.min(sorted.len() - 1)]
        };

        let avg = if sorted.is_empty() {
            Duration::ZERO
        } else {
            sorted.iter().sum::<Duration>() / sorted.len() as u32
        };

        Snapshot {
            uptime: self
                .start
                .map(|s| s.elapsed())
                .unwrap_or(Duration::ZERO),
            connections_total: self.connections_total.get(),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_disconnected: self.connections_disconnected.get(),
            connections_failed: self.connections_failed.get(),
            messages_sent: self.messages_sent.get(),
            messages_received: self.messages_received.get(),
            messages_send_failed: self.messages_send_failed.get(),
            messages_dropped: self.messages_dropped.get(),
            bytes_sent: self.bytes_sent.get(),
            bytes_received: self.bytes_received.get(),
            errors_total: self.errors_total.get(),
            errors_by_type: self
                .errors_by_type
                .iter()
                .map(|e| (*e.key(), e.value().load(Ordering::Relaxed)))
                .collect(),
            latency_avg: avg,
            latency_p50: percentile(0.50),
            latency_p95: percentile(0.95),
            latency_p99: percentile(0.99),
        }
    }
}

/// A point-in-time rendering of all metrics, suitable for exposing at an
/// HTTP boundary (serialization format is outside this core's scope).
#[derive(Debug, Clone, serde::Serialize)]
pub struct Snapshot {
    pub uptime: Duration,
    pub connections_total: u64,
    pub connections_active: u64,
    pub connections_disconnected: u64,
    pub connections_failed: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub messages_send_failed: u64,
    pub messages_dropped: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub errors_total: u64,
    pub errors_by_type: std::collections::HashMap<&'static str, u64>,
    pub latency_avg: Duration,
    pub latency_p50: Duration,
    pub latency_p95: Duration,
    pub latency_p99: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_counters_track_open_close() {
        let m = MetricsCollector::new();
        m.connection_opened();
        m.connection_opened();
        m.connection_closed();
        let snap = m.snapshot();
        assert_eq!(snap.connections_total, 2);
        assert_eq!(snap.connections_active, 1);
        assert_eq!(snap.connections_disconnected, 1);
    }

    #[test]
    fn latency_ring_is_fifo_bounded() {
        let m = MetricsCollector {
            latency_cap: 3,
            ..MetricsCollector::new()
        };
        for ms in [10, 20, 30, 40] {
            m.record_latency(Duration::from_millis(ms));
        }
        let snap = m.snapshot();
        // Oldest sample (10ms) should have been evicted.
        assert_eq!(snap.latency_p50, Duration::from_millis(30));
    }

    #[test]
    fn percentiles_are_monotonic() {
        let m = MetricsCollector::new();
        for ms in 1..=100u64 {
            m.record_latency(Duration::from_millis(ms));
        }
        let snap = m.snapshot();
        assert!(snap.latency_p50 <= snap.latency_p95);
        assert!(snap.latency_p95 <= snap.latency_p99);
    }
}
