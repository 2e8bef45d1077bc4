//! Observability infrastructure for the connection pool.
//!
//! Provides lock-free counters and a timer; log events are emitted through
//! `tracing` when the `tracing` feature is enabled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Pool metrics collector.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    /// Total dial attempts (warm-up and on demand).
    pub dials_attempted: AtomicU64,
    /// Failed dial attempts.
    pub dials_failed: AtomicU64,
    /// Connections handed out by `get`.
    pub checkouts: AtomicU64,
    /// Checkouts served from the idle set.
    pub idle_hits: AtomicU64,
    /// `get` calls rejected at the ceiling.
    pub exhausted: AtomicU64,
    /// Connections returned to the idle set.
    pub reclaimed: AtomicU64,
    /// Connections closed instead of re-idled.
    pub discarded: AtomicU64,
    /// Connections detached from the pool by their holder.
    pub detached: AtomicU64,
    /// Failed connection shutdowns.
    pub close_failures: AtomicU64,
}

impl PoolMetrics {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a dial attempt.
    pub fn record_dial(&self, success: bool) {
        self.dials_attempted.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.dials_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records a checkout.
    pub fn record_checkout(&self, from_idle: bool) {
        self.checkouts.fetch_add(1, Ordering::Relaxed);
        if from_idle {
            self.idle_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records a `get` rejected at the ceiling.
    pub fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a connection going back to the idle set.
    pub fn record_reclaim(&self) {
        self.reclaimed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a connection being discarded.
    pub fn record_discard(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a connection detached by its holder.
    pub fn record_detach(&self) {
        self.detached.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed shutdown.
    pub fn record_close_failure(&self) {
        self.close_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            dials_attempted: self.dials_attempted.load(Ordering::Relaxed),
            dials_failed: self.dials_failed.load(Ordering::Relaxed),
            checkouts: self.checkouts.load(Ordering::Relaxed),
            idle_hits: self.idle_hits.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            detached: self.detached.load(Ordering::Relaxed),
            close_failures: self.close_failures.load(Ordering::Relaxed),
        }
    }

    /// Resets all metrics.
    pub fn reset(&self) {
        self.dials_attempted.store(0, Ordering::Relaxed);
        self.dials_failed.store(0, Ordering::Relaxed);
        self.checkouts.store(0, Ordering::Relaxed);
        self.idle_hits.store(0, Ordering::Relaxed);
        self.exhausted.store(0, Ordering::Relaxed);
        self.reclaimed.store(0, Ordering::Relaxed);
        self.discarded.store(0, Ordering::Relaxed);
        self.detached.store(0, Ordering::Relaxed);
        self.close_failures.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Total dial attempts.
    pub dials_attempted: u64,
    /// Failed dial attempts.
    pub dials_failed: u64,
    /// Connections handed out.
    pub checkouts: u64,
    /// Checkouts served from the idle set.
    pub idle_hits: u64,
    /// Exhausted `get` calls.
    pub exhausted: u64,
    /// Connections re-idled.
    pub reclaimed: u64,
    /// Connections discarded.
    pub discarded: u64,
    /// Connections detached.
    pub detached: u64,
    /// Failed shutdowns.
    pub close_failures: u64,
}

impl MetricsSnapshot {
    /// Returns the dial success rate.
    pub fn dial_success_rate(&self) -> f64 {
        if self.dials_attempted == 0 {
            1.0
        } else {
            (self.dials_attempted - self.dials_failed) as f64 / self.dials_attempted as f64
        }
    }

    /// Returns the share of checkouts served without dialing.
    pub fn reuse_rate(&self) -> f64 {
        if self.checkouts == 0 {
            0.0
        } else {
            self.idle_hits as f64 / self.checkouts as f64
        }
    }
}

/// Timer for measuring operation duration.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    #[cfg_attr(not(feature = "tracing"), allow(dead_code))]
    name: &'static str,
}

impl Timer {
    /// Creates and starts a new timer.
    pub fn start(name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            name,
        }
    }

    /// Stops the timer and returns the duration.
    pub fn stop(self) -> Duration {
        let elapsed = self.start.elapsed();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            timer = self.name,
            duration_ms = elapsed.as_millis() as u64,
            "Timer stopped"
        );

        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let metrics = PoolMetrics::new();

        metrics.record_dial(true);
        metrics.record_dial(true);
        metrics.record_dial(false);
        metrics.record_checkout(true);
        metrics.record_checkout(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.dials_attempted, 3);
        assert_eq!(snapshot.dials_failed, 1);
        assert!((snapshot.dial_success_rate() - 0.666).abs() < 0.01);
        assert!((snapshot.reuse_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_metrics_reset() {
        let metrics = PoolMetrics::new();
        metrics.record_discard();
        metrics.record_exhausted();
        metrics.reset();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.discarded, 0);
        assert_eq!(snapshot.exhausted, 0);
        assert_eq!(snapshot.reuse_rate(), 0.0);
    }

    #[test]
    fn test_timer() {
        let timer = Timer::start("test");
        std::thread::sleep(Duration::from_millis(10));
        let duration = timer.stop();
        assert!(duration >= Duration::from_millis(10));
    }
}
