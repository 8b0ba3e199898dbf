//! RPC client metrics.
//!
//! Provides atomic counters for monitoring chain reads.

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics for the resilient RPC client.
#[derive(Debug, Default)]
pub struct RpcMetrics {
    /// Total attempts sent to an endpoint.
    requests: AtomicU64,

    /// Attempts that succeeded.
    successes: AtomicU64,

    /// Attempts that failed.
    failures: AtomicU64,

    /// Failures classified as throttling or credential problems.
    rate_limited: AtomicU64,

    /// Switches to another endpoint.
    rotations: AtomicU64,

    /// Admission denials from the window limiter.
    admission_denials: AtomicU64,

    /// Sleeps on admission denial with no alternate endpoint.
    throttle_waits: AtomicU64,

    /// Backoff sleeps after transient errors.
    backoff_retries: AtomicU64,

    /// Calls that exhausted every attempt.
    exhausted: AtomicU64,
}

/// Point-in-time copy of [`RpcMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RpcMetricsSnapshot {
    /// Total attempts.
    pub requests: u64,
    /// Successful attempts.
    pub successes: u64,
    /// Failed attempts.
    pub failures: u64,
    /// Throttling failures.
    pub rate_limited: u64,
    /// Endpoint rotations.
    pub rotations: u64,
    /// Admission denials.
    pub admission_denials: u64,
    /// Admission waits.
    pub throttle_waits: u64,
    /// Backoff sleeps.
    pub backoff_retries: u64,
    /// Exhausted calls.
    pub exhausted: u64,
}

impl RpcMetrics {
    /// Creates a new metrics instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an attempt.
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful attempt.
    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed attempt.
    pub fn record_failure(&self, rate_limited: bool) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        if rate_limited {
            self.rate_limited.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records an endpoint rotation.
    pub fn record_rotation(&self) {
        self.rotations.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an admission denial.
    pub fn record_admission_denied(&self) {
        self.admission_denials.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a sleep on admission denial.
    pub fn record_throttle_wait(&self) {
        self.throttle_waits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a backoff sleep.
    pub fn record_backoff(&self) {
        self.backoff_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a call that ran out of attempts.
    pub fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the total attempts.
    #[must_use]
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Returns the successful attempts.
    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    /// Returns the failed attempts.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Returns the rate-limited failures.
    #[must_use]
    pub fn rate_limited(&self) -> u64 {
        self.rate_limited.load(Ordering::Relaxed)
    }

    /// Returns the endpoint rotations.
    #[must_use]
    pub fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::Relaxed)
    }

    /// Returns the admission denials.
    #[must_use]
    pub fn admission_denials(&self) -> u64 {
        self.admission_denials.load(Ordering::Relaxed)
    }

    /// Returns the calls that ran out of attempts.
    #[must_use]
    pub fn exhausted(&self) -> u64 {
        self.exhausted.load(Ordering::Relaxed)
    }

    /// Returns the admission waits.
    #[must_use]
    pub fn throttle_waits(&self) -> u64 {
        self.throttle_waits.load(Ordering::Relaxed)
    }

    /// Returns the backoff sleeps.
    #[must_use]
    pub fn backoff_retries(&self) -> u64 {
        self.backoff_retries.load(Ordering::Relaxed)
    }

    /// Returns a copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> RpcMetricsSnapshot {
        RpcMetricsSnapshot {
            requests: self.requests(),
            successes: self.successes(),
            failures: self.failures(),
            rate_limited: self.rate_limited(),
            rotations: self.rotations(),
            admission_denials: self.admission_denials(),
            throttle_waits: self.throttle_waits(),
            backoff_retries: self.backoff_retries(),
            exhausted: self.exhausted(),
        }
    }

    /// Returns the failure rate (0.0 to 1.0).
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        let total = self.requests();
        if total == 0 {
            return 0.0;
        }
        self.failures() as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_counts() {
        let metrics = RpcMetrics::new();
        metrics.record_request();
        metrics.record_request();
        metrics.record_success();
        metrics.record_failure(true);
        metrics.record_rotation();

        assert_eq!(metrics.requests(), 2);
        assert_eq!(metrics.successes(), 1);
        assert_eq!(metrics.failures(), 1);
        assert_eq!(metrics.rate_limited(), 1);
        assert_eq!(metrics.rotations(), 1);
        assert!((metrics.failure_rate() - 0.5).abs() < f64::EPSILON);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests, 2);
        assert_eq!(snapshot.backoff_retries, 0);
    }

    #[test]
    fn test_failure_rate_empty() {
        assert_eq!(RpcMetrics::new().failure_rate(), 0.0);
    }
}
