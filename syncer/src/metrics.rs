//! Syncer service metrics.
//!
//! Provides atomic counters for monitoring ticks and per-chain sync runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Metrics for the syncer service.
#[derive(Debug)]
pub struct ServiceMetrics {
    /// Ticks that ran.
    ticks_started: AtomicU64,

    /// Ticks skipped because one was already running.
    ticks_skipped: AtomicU64,

    /// Ticks that finished.
    ticks_completed: AtomicU64,

    /// Chain sync runs that succeeded.
    chain_syncs: AtomicU64,

    /// Chain sync runs that failed.
    chain_failures: AtomicU64,

    /// Events applied across all chains.
    events_applied: AtomicU64,

    /// Duration of the last finished tick in milliseconds.
    last_tick_ms: AtomicU64,

    /// Start time for uptime.
    start_time: Instant,
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceMetrics {
    /// Creates a new metrics instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ticks_started: AtomicU64::new(0),
            ticks_skipped: AtomicU64::new(0),
            ticks_completed: AtomicU64::new(0),
            chain_syncs: AtomicU64::new(0),
            chain_failures: AtomicU64::new(0),
            events_applied: AtomicU64::new(0),
            last_tick_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Records a started tick.
    pub fn record_tick_started(&self) {
        self.ticks_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a skipped tick.
    pub fn record_tick_skipped(&self) {
        self.ticks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a finished tick.
    pub fn record_tick_completed(&self, duration: Duration) {
        self.ticks_completed.fetch_add(1, Ordering::Relaxed);
        self.last_tick_ms.store(
            u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
    }

    /// Records a successful chain sync.
    pub fn record_chain_success(&self, applied: u64) {
        self.chain_syncs.fetch_add(1, Ordering::Relaxed);
        self.events_applied.fetch_add(applied, Ordering::Relaxed);
    }

    /// Records a failed chain sync.
    pub fn record_chain_failure(&self) {
        self.chain_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns ticks started.
    #[must_use]
    pub fn ticks_started(&self) -> u64 {
        self.ticks_started.load(Ordering::Relaxed)
    }

    /// Returns ticks skipped.
    #[must_use]
    pub fn ticks_skipped(&self) -> u64 {
        self.ticks_skipped.load(Ordering::Relaxed)
    }

    /// Returns ticks completed.
    #[must_use]
    pub fn ticks_completed(&self) -> u64 {
        self.ticks_completed.load(Ordering::Relaxed)
    }

    /// Returns successful chain syncs.
    #[must_use]
    pub fn chain_syncs(&self) -> u64 {
        self.chain_syncs.load(Ordering::Relaxed)
    }

    /// Returns failed chain syncs.
    #[must_use]
    pub fn chain_failures(&self) -> u64 {
        self.chain_failures.load(Ordering::Relaxed)
    }

    /// Returns events applied.
    #[must_use]
    pub fn events_applied(&self) -> u64 {
        self.events_applied.load(Ordering::Relaxed)
    }

    /// Returns the last tick duration.
    #[must_use]
    pub fn last_tick_duration(&self) -> Duration {
        Duration::from_millis(self.last_tick_ms.load(Ordering::Relaxed))
    }

    /// Returns the uptime.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Returns a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> ServiceMetricsSnapshot {
        ServiceMetricsSnapshot {
            ticks_started: self.ticks_started(),
            ticks_skipped: self.ticks_skipped(),
            ticks_completed: self.ticks_completed(),
            chain_syncs: self.chain_syncs(),
            chain_failures: self.chain_failures(),
            events_applied: self.events_applied(),
            last_tick_duration: self.last_tick_duration(),
            uptime: self.uptime(),
        }
    }
}

/// A point-in-time snapshot of service metrics.
#[derive(Debug, Clone)]
pub struct ServiceMetricsSnapshot {
    /// Ticks started.
    pub ticks_started: u64,
    /// Ticks skipped.
    pub ticks_skipped: u64,
    /// Ticks completed.
    pub ticks_completed: u64,
    /// Successful chain syncs.
    pub chain_syncs: u64,
    /// Failed chain syncs.
    pub chain_failures: u64,
    /// Events applied.
    pub events_applied: u64,
    /// Last tick duration.
    pub last_tick_duration: Duration,
    /// Uptime.
    pub uptime: Duration,
}
