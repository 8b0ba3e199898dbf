//! Metrics tracking for the sync engine.
//!
//! Provides atomic counters for monitoring chunk fetching and event
//! application.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::events::EventKind;

/// Metrics for one chain's sync engine.
#[derive(Debug)]
pub struct SyncMetrics {
    /// Chunks fetched.
    chunks_fetched: AtomicU64,

    /// Per-kind log queries issued.
    log_queries: AtomicU64,

    /// Chunks skipped because the live nonce showed nothing new.
    fast_path_skips: AtomicU64,

    /// Events applied, indexed by [`kind_index`].
    events_applied: [AtomicU64; 5],

    /// Events skipped because an event record already existed.
    replays_skipped: AtomicU64,

    /// Failed event applies.
    apply_errors: AtomicU64,

    /// Nonce gaps detected.
    gaps_detected: AtomicU64,

    /// Watermark rewinds for a stale live nonce.
    stale_rewinds: AtomicU64,

    /// Total apply time in nanoseconds.
    total_apply_time_ns: AtomicU64,

    /// Start time for rate calculation.
    start_time: Instant,
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

const fn kind_index(kind: EventKind) -> usize {
    match kind {
        EventKind::Deposit => 0,
        EventKind::Redeem => 1,
        EventKind::VaultCreated => 2,
        EventKind::Rebalance => 3,
        EventKind::ParamsUpdated => 4,
    }
}

impl SyncMetrics {
    /// Creates a new metrics instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            chunks_fetched: AtomicU64::new(0),
            log_queries: AtomicU64::new(0),
            fast_path_skips: AtomicU64::new(0),
            events_applied: Default::default(),
            replays_skipped: AtomicU64::new(0),
            apply_errors: AtomicU64::new(0),
            gaps_detected: AtomicU64::new(0),
            stale_rewinds: AtomicU64::new(0),
            total_apply_time_ns: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Records a fetched chunk.
    pub fn record_chunk(&self) {
        self.chunks_fetched.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a log query.
    pub fn record_log_query(&self) {
        self.log_queries.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a chunk skipped by the nonce fast path.
    pub fn record_fast_path(&self) {
        self.fast_path_skips.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an applied event.
    pub fn record_applied(&self, kind: EventKind, duration: Duration) {
        self.events_applied[kind_index(kind)].fetch_add(1, Ordering::Relaxed);
        self.total_apply_time_ns.fetch_add(
            u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
    }

    /// Records a replayed event.
    pub fn record_replay(&self) {
        self.replays_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed apply.
    pub fn record_apply_error(&self) {
        self.apply_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a nonce gap.
    pub fn record_gap(&self) {
        self.gaps_detected.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a stale nonce rewind.
    pub fn record_stale_rewind(&self) {
        self.stale_rewinds.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the chunks fetched.
    #[must_use]
    pub fn chunks_fetched(&self) -> u64 {
        self.chunks_fetched.load(Ordering::Relaxed)
    }

    /// Returns the log queries issued.
    #[must_use]
    pub fn log_queries(&self) -> u64 {
        self.log_queries.load(Ordering::Relaxed)
    }

    /// Returns the fast path skips.
    #[must_use]
    pub fn fast_path_skips(&self) -> u64 {
        self.fast_path_skips.load(Ordering::Relaxed)
    }

    /// Returns the events applied of one kind.
    #[must_use]
    pub fn events_applied_of(&self, kind: EventKind) -> u64 {
        self.events_applied[kind_index(kind)].load(Ordering::Relaxed)
    }

    /// Returns the events applied of all kinds.
    #[must_use]
    pub fn events_applied(&self) -> u64 {
        self.events_applied
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }

    /// Returns the replays skipped.
    #[must_use]
    pub fn replays_skipped(&self) -> u64 {
        self.replays_skipped.load(Ordering::Relaxed)
    }

    /// Returns the failed applies.
    #[must_use]
    pub fn apply_errors(&self) -> u64 {
        self.apply_errors.load(Ordering::Relaxed)
    }

    /// Returns the gaps detected.
    #[must_use]
    pub fn gaps_detected(&self) -> u64 {
        self.gaps_detected.load(Ordering::Relaxed)
    }

    /// Returns the stale nonce rewinds.
    #[must_use]
    pub fn stale_rewinds(&self) -> u64 {
        self.stale_rewinds.load(Ordering::Relaxed)
    }

    /// Returns the average apply time per event.
    #[must_use]
    pub fn average_apply_time(&self) -> Duration {
        let count = self.events_applied();
        if count == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.total_apply_time_ns.load(Ordering::Relaxed) / count)
    }

    /// Returns the events applied per second since start.
    #[must_use]
    pub fn events_per_second(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.events_applied() as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Returns the error rate (0.0 to 1.0).
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        let total = self.events_applied() + self.apply_errors();
        if total == 0 {
            return 0.0;
        }
        self.apply_errors() as f64 / total as f64
    }

    /// Returns a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        SyncMetricsSnapshot {
            chunks_fetched: self.chunks_fetched(),
            log_queries: self.log_queries(),
            fast_path_skips: self.fast_path_skips(),
            events_applied: self.events_applied(),
            deposits_applied: self.events_applied_of(EventKind::Deposit),
            redeems_applied: self.events_applied_of(EventKind::Redeem),
            replays_skipped: self.replays_skipped(),
            apply_errors: self.apply_errors(),
            gaps_detected: self.gaps_detected(),
            stale_rewinds: self.stale_rewinds(),
            average_apply_time: self.average_apply_time(),
            events_per_second: self.events_per_second(),
            error_rate: self.error_rate(),
        }
    }
}

/// A point-in-time snapshot of sync metrics.
#[derive(Debug, Clone)]
pub struct SyncMetricsSnapshot {
    /// Chunks fetched.
    pub chunks_fetched: u64,
    /// Log queries issued.
    pub log_queries: u64,
    /// Fast path skips.
    pub fast_path_skips: u64,
    /// Events applied.
    pub events_applied: u64,
    /// Deposits applied.
    pub deposits_applied: u64,
    /// Redemptions applied.
    pub redeems_applied: u64,
    /// Replays skipped.
    pub replays_skipped: u64,
    /// Failed applies.
    pub apply_errors: u64,
    /// Gaps detected.
    pub gaps_detected: u64,
    /// Stale nonce rewinds.
    pub stale_rewinds: u64,
    /// Average apply time.
    pub average_apply_time: Duration,
    /// Events per second.
    pub events_per_second: f64,
    /// Error rate.
    pub error_rate: f64,
}
