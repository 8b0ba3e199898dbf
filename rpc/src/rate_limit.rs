//! Sliding-window admission control.
//!
//! Requests per chain are counted in fixed buckets of `window_ms`. The
//! effective count weights the previous bucket by the part of it that
//! still overlaps a continuous window ending now:
//!
//! ```text
//! effective = current + previous * (1 - elapsed_fraction_of_current_bucket)
//! ```
//!
//! Counters live in a shared [`CounterStore`] (Redis in production) so
//! several processes share one quota. If the shared store fails, the
//! limiter answers from an in-process store with the same windowing, so
//! ingestion never halts because the counter backend is down.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use deadpool_redis::{redis, Pool};
use tracing::warn;

use crate::config::RateLimitConfig;
use crate::error::RpcError;
use crate::ChainId;

/// Expired in-memory counters are pruned once the map grows past this size.
const PRUNE_THRESHOLD: usize = 1_024;

/// Counts read from the two buckets that make up a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowCounts {
    /// Count in the current bucket, including this request.
    pub current: u64,

    /// Count in the previous bucket.
    pub previous: u64,
}

/// Storage for window counters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increments `current_key`, refreshes its TTL and reads `previous_key`
    /// in a single round-trip.
    async fn hit(
        &self,
        current_key: &str,
        previous_key: &str,
        ttl_secs: u64,
    ) -> Result<WindowCounts, RpcError>;

    /// Deletes the given counters.
    async fn reset(&self, keys: &[String]) -> Result<(), RpcError>;
}

/// Redis-backed counter store.
#[derive(Clone)]
pub struct RedisCounterStore {
    pool: Pool,
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore").finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    /// Creates a store over an existing connection pool.
    #[must_use]
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Creates a store from a Redis URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be created.
    pub fn from_url(url: &str) -> Result<Self, RpcError> {
        let pool = deadpool_redis::Config::from_url(url)
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| RpcError::CounterStore(e.to_string()))?;
        Ok(Self::new(pool))
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, RpcError> {
        self.pool
            .get()
            .await
            .map_err(|e| RpcError::CounterStore(e.to_string()))
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn hit(
        &self,
        current_key: &str,
        previous_key: &str,
        ttl_secs: u64,
    ) -> Result<WindowCounts, RpcError> {
        let mut conn = self.connection().await?;
        let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX);

        let (current, previous): (u64, Option<u64>) = redis::pipe()
            .atomic()
            .incr(current_key, 1u64)
            .expire(current_key, ttl)
            .ignore()
            .get(previous_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| RpcError::CounterStore(e.to_string()))?;

        Ok(WindowCounts {
            current,
            previous: previous.unwrap_or(0),
        })
    }

    async fn reset(&self, keys: &[String]) -> Result<(), RpcError> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection().await?;
        let _: () = redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| RpcError::CounterStore(e.to_string()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct MemoryCounter {
    count: u64,
    expires_at: Instant,
}

/// In-process counter store.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: DashMap<String, MemoryCounter>,
}

impl MemoryCounterStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live counters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Returns true if no counters are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    fn read(&self, key: &str, now: Instant) -> u64 {
        self.counters
            .get(key)
            .filter(|c| c.expires_at > now)
            .map(|c| c.count)
            .unwrap_or(0)
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn hit(
        &self,
        current_key: &str,
        previous_key: &str,
        ttl_secs: u64,
    ) -> Result<WindowCounts, RpcError> {
        let now = Instant::now();
        let expires_at = now
            .checked_add(Duration::from_secs(ttl_secs))
            .unwrap_or(now);

        if self.counters.len() > PRUNE_THRESHOLD {
            self.counters.retain(|_, c| c.expires_at > now);
        }

        // Guard dropped before the second lookup; both keys may share a shard.
        let current = {
            let mut counter = self
                .counters
                .entry(current_key.to_string())
                .or_insert(MemoryCounter {
                    count: 0,
                    expires_at,
                });
            if counter.expires_at <= now {
                counter.count = 0;
            }
            counter.count = counter.count.saturating_add(1);
            counter.expires_at = expires_at;
            counter.count
        };

        Ok(WindowCounts {
            current,
            previous: self.read(previous_key, now),
        })
    }

    async fn reset(&self, keys: &[String]) -> Result<(), RpcError> {
        for key in keys {
            self.counters.remove(key);
        }
        Ok(())
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Request may proceed.
    Allowed,

    /// Request exceeds the window budget.
    Denied {
        /// Time until the current bucket closes.
        wait: Duration,
    },
}

impl Admission {
    /// Returns true if the request was admitted.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Returns the suggested wait for a denied request.
    #[must_use]
    pub const fn wait_time(&self) -> Option<Duration> {
        match self {
            Self::Allowed => None,
            Self::Denied { wait } => Some(*wait),
        }
    }
}

/// Per-chain sliding-window rate limiter.
pub struct RateLimiter {
    default_limit: RateLimitConfig,
    limits: HashMap<ChainId, RateLimitConfig>,
    shared: Option<Arc<dyn CounterStore>>,
    fallback: MemoryCounterStore,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("default_limit", &self.default_limit)
            .field("limits", &self.limits)
            .field("shared", &self.shared.is_some())
            .finish()
    }
}

impl RateLimiter {
    /// Creates a limiter that only counts in process.
    #[must_use]
    pub fn new(default_limit: RateLimitConfig) -> Self {
        Self {
            default_limit,
            limits: HashMap::new(),
            shared: None,
            fallback: MemoryCounterStore::new(),
        }
    }

    /// Uses a shared counter store, keeping the in-process store as fallback.
    #[must_use]
    pub fn with_shared_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.shared = Some(store);
        self
    }

    /// Sets a chain-specific limit.
    #[must_use]
    pub fn with_chain_limit(mut self, chain: ChainId, limit: RateLimitConfig) -> Self {
        self.limits.insert(chain, limit);
        self
    }

    /// Returns the limit applied to a chain.
    #[must_use]
    pub fn limit(&self, chain: ChainId) -> RateLimitConfig {
        self.limits
            .get(&chain)
            .copied()
            .unwrap_or(self.default_limit)
    }

    /// Checks and records one request for a chain.
    pub async fn check(&self, chain: ChainId) -> Admission {
        self.check_at(chain, now_ms()).await
    }

    /// Checks and records one request for a chain at `now_ms` (Unix millis).
    pub async fn check_at(&self, chain: ChainId, now_ms: u64) -> Admission {
        let limit = self.limit(chain);
        let window = limit.window_ms.max(1);
        let bucket = now_ms / window * window;
        let current_key = bucket_key(chain, bucket);
        let previous_key = bucket_key(chain, bucket.saturating_sub(window));
        let ttl_secs = ttl_secs(window);

        let counts = match &self.shared {
            Some(store) => match store.hit(&current_key, &previous_key, ttl_secs).await {
                Ok(counts) => counts,
                Err(e) => {
                    warn!(chain_id = chain, error = %e, "shared rate-limit store unavailable, using local counters");
                    self.local_hit(&current_key, &previous_key, ttl_secs).await
                }
            },
            None => self.local_hit(&current_key, &previous_key, ttl_secs).await,
        };

        let elapsed_fraction = (now_ms - bucket) as f64 / window as f64;
        let effective = counts.current as f64 + counts.previous as f64 * (1.0 - elapsed_fraction);

        if effective <= limit.max_requests as f64 {
            Admission::Allowed
        } else {
            let wait = (bucket + window).saturating_sub(now_ms).max(1);
            Admission::Denied {
                wait: Duration::from_millis(wait),
            }
        }
    }

    /// Clears the window counters of a chain.
    ///
    /// Used after rotating to another upstream endpoint, which has its own
    /// provider quota.
    pub async fn reset(&self, chain: ChainId) {
        self.reset_at(chain, now_ms()).await;
    }

    /// Clears the window counters of a chain as seen at `now_ms`.
    pub async fn reset_at(&self, chain: ChainId, now_ms: u64) {
        let window = self.limit(chain).window_ms.max(1);
        let bucket = now_ms / window * window;
        let keys = vec![
            bucket_key(chain, bucket),
            bucket_key(chain, bucket.saturating_sub(window)),
        ];

        if let Some(store) = &self.shared {
            if let Err(e) = store.reset(&keys).await {
                warn!(chain_id = chain, error = %e, "failed to reset shared rate-limit counters");
            }
        }
        // Infallible for the in-process store
        let _ = self.fallback.reset(&keys).await;
    }

    async fn local_hit(&self, current_key: &str, previous_key: &str, ttl_secs: u64) -> WindowCounts {
        self.fallback
            .hit(current_key, previous_key, ttl_secs)
            .await
            .unwrap_or_default()
    }
}

fn bucket_key(chain: ChainId, bucket_start_ms: u64) -> String {
    format!("ratelimit:{chain}:{bucket_start_ms}")
}

/// Counters must outlive the bucket after theirs, so keep them two windows.
fn ttl_secs(window_ms: u64) -> u64 {
    window_ms.saturating_mul(2).div_ceil(1_000).max(1)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingStore;

    #[async_trait]
    impl CounterStore for FailingStore {
        async fn hit(&self, _: &str, _: &str, _: u64) -> Result<WindowCounts, RpcError> {
            Err(RpcError::CounterStore("connection refused".to_string()))
        }

        async fn reset(&self, _: &[String]) -> Result<(), RpcError> {
            Err(RpcError::CounterStore("connection refused".to_string()))
        }
    }

    const WINDOW_START: u64 = 1_700_000_000_000;

    #[tokio::test]
    async fn test_admission_within_window() {
        let limiter = RateLimiter::new(RateLimitConfig::new(10, 1_000));

        for i in 0..10 {
            let admission = limiter.check_at(1, WINDOW_START + i * 10).await;
            assert!(admission.is_allowed(), "request {i}");
        }

        let denied = limiter.check_at(1, WINDOW_START + 200).await;
        assert!(!denied.is_allowed());
        assert_eq!(denied.wait_time(), Some(Duration::from_millis(800)));
    }

    #[tokio::test]
    async fn test_admission_after_window_elapses() {
        let limiter = RateLimiter::new(RateLimitConfig::new(10, 1_000));

        for i in 0..11 {
            limiter.check_at(1, WINDOW_START + i).await;
        }
        assert!(!limiter.check_at(1, WINDOW_START + 500).await.is_allowed());

        // Two windows later the old bucket no longer counts
        assert!(limiter.check_at(1, WINDOW_START + 2_000).await.is_allowed());
    }

    #[tokio::test]
    async fn test_previous_bucket_weighting() {
        let limiter = RateLimiter::new(RateLimitConfig::new(10, 1_000));

        for i in 0..10 {
            limiter.check_at(1, WINDOW_START + i).await;
        }

        // 10% into the next bucket: 1 + 10 * 0.9 = 10 -> allowed
        assert!(limiter.check_at(1, WINDOW_START + 1_100).await.is_allowed());
        // 2 + 10 * 0.9 = 11 -> denied
        let denied = limiter.check_at(1, WINDOW_START + 1_100).await;
        assert_eq!(denied.wait_time(), Some(Duration::from_millis(900)));
        // 3 + 10 * 0.4 = 7 -> allowed
        assert!(limiter.check_at(1, WINDOW_START + 1_600).await.is_allowed());
    }

    #[tokio::test]
    async fn test_chains_counted_separately() {
        let limiter = RateLimiter::new(RateLimitConfig::new(1, 1_000))
            .with_chain_limit(8453, RateLimitConfig::new(2, 1_000));

        assert!(limiter.check_at(1, WINDOW_START).await.is_allowed());
        assert!(!limiter.check_at(1, WINDOW_START).await.is_allowed());

        assert!(limiter.check_at(8453, WINDOW_START).await.is_allowed());
        assert!(limiter.check_at(8453, WINDOW_START).await.is_allowed());
        assert!(!limiter.check_at(8453, WINDOW_START).await.is_allowed());
    }

    #[tokio::test]
    async fn test_reset_clears_window() {
        let limiter = RateLimiter::new(RateLimitConfig::new(1, 1_000));

        assert!(limiter.check_at(1, WINDOW_START).await.is_allowed());
        assert!(!limiter.check_at(1, WINDOW_START + 1).await.is_allowed());

        limiter.reset_at(1, WINDOW_START + 2).await;
        assert!(limiter.check_at(1, WINDOW_START + 3).await.is_allowed());
    }

    #[tokio::test]
    async fn test_shared_store_failure_falls_back() {
        let limiter = RateLimiter::new(RateLimitConfig::new(2, 1_000))
            .with_shared_store(Arc::new(FailingStore));

        assert!(limiter.check_at(1, WINDOW_START).await.is_allowed());
        assert!(limiter.check_at(1, WINDOW_START).await.is_allowed());
        assert!(!limiter.check_at(1, WINDOW_START).await.is_allowed());

        limiter.reset_at(1, WINDOW_START).await;
        assert!(limiter.check_at(1, WINDOW_START).await.is_allowed());
    }

    #[tokio::test]
    async fn test_shared_store_is_used() {
        let shared = Arc::new(MemoryCounterStore::new());
        let limiter = RateLimiter::new(RateLimitConfig::new(5, 1_000))
            .with_shared_store(Arc::clone(&shared) as Arc<dyn CounterStore>);

        limiter.check_at(1, WINDOW_START).await;

        assert_eq!(shared.len(), 1);
        assert!(limiter.fallback.is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_counts() {
        let store = MemoryCounterStore::new();

        let counts = store.hit("a", "b", 2).await.expect("hit");
        assert_eq!(counts, WindowCounts { current: 1, previous: 0 });

        store.hit("b", "z", 2).await.expect("hit");
        let counts = store.hit("a", "b", 2).await.expect("hit");
        assert_eq!(counts, WindowCounts { current: 2, previous: 1 });
    }

    #[test]
    fn test_ttl_covers_two_windows() {
        assert_eq!(ttl_secs(1_000), 2);
        assert_eq!(ttl_secs(1_500), 3);
        assert_eq!(ttl_secs(10), 1);
    }

    #[test]
    fn test_bucket_key() {
        assert_eq!(bucket_key(1, 5_000), "ratelimit:1:5000");
    }
}
