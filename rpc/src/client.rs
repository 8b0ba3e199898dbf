//! Resilient multi-endpoint client.
//!
//! Every chain read goes through [`ResilientRpcClient::execute`], which
//! combines three pieces:
//!
//! - sliding-window admission control per chain ([`RateLimiter`])
//! - least-recently-used endpoint selection over healthy endpoints
//!   ([`EndpointHealthTracker`])
//! - immediate failover on throttling errors and exponential backoff on
//!   anything else

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use ethers::types::{Address, Bytes, Filter, Log, Transaction, H256};
use tracing::{debug, warn};

use crate::config::{HealthConfig, RetryConfig, RpcConfig};
use crate::error::RpcError;
use crate::health::EndpointHealthTracker;
use crate::metrics::RpcMetrics;
use crate::rate_limit::{Admission, CounterStore, RateLimiter};
use crate::transport::{ChainTransport, HttpTransport};
use crate::ChainId;

/// Admission re-checks after waiting before a request is sent regardless.
///
/// Denied checks count against the window, so a chain at its limit can stay
/// denied across bucket boundaries.
pub const MAX_ADMISSION_WAITS: u32 = 3;

/// One upstream endpoint.
#[derive(Clone)]
pub struct Endpoint {
    /// Endpoint URL, used as the health key.
    pub url: String,

    /// Transport serving this endpoint.
    pub transport: Arc<dyn ChainTransport>,
}

impl Endpoint {
    /// Creates an endpoint.
    #[must_use]
    pub fn new(url: impl Into<String>, transport: Arc<dyn ChainTransport>) -> Self {
        Self {
            url: url.into(),
            transport,
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint").field("url", &self.url).finish()
    }
}

#[derive(Debug)]
struct ChainEndpointSet {
    endpoints: Vec<Endpoint>,
    urls: Vec<String>,
}

/// Chain reader with per-chain rate limiting, endpoint health and failover.
#[derive(Debug)]
pub struct ResilientRpcClient {
    chains: HashMap<ChainId, ChainEndpointSet>,
    health: EndpointHealthTracker,
    limiter: RateLimiter,
    retry: RetryConfig,
    metrics: RpcMetrics,
}

impl ResilientRpcClient {
    /// Creates a client without endpoints.
    #[must_use]
    pub fn new(retry: RetryConfig, health: HealthConfig, limiter: RateLimiter) -> Self {
        Self {
            chains: HashMap::new(),
            health: EndpointHealthTracker::new(health),
            limiter,
            retry,
            metrics: RpcMetrics::new(),
        }
    }

    /// Registers the endpoints of a chain, in preference order.
    #[must_use]
    pub fn with_endpoints(mut self, chain: ChainId, endpoints: Vec<Endpoint>) -> Self {
        let urls = endpoints.iter().map(|e| e.url.clone()).collect();
        self.chains
            .insert(chain, ChainEndpointSet { endpoints, urls });
        self
    }

    /// Builds a client with one HTTP transport per configured URL.
    ///
    /// # Errors
    ///
    /// Returns an error if a transport cannot be created.
    pub fn from_config(
        config: &RpcConfig,
        shared_counters: Option<Arc<dyn CounterStore>>,
    ) -> Result<Self, RpcError> {
        let mut limiter = RateLimiter::new(config.default_rate_limit);
        if let Some(store) = shared_counters {
            limiter = limiter.with_shared_store(store);
        }
        for chain in &config.chains {
            if let Some(limit) = chain.rate_limit {
                limiter = limiter.with_chain_limit(chain.chain_id, limit);
            }
        }

        let mut client = Self::new(config.retry.clone(), config.health.clone(), limiter);
        for chain in &config.chains {
            let endpoints = chain
                .urls
                .iter()
                .map(|url| {
                    let transport = HttpTransport::new(url.clone(), config.request_timeout())?;
                    Ok(Endpoint::new(url.clone(), Arc::new(transport)))
                })
                .collect::<Result<Vec<_>, RpcError>>()?;
            client = client.with_endpoints(chain.chain_id, endpoints);
        }

        Ok(client)
    }

    /// Returns the endpoint health tracker.
    #[must_use]
    pub const fn health(&self) -> &EndpointHealthTracker {
        &self.health
    }

    /// Returns the client metrics.
    #[must_use]
    pub const fn metrics(&self) -> &RpcMetrics {
        &self.metrics
    }

    /// Returns the admission limiter.
    #[must_use]
    pub const fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Returns the endpoint URLs of a chain.
    #[must_use]
    pub fn endpoint_urls(&self, chain: ChainId) -> Option<&[String]> {
        self.chains.get(&chain).map(|c| c.urls.as_slice())
    }

    /// Returns the configured chain IDs.
    #[must_use]
    pub fn chains(&self) -> Vec<ChainId> {
        let mut ids: Vec<_> = self.chains.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Runs `op` against the chain's endpoints until it succeeds or the
    /// attempt budget is spent.
    ///
    /// The budget is `max(max_retries, endpoint count)`. Throttling errors
    /// put the endpoint into cooldown and retry at once on a healthy
    /// alternate. Other errors back off exponentially. A denied admission
    /// rotates to an alternate endpoint when one exists, otherwise it waits
    /// for the window and checks again, up to [`MAX_ADMISSION_WAITS`] times.
    ///
    /// # Errors
    ///
    /// Returns the last error seen, or [`RpcError::NoEndpoints`] if the
    /// chain has none.
    pub async fn execute<T, F, Fut>(&self, chain: ChainId, op: F) -> Result<T, RpcError>
    where
        F: Fn(Arc<dyn ChainTransport>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, RpcError>> + Send,
        T: Send,
    {
        let set = self
            .chains
            .get(&chain)
            .filter(|set| !set.endpoints.is_empty())
            .ok_or(RpcError::NoEndpoints(chain))?;
        let urls = set.urls.as_slice();

        let max_attempts = (self.retry.max_retries as usize).max(urls.len()).max(1);
        let mut last_error = RpcError::NoEndpoints(chain);
        let mut preferred: Option<usize> = None;

        for attempt in 0..max_attempts {
            let mut waits = 0u32;
            while let Admission::Denied { wait } = self.limiter.check(chain).await {
                self.metrics.record_admission_denied();

                let alternate = if urls.len() > 1 {
                    self.health
                        .most_recently_used(chain, urls)
                        .and_then(|current| self.health.select_alternate(chain, urls, current))
                } else {
                    None
                };

                if let Some(next) = alternate {
                    debug!(chain_id = chain, endpoint_index = next, "admission denied, rotating endpoint");
                    self.limiter.reset(chain).await;
                    self.metrics.record_rotation();
                    preferred = Some(next);
                    break;
                }

                if waits >= MAX_ADMISSION_WAITS {
                    warn!(chain_id = chain, waits, "admission still denied, sending request anyway");
                    break;
                }

                debug!(chain_id = chain, wait_ms = wait.as_millis() as u64, "admission denied, waiting");
                self.metrics.record_throttle_wait();
                tokio::time::sleep(wait).await;
                waits += 1;
            }

            let index = match preferred.take() {
                Some(index) => index,
                None => self
                    .health
                    .select(chain, urls)
                    .ok_or(RpcError::NoEndpoints(chain))?,
            };
            let endpoint = set
                .endpoints
                .get(index)
                .ok_or(RpcError::NoEndpoints(chain))?;

            self.health.mark_used(chain, &endpoint.url);
            self.metrics.record_request();

            let error = match op(Arc::clone(&endpoint.transport)).await {
                Ok(value) => {
                    self.health.record_success(chain, &endpoint.url);
                    self.metrics.record_success();
                    return Ok(value);
                }
                Err(e) => e,
            };

            let remaining = attempt + 1 < max_attempts;

            if error.is_failover_worthy() {
                self.metrics.record_failure(true);
                self.health.mark_rate_limited(chain, &endpoint.url);
                warn!(
                    chain_id = chain,
                    endpoint = %endpoint.url,
                    attempt = attempt + 1,
                    error = %error,
                    "endpoint throttled, failing over"
                );
                last_error = error;

                match self.health.select_alternate(chain, urls, index) {
                    Some(next) if remaining => {
                        self.metrics.record_rotation();
                        preferred = Some(next);
                    }
                    _ => break,
                }
            } else {
                self.metrics.record_failure(false);
                self.health.record_error(chain, &endpoint.url);
                warn!(
                    chain_id = chain,
                    endpoint = %endpoint.url,
                    attempt = attempt + 1,
                    error = %error,
                    "RPC request failed"
                );
                last_error = error;

                if remaining {
                    let attempt = u32::try_from(attempt).unwrap_or(u32::MAX);
                    self.metrics.record_backoff();
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                }
            }
        }

        self.metrics.record_exhausted();
        Err(last_error)
    }

    /// Returns the latest block height of a chain.
    ///
    /// # Errors
    ///
    /// Returns an error if every attempt fails.
    pub async fn block_number(&self, chain: ChainId) -> Result<u64, RpcError> {
        self.execute(chain, |t| async move { t.block_number().await })
            .await
    }

    /// Returns logs matching a filter.
    ///
    /// # Errors
    ///
    /// Returns an error if every attempt fails.
    pub async fn get_logs(&self, chain: ChainId, filter: &Filter) -> Result<Vec<Log>, RpcError> {
        self.execute(chain, |t| async move { t.get_logs(filter).await })
            .await
    }

    /// Performs a read-only contract call.
    ///
    /// # Errors
    ///
    /// Returns an error if every attempt fails.
    pub async fn call(&self, chain: ChainId, to: Address, data: &Bytes) -> Result<Bytes, RpcError> {
        self.execute(chain, |t| {
            let data = data.clone();
            async move { t.call(to, data).await }
        })
        .await
    }

    /// Returns a transaction by hash.
    ///
    /// # Errors
    ///
    /// Returns an error if every attempt fails.
    pub async fn get_transaction(
        &self,
        chain: ChainId,
        hash: H256,
    ) -> Result<Option<Transaction>, RpcError> {
        self.execute(chain, |t| async move { t.get_transaction(hash).await })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;

    use async_trait::async_trait;

    use super::*;
    use crate::config::RateLimitConfig;

    /// Transport that replays scripted block-number results.
    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<u64, RpcError>>>,
        fallback: Option<RpcError>,
        calls: AtomicU64,
    }

    impl ScriptedTransport {
        fn always_ok() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn always_err(error: RpcError) -> Arc<Self> {
            Arc::new(Self {
                fallback: Some(error),
                ..Default::default()
            })
        }

        fn scripted(results: Vec<Result<u64, RpcError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(results.into()),
                ..Default::default()
            })
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChainTransport for ScriptedTransport {
        async fn block_number(&self) -> Result<u64, RpcError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(next) = self.script.lock().expect("lock").pop_front() {
                return next;
            }
            match &self.fallback {
                Some(error) => Err(error.clone()),
                None => Ok(1_000),
            }
        }

        async fn get_logs(&self, _filter: &Filter) -> Result<Vec<Log>, RpcError> {
            Ok(Vec::new())
        }

        async fn call(&self, _to: Address, data: Bytes) -> Result<Bytes, RpcError> {
            Ok(data)
        }

        async fn get_transaction(&self, _hash: H256) -> Result<Option<Transaction>, RpcError> {
            Ok(None)
        }
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay_ms: 1,
            max_delay_ms: 5,
        }
    }

    fn client(
        limit: RateLimitConfig,
        retry: RetryConfig,
        transports: &[Arc<ScriptedTransport>],
    ) -> ResilientRpcClient {
        let endpoints = transports
            .iter()
            .enumerate()
            .map(|(i, t)| {
                Endpoint::new(
                    format!("https://rpc-{i}.example.org"),
                    Arc::clone(t) as Arc<dyn ChainTransport>,
                )
            })
            .collect();
        ResilientRpcClient::new(retry, HealthConfig::default(), RateLimiter::new(limit))
            .with_endpoints(1, endpoints)
    }

    fn throttled() -> RpcError {
        RpcError::Http {
            status: 429,
            message: "Too Many Requests".to_string(),
        }
    }

    #[tokio::test]
    async fn test_failover_on_rate_limit() {
        let first = ScriptedTransport::always_err(throttled());
        let second = ScriptedTransport::always_ok();
        let client = client(
            RateLimitConfig::default(),
            fast_retry(3),
            &[Arc::clone(&first), Arc::clone(&second)],
        );

        let height = client.block_number(1).await.expect("block number");

        assert_eq!(height, 1_000);
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
        assert_eq!(client.metrics().requests(), 2);
        assert_eq!(client.metrics().rotations(), 1);

        let state = client.health().health(1, "https://rpc-0.example.org");
        assert!(state.is_rate_limited(Instant::now()));
    }

    #[tokio::test]
    async fn test_throttled_endpoint_skipped_on_next_call() {
        let first = ScriptedTransport::always_err(throttled());
        let second = ScriptedTransport::always_ok();
        let client = client(
            RateLimitConfig::default(),
            fast_retry(3),
            &[Arc::clone(&first), Arc::clone(&second)],
        );

        client.block_number(1).await.expect("first call");
        client.block_number(1).await.expect("second call");

        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 2);
    }

    #[tokio::test]
    async fn test_backoff_retry_on_transient_error() {
        let transport = ScriptedTransport::scripted(vec![
            Err(RpcError::Timeout),
            Err(RpcError::Transport("connection reset".to_string())),
            Ok(7),
        ]);
        let client = client(RateLimitConfig::default(), fast_retry(3), &[Arc::clone(&transport)]);

        assert_eq!(client.block_number(1).await.expect("block number"), 7);
        assert_eq!(transport.calls(), 3);
        assert_eq!(client.metrics().failures(), 2);
        assert_eq!(client.metrics().rate_limited(), 0);
        assert_eq!(client.metrics().backoff_retries(), 2);
    }

    #[tokio::test]
    async fn test_returns_last_error_when_exhausted() {
        let transport = ScriptedTransport::always_err(RpcError::Transport("down".to_string()));
        let client = client(RateLimitConfig::default(), fast_retry(2), &[Arc::clone(&transport)]);

        let err = client.block_number(1).await.expect_err("should fail");

        assert_eq!(err, RpcError::Transport("down".to_string()));
        assert_eq!(transport.calls(), 2);
        assert_eq!(client.metrics().exhausted(), 1);
    }

    #[tokio::test]
    async fn test_attempts_cover_every_endpoint() {
        let transports: Vec<_> = (0..3)
            .map(|_| ScriptedTransport::always_err(RpcError::Timeout))
            .collect();
        let client = client(RateLimitConfig::default(), fast_retry(1), &transports);

        assert!(client.block_number(1).await.is_err());

        let total: u64 = transports.iter().map(|t| t.calls()).sum();
        assert_eq!(total, 3);
        assert!(transports.iter().all(|t| t.calls() == 1));
    }

    #[tokio::test]
    async fn test_single_endpoint_throttled_fails_fast() {
        let transport = ScriptedTransport::always_err(throttled());
        let client = client(RateLimitConfig::default(), fast_retry(3), &[Arc::clone(&transport)]);

        let err = client.block_number(1).await.expect_err("should fail");

        assert!(err.is_failover_worthy());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_admission_denial_rotates_endpoint() {
        let first = ScriptedTransport::always_ok();
        let second = ScriptedTransport::always_ok();
        let client = client(
            RateLimitConfig::new(1, 60_000),
            fast_retry(3),
            &[Arc::clone(&first), Arc::clone(&second)],
        );

        client.block_number(1).await.expect("first call");
        client.block_number(1).await.expect("second call");

        assert_eq!(client.metrics().admission_denials(), 1);
        assert_eq!(client.metrics().rotations(), 1);
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
    }

    #[tokio::test]
    async fn test_admission_denial_waits_with_single_endpoint() {
        let transport = ScriptedTransport::always_ok();
        let client = client(
            RateLimitConfig::new(2, 200),
            fast_retry(3),
            &[Arc::clone(&transport)],
        );

        for _ in 0..3 {
            client.block_number(1).await.expect("call");
        }

        assert_eq!(transport.calls(), 3);
        assert_eq!(client.metrics().rotations(), 0);
        // Every denial was followed by a wait and a fresh check that admitted
        let waits = client.metrics().throttle_waits();
        assert!(waits <= u64::from(MAX_ADMISSION_WAITS));
        assert_eq!(client.metrics().admission_denials(), waits);
    }

    #[tokio::test]
    async fn test_admission_wait_is_bounded() {
        let transport = ScriptedTransport::always_ok();
        let client = client(
            RateLimitConfig::new(1, 50),
            fast_retry(3),
            &[Arc::clone(&transport)],
        );

        client.block_number(1).await.expect("first call");
        client.block_number(1).await.expect("second call");

        assert_eq!(transport.calls(), 2);
        assert_eq!(client.metrics().throttle_waits(), u64::from(MAX_ADMISSION_WAITS));
        assert_eq!(
            client.metrics().admission_denials(),
            u64::from(MAX_ADMISSION_WAITS) + 1
        );
    }

    #[tokio::test]
    async fn test_unknown_chain() {
        let client = client(RateLimitConfig::default(), fast_retry(3), &[]);
        assert_eq!(
            client.block_number(1).await,
            Err(RpcError::NoEndpoints(1))
        );
        assert_eq!(
            client.block_number(42).await,
            Err(RpcError::NoEndpoints(42))
        );
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        let transport = ScriptedTransport::always_ok();
        let client = client(RateLimitConfig::default(), fast_retry(3), &[transport]);

        let data = Bytes::from(vec![1u8, 2]);
        assert_eq!(
            client.call(1, Address::zero(), &data).await.expect("call"),
            data
        );
        assert!(client
            .get_transaction(1, H256::zero())
            .await
            .expect("tx")
            .is_none());

        let filter = Filter::new()
            .address(Address::zero())
            .topic0(H256::zero())
            .from_block(1u64)
            .to_block(2u64);
        assert!(client.get_logs(1, &filter).await.expect("logs").is_empty());
    }

    #[test]
    fn test_from_config() {
        let config = RpcConfig::with_chains(vec![crate::config::ChainEndpoints::new(
            8453,
            vec![
                "https://a.example.org".to_string(),
                "https://b.example.org".to_string(),
            ],
        )]);

        let client = ResilientRpcClient::from_config(&config, None).expect("client");

        assert_eq!(client.chains(), vec![8453]);
        assert_eq!(client.endpoint_urls(8453).map(<[String]>::len), Some(2));
    }
}
