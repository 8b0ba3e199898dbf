//! Main syncer service.
//!
//! Fans each tick out to one task per chain. At most one tick runs at a
//! time; a tick that fires while another is in flight is skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use vaultsync_indexer::{ChainSyncer, SyncStatus};

use super::metrics::ServiceMetrics;

/// Result of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick was still running.
    Skipped,

    /// Every chain was attempted.
    Completed {
        /// Chains attempted.
        chains: usize,
        /// Chains whose sync failed.
        failed: usize,
        /// Events applied across chains.
        applied: u64,
    },
}

impl TickOutcome {
    /// Returns true if the tick was skipped.
    #[must_use]
    pub const fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }
}

/// Clears the tick flag when dropped.
struct TickGuard {
    flag: Arc<AtomicBool>,
}

impl TickGuard {
    fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                flag: Arc::clone(flag),
            })
    }
}

impl Drop for TickGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// The syncer service.
pub struct SyncService {
    /// Tick period.
    tick_interval: Duration,

    /// One syncer per chain.
    syncers: Vec<Arc<ChainSyncer>>,

    /// Metrics.
    metrics: Arc<ServiceMetrics>,

    /// Set while a tick is in flight.
    ticking: Arc<AtomicBool>,

    /// Whether the run loop is active.
    running: AtomicBool,

    /// Wakes the run loop on stop.
    shutdown: Notify,
}

impl SyncService {
    /// Creates a service over the given chain syncers.
    #[must_use]
    pub fn new(tick_interval: Duration, syncers: Vec<Arc<ChainSyncer>>) -> Self {
        Self {
            tick_interval,
            syncers,
            metrics: Arc::new(ServiceMetrics::new()),
            ticking: Arc::new(AtomicBool::new(false)),
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// Returns the metrics.
    #[must_use]
    pub fn metrics(&self) -> Arc<ServiceMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Returns the tick period.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Returns true if the run loop is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Returns true if a tick is in flight.
    #[must_use]
    pub fn is_ticking(&self) -> bool {
        self.ticking.load(Ordering::Acquire)
    }

    /// Returns the sync status of every chain.
    #[must_use]
    pub fn statuses(&self) -> Vec<SyncStatus> {
        self.syncers.iter().map(|s| s.status()).collect()
    }

    /// Stops the run loop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.shutdown.notify_waiters();
        info!("Syncer service stop requested");
    }

    /// Advances idle chains to the confirmed head.
    ///
    /// Returns the number of chains whose checkpoint moved. Failures are
    /// logged and leave that chain for the regular ticks.
    pub async fn reconcile_on_startup(&self) -> usize {
        let mut set = JoinSet::new();
        for syncer in &self.syncers {
            let syncer = Arc::clone(syncer);
            set.spawn(async move { (syncer.chain_id(), syncer.reconcile().await) });
        }

        let mut advanced = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(Some(_)))) => advanced += 1,
                Ok((_, Ok(None))) => {}
                Ok((chain_id, Err(e))) => {
                    warn!(chain_id, error = %e, "startup reconciliation failed");
                }
                Err(e) => error!(error = %e, "startup reconciliation task failed"),
            }
        }

        info!(
            "Startup reconciliation advanced {} of {} chains",
            advanced,
            self.syncers.len()
        );
        advanced
    }

    /// Runs one tick over every chain.
    pub async fn tick(&self) -> TickOutcome {
        let Some(_guard) = TickGuard::try_acquire(&self.ticking) else {
            self.metrics.record_tick_skipped();
            debug!("Previous tick still running, skipping");
            return TickOutcome::Skipped;
        };

        self.metrics.record_tick_started();
        let started = Instant::now();

        let mut set = JoinSet::new();
        for syncer in &self.syncers {
            let syncer = Arc::clone(syncer);
            set.spawn(async move { (syncer.chain_id(), syncer.sync_once().await) });
        }

        let mut failed = 0;
        let mut applied = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(report))) => {
                    applied += report.applied;
                    self.metrics.record_chain_success(report.applied);
                }
                Ok((chain_id, Err(e))) => {
                    failed += 1;
                    self.metrics.record_chain_failure();
                    error!(chain_id, error = %e, "chain sync failed");
                }
                Err(e) => {
                    failed += 1;
                    self.metrics.record_chain_failure();
                    error!(error = %e, "chain sync task failed");
                }
            }
        }

        self.metrics.record_tick_completed(started.elapsed());
        TickOutcome::Completed {
            chains: self.syncers.len(),
            failed,
            applied,
        }
    }

    /// Runs ticks on a fixed period until [`SyncService::stop`] is called.
    ///
    /// Each tick is spawned, so an overrunning tick causes later ones to be
    /// skipped rather than queued.
    pub async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::Relaxed);
        info!(
            "Syncer service started with {} chains, tick every {:?}",
            self.syncers.len(),
            self.tick_interval
        );

        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while self.is_running() {
            tokio::select! {
                _ = interval.tick() => {}
                () = self.shutdown.notified() => break,
            }
            if !self.is_running() {
                break;
            }

            let service = Arc::clone(&self);
            tokio::spawn(async move {
                service.tick().await;
            });
        }

        info!("Syncer service stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;

    use async_trait::async_trait;
    use vaultsync_indexer::{
        ChainSource, ChainSyncConfig, EventKind, FetchedLog, InMemoryStore, IndexerError,
        ProjectionApplier, ProjectionStore, VaultConfig, VaultMetrics,
    };
    use vaultsync_rpc::{ChainId, RpcError};

    use super::*;

    const HUB: &str = "0x00000000000000000000000000000000000000aa";

    /// Chain with no events whose height read can be slowed or failed.
    struct StubChain {
        chain_id: ChainId,
        height: AtomicU64,
        delay: Duration,
        fail: AtomicBool,
    }

    impl StubChain {
        fn new(chain_id: ChainId, delay: Duration) -> Self {
            Self {
                chain_id,
                height: AtomicU64::new(1_000),
                delay,
                fail: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl ChainSource for StubChain {
        fn chain_id(&self) -> ChainId {
            self.chain_id
        }

        async fn block_height(&self) -> Result<u64, IndexerError> {
            tokio::time::sleep(self.delay).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(IndexerError::Rpc(RpcError::Timeout));
            }
            Ok(self.height.load(Ordering::SeqCst))
        }

        async fn live_nonce(&self) -> Result<u64, IndexerError> {
            Ok(0)
        }

        async fn fetch_events(
            &self,
            _kind: EventKind,
            _from: u64,
            _to: u64,
        ) -> Result<Vec<FetchedLog>, IndexerError> {
            Ok(Vec::new())
        }

        async fn vault_config(&self, _vault: &str) -> Result<VaultConfig, IndexerError> {
            Ok(VaultConfig::default())
        }

        async fn vault_metrics(
            &self,
            _vault: &str,
            _decimals: u32,
        ) -> Result<VaultMetrics, IndexerError> {
            Err(IndexerError::Decode("unused".to_string()))
        }

        async fn transaction_sender(&self, _hash: &str) -> Result<Option<String>, IndexerError> {
            Ok(None)
        }
    }

    fn create_service(
        chains: &[Arc<StubChain>],
    ) -> (Arc<SyncService>, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let syncers = chains
            .iter()
            .map(|chain| {
                let config = ChainSyncConfig::new(chain.chain_id, "test", HUB);
                let syncer = ChainSyncer::new(
                    config,
                    Arc::clone(chain) as Arc<dyn ChainSource>,
                    Arc::clone(&store) as Arc<dyn ProjectionStore>,
                    ProjectionApplier::default(),
                )
                .expect("syncer");
                Arc::new(syncer)
            })
            .collect();
        (
            Arc::new(SyncService::new(Duration::from_millis(20), syncers)),
            store,
        )
    }

    #[tokio::test]
    async fn test_tick_completes_all_chains() {
        let chains = [
            Arc::new(StubChain::new(1, Duration::ZERO)),
            Arc::new(StubChain::new(8453, Duration::ZERO)),
        ];
        let (service, store) = create_service(&chains);

        let outcome = service.tick().await;

        assert_eq!(
            outcome,
            TickOutcome::Completed {
                chains: 2,
                failed: 0,
                applied: 0
            }
        );
        assert!(!service.is_ticking());
        let cp = store.find_checkpoint(8453).await.expect("find").expect("checkpoint");
        assert_eq!(cp.height, 996);
        assert_eq!(service.metrics().chain_syncs(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_tick_is_skipped() {
        let chains = [Arc::new(StubChain::new(1, Duration::from_millis(100)))];
        let (service, _) = create_service(&chains);

        let first = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.tick().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(service.is_ticking());

        assert!(service.tick().await.is_skipped());

        let outcome = first.await.expect("join");
        assert!(!outcome.is_skipped());
        assert_eq!(service.metrics().ticks_skipped(), 1);
        assert_eq!(service.metrics().ticks_started(), 1);

        assert!(!service.tick().await.is_skipped());
    }

    #[tokio::test]
    async fn test_failed_chain_releases_guard() {
        let failing = Arc::new(StubChain::new(1, Duration::ZERO));
        failing.fail.store(true, Ordering::SeqCst);
        let chains = [failing, Arc::new(StubChain::new(8453, Duration::ZERO))];
        let (service, store) = create_service(&chains);

        let outcome = service.tick().await;

        assert_eq!(
            outcome,
            TickOutcome::Completed {
                chains: 2,
                failed: 1,
                applied: 0
            }
        );
        assert!(!service.is_ticking());
        assert!(store.find_checkpoint(8453).await.expect("find").is_some());
        assert_eq!(service.metrics().chain_failures(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_on_startup() {
        let chains = [Arc::new(StubChain::new(1, Duration::ZERO))];
        let (service, store) = create_service(&chains);
        store.upsert_checkpoint(1, 10, 0).await.expect("seed");

        assert_eq!(service.reconcile_on_startup().await, 1);

        let cp = store.find_checkpoint(1).await.expect("find").expect("checkpoint");
        assert_eq!(cp.height, 996);
    }

    #[tokio::test]
    async fn test_run_until_stopped() {
        let chains = [Arc::new(StubChain::new(1, Duration::ZERO))];
        let (service, _) = create_service(&chains);

        let runner = tokio::spawn(Arc::clone(&service).run());
        tokio::time::sleep(Duration::from_millis(70)).await;
        assert!(service.is_running());

        service.stop();
        tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .expect("stopped")
            .expect("join");

        assert!(!service.is_running());
        assert!(service.metrics().ticks_started() >= 1);
    }
}
