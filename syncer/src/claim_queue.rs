//! Serialized claim execution.
//!
//! Claims signed by one account must not overlap, or their transaction
//! nonces collide. Each signer gets a lane that runs one operation at a
//! time, in arrival order.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

/// Per-signer FIFO lanes.
#[derive(Debug, Default)]
pub struct ClaimQueue {
    lanes: DashMap<String, Arc<Mutex<()>>>,
}

impl ClaimQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `operation` once every earlier operation for `signer` finished.
    pub async fn run<F, Fut, T>(&self, signer: &str, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lane = self.lane(signer);
        let _turn = lane.lock().await;
        debug!(signer, "claim lane acquired");
        operation().await
    }

    /// Returns operations queued or running for `signer`.
    #[must_use]
    pub fn pending(&self, signer: &str) -> usize {
        self.lanes
            .get(&signer.to_ascii_lowercase())
            .map_or(0, |lane| Arc::strong_count(&lane).saturating_sub(1))
    }

    /// Returns the number of known signers.
    #[must_use]
    pub fn signers(&self) -> usize {
        self.lanes.len()
    }

    fn lane(&self, signer: &str) -> Arc<Mutex<()>> {
        Arc::clone(&self.lanes.entry(signer.to_ascii_lowercase()).or_default())
    }
}
