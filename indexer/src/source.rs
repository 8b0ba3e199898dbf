//! Chain-side reads needed by the sync engine and the applier.

use async_trait::async_trait;
use vaultsync_rpc::ChainId;

use crate::error::IndexerError;
use crate::events::{EventKind, FetchedLog};
use crate::projection::{VaultConfig, VaultMetrics};

/// Chain reads for one chain's hub and vault contracts.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Returns the chain ID.
    fn chain_id(&self) -> ChainId;

    /// Returns the latest block height.
    async fn block_height(&self) -> Result<u64, IndexerError>;

    /// Returns the hub's current event nonce.
    async fn live_nonce(&self) -> Result<u64, IndexerError>;

    /// Returns the logs of one kind in `[from, to]`.
    ///
    /// A log that cannot be decoded is returned as
    /// [`FetchedLog::Malformed`] and never fails the whole query.
    async fn fetch_events(
        &self,
        kind: EventKind,
        from: u64,
        to: u64,
    ) -> Result<Vec<FetchedLog>, IndexerError>;

    /// Reads a vault's static configuration.
    async fn vault_config(&self, vault: &str) -> Result<VaultConfig, IndexerError>;

    /// Reads a vault's current supply and pricing.
    async fn vault_metrics(&self, vault: &str, decimals: u32) -> Result<VaultMetrics, IndexerError>;

    /// Resolves the sender of a transaction.
    async fn transaction_sender(&self, hash: &str) -> Result<Option<String>, IndexerError>;
}
