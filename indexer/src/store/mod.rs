//! Projection store.
//!
//! Durable storage for checkpoints, projections and applied event records.
//! Every write is keyed and idempotent under retry, since the engine may
//! re-attempt a failed single-event apply.
//!
//! # Components
//!
//! - [`memory`]: InMemoryStore for tests and database-less runs
//! - [`postgres`]: PgStore backed by sqlx

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use vaultsync_rpc::ChainId;

use crate::error::IndexerError;
use crate::events::EventRecord;
use crate::projection::{SyncCheckpoint, VaultProjection, WalletProjection};

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// Storage used by the sync engine and the projection applier.
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    /// Returns the checkpoint of a chain.
    async fn find_checkpoint(&self, chain_id: ChainId) -> Result<Option<SyncCheckpoint>, IndexerError>;

    /// Writes the checkpoint of a chain.
    ///
    /// A write with a lower nonce than the stored one is ignored and the
    /// stored checkpoint is returned.
    async fn upsert_checkpoint(
        &self,
        chain_id: ChainId,
        height: u64,
        nonce: u64,
    ) -> Result<SyncCheckpoint, IndexerError>;

    /// Returns a wallet projection.
    async fn find_wallet(&self, address: &str) -> Result<Option<WalletProjection>, IndexerError>;

    /// Writes a wallet projection.
    async fn upsert_wallet(&self, wallet: &WalletProjection) -> Result<(), IndexerError>;

    /// Returns a vault projection.
    async fn find_vault(
        &self,
        chain_id: ChainId,
        address: &str,
    ) -> Result<Option<VaultProjection>, IndexerError>;

    /// Writes a vault projection.
    async fn upsert_vault(&self, vault: &VaultProjection) -> Result<(), IndexerError>;

    /// Inserts an event record unless one exists for `(chain_id, nonce)`.
    ///
    /// Returns true if the record was inserted.
    async fn insert_event_record(&self, record: &EventRecord) -> Result<bool, IndexerError>;

    /// Returns the event record for a nonce.
    async fn find_event_record(
        &self,
        chain_id: ChainId,
        nonce: u64,
    ) -> Result<Option<EventRecord>, IndexerError>;

    /// Returns the latest event record of a chain by `(block, nonce)`.
    async fn find_last_event_record(&self, chain_id: ChainId) -> Result<Option<EventRecord>, IndexerError>;
}
