//! VaultSync Indexer - nonce-ordered event sync for vault projections.
//!
//! This crate follows the hub contract of each chain, applies vault events
//! in strict nonce order and keeps wallet and vault projections plus a
//! durable per-chain checkpoint.
//!
//! # Components
//!
//! - [`config`]: Per-chain sync configuration
//! - [`events`]: Typed vault events and log decoding
//! - [`source`]: Chain reads consumed by the engine
//! - [`fetcher`]: Contract log fetcher over the resilient RPC client
//! - [`projection`]: Projection model and per-event rules
//! - [`store`]: Projection store with in-memory and Postgres backends
//! - [`sync`]: Per-chain sync engine and metrics
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vaultsync_indexer::{ChainSyncConfig, ChainSyncer, ContractLogFetcher, InMemoryStore, ProjectionApplier};
//!
//! let config = ChainSyncConfig::new(8453, "base", hub);
//! let fetcher = ContractLogFetcher::new(client, 8453, &config.hub_address)?;
//! let syncer = ChainSyncer::new(config, Arc::new(fetcher), Arc::new(InMemoryStore::new()), ProjectionApplier::default())?;
//! let report = syncer.sync_once().await?;
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod projection;
pub mod source;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use config::ChainSyncConfig;
pub use error::IndexerError;
pub use events::{ChainEvent, EventKind, EventRecord, FetchedLog, MalformedLog, VaultEvent};
pub use fetcher::ContractLogFetcher;
pub use projection::{
    PositionEntry, ProjectionApplier, SyncCheckpoint, VaultConfig, VaultMetrics, VaultProjection,
    VaultRef, WalletProjection,
};
pub use source::ChainSource;
pub use store::{InMemoryStore, PgStore, ProjectionStore};
pub use sync::{ChainSyncer, SyncMetrics, SyncMetricsSnapshot, SyncReport, SyncStatus};
