//! VaultSync Syncer - periodic multi-chain sync service.
//!
//! This crate drives one [`vaultsync_indexer::ChainSyncer`] per configured
//! chain on a fixed tick, with at most one tick in flight at a time.
//!
//! # Components
//!
//! - [`config`]: Service configuration and environment loading
//! - [`service`]: Tick loop and startup reconciliation
//! - [`claim_queue`]: Per-signer FIFO execution of claims
//! - [`metrics`]: Service metrics

pub mod claim_queue;
pub mod config;
pub mod metrics;
pub mod service;

pub use claim_queue::ClaimQueue;
pub use config::{ConfigError, SyncerConfig};
pub use metrics::{ServiceMetrics, ServiceMetricsSnapshot};
pub use service::{SyncService, TickOutcome};
