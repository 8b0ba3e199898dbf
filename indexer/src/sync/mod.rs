//! Event synchronization.
//!
//! # Components
//!
//! - [`engine`]: Per-chain sync loop with gap recovery
//! - [`metrics`]: Sync counters

pub mod engine;
pub mod metrics;

pub use engine::{ChainSyncer, SyncReport, SyncStatus};
pub use metrics::{SyncMetrics, SyncMetricsSnapshot};
