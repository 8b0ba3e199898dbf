//! Wallet and vault projections.
//!
//! # Components
//!
//! - [`model`]: Projection and checkpoint types
//! - [`applier`]: Per-event projection rules

pub mod applier;
pub mod model;

pub use applier::{ProjectionApplier, DEFAULT_REFRESH_INTERVAL_SECS};
pub use model::{
    PositionEntry, SyncCheckpoint, VaultConfig, VaultMetrics, VaultProjection, VaultRef,
    WalletProjection,
};
