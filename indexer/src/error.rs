//! Indexer error types.

use vaultsync_rpc::{AbiError, ChainId, RpcError};

/// Errors produced while fetching, applying or persisting events.
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    /// Chain read failed after every retry.
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    /// Projection store failure.
    #[error("store error: {0}")]
    Store(String),

    /// Log or call result could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Event references a vault that has no projection yet.
    #[error("vault {vault} not found on chain {chain_id}")]
    VaultNotFound {
        /// Chain ID.
        chain_id: ChainId,
        /// Vault address.
        vault: String,
    },

    /// Malformed address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Invalid sync configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl IndexerError {
    /// Returns true if the error is a missing dependency that may resolve
    /// once other events are applied.
    #[must_use]
    pub const fn is_missing_dependency(&self) -> bool {
        matches!(self, Self::VaultNotFound { .. })
    }
}

impl From<AbiError> for IndexerError {
    fn from(err: AbiError) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<sqlx::Error> for IndexerError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for IndexerError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(err.to_string())
    }
}
