//! Chain transports.
//!
//! A [`ChainTransport`] performs the raw reads against one endpoint. The
//! resilient client owns one transport per configured URL and decides which
//! one serves each attempt.

pub mod http;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, Filter, Log, Transaction, H256};

use crate::error::RpcError;

pub use http::HttpTransport;

/// Raw chain reads against a single endpoint.
#[async_trait]
pub trait ChainTransport: Send + Sync {
    /// Returns the latest block height.
    async fn block_number(&self) -> Result<u64, RpcError>;

    /// Returns logs matching a filter.
    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, RpcError>;

    /// Performs a read-only contract call at the latest block.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError>;

    /// Returns a transaction by hash.
    async fn get_transaction(&self, hash: H256) -> Result<Option<Transaction>, RpcError>;
}
