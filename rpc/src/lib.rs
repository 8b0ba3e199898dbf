//! VaultSync RPC - resilient chain reads for the vault sync pipeline.
//!
//! This crate wraps `ethers` JSON-RPC providers of EVM chains behind a
//! client that survives throttled, flaky or misconfigured upstreams.
//!
//! # Components
//!
//! - [`ResilientRpcClient`]: Per-chain reads with retry and failover
//! - [`EndpointHealthTracker`]: Health, cooldown and LRU selection per endpoint
//! - [`RateLimiter`]: Sliding-window admission shared through a [`CounterStore`]
//! - [`ChainTransport`]: Raw reads against one endpoint ([`HttpTransport`])
//! - [`abi`]: Event topics, call data and token narrowing over `ethers::abi`
//!
//! # Example
//!
//! ```rust,ignore
//! use vaultsync_rpc::{ChainEndpoints, ResilientRpcClient, RpcConfig};
//!
//! let config = RpcConfig::with_chains(vec![ChainEndpoints::new(
//!     8453,
//!     vec!["https://base.example.org".to_string()],
//! )]);
//! let client = ResilientRpcClient::from_config(&config, None)?;
//! let height = client.block_number(8453).await?;
//! ```

pub mod abi;
pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod rate_limit;
pub mod transport;

/// EVM chain identifier.
pub type ChainId = u64;

pub use abi::AbiError;
pub use client::{Endpoint, ResilientRpcClient, MAX_ADMISSION_WAITS};
pub use config::{
    ChainEndpoints, HealthConfig, RateLimitConfig, RetryConfig, RpcConfig, RpcConfigError,
};
pub use error::RpcError;
pub use health::{EndpointHealth, EndpointHealthTracker};
pub use metrics::{RpcMetrics, RpcMetricsSnapshot};
pub use rate_limit::{
    Admission, CounterStore, MemoryCounterStore, RateLimiter, RedisCounterStore, WindowCounts,
};
pub use transport::{ChainTransport, HttpTransport};
