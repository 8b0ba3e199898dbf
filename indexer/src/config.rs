//! Per-chain sync configuration.

use serde::{Deserialize, Serialize};
use vaultsync_rpc::ChainId;

use crate::error::IndexerError;

/// Default confirmation delay in blocks.
pub const DEFAULT_CONFIRMATION_DELAY: u64 = 4;

/// Default chunk size in blocks.
pub const DEFAULT_CHUNK_SIZE: u64 = 2_000;

/// Default maximum chunks per tick.
pub const DEFAULT_MAX_CHUNKS_PER_TICK: u32 = 100;

/// Sync settings for one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainSyncConfig {
    /// Chain ID.
    pub chain_id: ChainId,

    /// Human-readable chain name, used in logs.
    pub name: String,

    /// Hub contract that emits vault events and holds the nonce counter.
    pub hub_address: String,

    /// Block to start from when nothing has been synced yet.
    pub start_height: u64,

    /// Most recent blocks excluded from processing.
    pub confirmation_delay: u64,

    /// Blocks per fetched chunk.
    pub chunk_size: u64,

    /// Maximum chunks processed in one tick.
    pub max_chunks_per_tick: u32,

    /// Average block time in milliseconds, used to turn rewind windows
    /// into block counts.
    pub avg_block_time_ms: u64,

    /// How far the watermark stays behind when a flagged gap meets an
    /// unchanged nonce, in seconds.
    pub stale_nonce_rewind_secs: u64,

    /// Rewind applied per detected nonce gap, in seconds.
    pub gap_rewind_secs: u64,

    /// Gap re-fetches allowed in one tick.
    pub max_gap_retries_per_tick: u32,
}

impl Default for ChainSyncConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            name: "ethereum".to_string(),
            hub_address: String::new(),
            start_height: 0,
            confirmation_delay: DEFAULT_CONFIRMATION_DELAY,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunks_per_tick: DEFAULT_MAX_CHUNKS_PER_TICK,
            avg_block_time_ms: 12_000,
            stale_nonce_rewind_secs: 120,
            gap_rewind_secs: 300,
            max_gap_retries_per_tick: 3,
        }
    }
}

impl ChainSyncConfig {
    /// Creates a config for a chain and hub contract.
    #[must_use]
    pub fn new(chain_id: ChainId, name: impl Into<String>, hub_address: impl Into<String>) -> Self {
        Self {
            chain_id,
            name: name.into(),
            hub_address: hub_address.into(),
            ..Default::default()
        }
    }

    /// Sets the start height.
    #[must_use]
    pub const fn with_start_height(mut self, start_height: u64) -> Self {
        self.start_height = start_height;
        self
    }

    /// Sets the confirmation delay.
    #[must_use]
    pub const fn with_confirmation_delay(mut self, blocks: u64) -> Self {
        self.confirmation_delay = blocks;
        self
    }

    /// Sets the chunk size.
    #[must_use]
    pub const fn with_chunk_size(mut self, blocks: u64) -> Self {
        self.chunk_size = blocks;
        self
    }

    /// Sets the maximum chunks per tick.
    #[must_use]
    pub const fn with_max_chunks_per_tick(mut self, chunks: u32) -> Self {
        self.max_chunks_per_tick = chunks;
        self
    }

    /// Sets the average block time.
    #[must_use]
    pub const fn with_avg_block_time_ms(mut self, ms: u64) -> Self {
        self.avg_block_time_ms = ms;
        self
    }

    /// Sets both rewind windows.
    #[must_use]
    pub const fn with_rewind_windows(mut self, stale_nonce_secs: u64, gap_secs: u64) -> Self {
        self.stale_nonce_rewind_secs = stale_nonce_secs;
        self.gap_rewind_secs = gap_secs;
        self
    }

    /// Returns the stale-nonce rewind in blocks.
    #[must_use]
    pub fn stale_nonce_rewind_blocks(&self) -> u64 {
        self.secs_to_blocks(self.stale_nonce_rewind_secs)
    }

    /// Returns the per-detection gap rewind in blocks.
    #[must_use]
    pub fn gap_rewind_blocks(&self) -> u64 {
        self.secs_to_blocks(self.gap_rewind_secs)
    }

    fn secs_to_blocks(&self, secs: u64) -> u64 {
        secs.saturating_mul(1_000)
            .div_ceil(self.avg_block_time_ms.max(1))
            .max(1)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if !is_address(&self.hub_address) {
            return Err(IndexerError::InvalidAddress(self.hub_address.clone()));
        }

        if self.chunk_size == 0 {
            return Err(IndexerError::Config(format!(
                "{}: chunk_size must be > 0",
                self.name
            )));
        }

        if self.max_chunks_per_tick == 0 {
            return Err(IndexerError::Config(format!(
                "{}: max_chunks_per_tick must be > 0",
                self.name
            )));
        }

        if self.avg_block_time_ms == 0 {
            return Err(IndexerError::Config(format!(
                "{}: avg_block_time_ms must be > 0",
                self.name
            )));
        }

        Ok(())
    }
}

/// Returns true for a `0x`-prefixed 20-byte hex address.
#[must_use]
pub fn is_address(value: &str) -> bool {
    value
        .strip_prefix("0x")
        .is_some_and(|hex| hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit()))
}
