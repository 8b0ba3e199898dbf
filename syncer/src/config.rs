//! Syncer service configuration.
//!
//! Loaded from an optional JSON file named by `VAULTSYNC_CONFIG`, then
//! overridden by `DATABASE_URL`, `REDIS_URL` and `TICK_INTERVAL_MS`.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vaultsync_indexer::ChainSyncConfig;
use vaultsync_rpc::{ChainId, RpcConfig, RpcConfigError};

/// Environment variable naming the JSON config file.
pub const CONFIG_PATH_ENV: &str = "VAULTSYNC_CONFIG";

/// Default tick interval in milliseconds.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 12_000;

/// Default vault metric refresh interval in seconds.
pub const DEFAULT_VAULT_REFRESH_INTERVAL_SECS: u64 = 60;

/// Configuration for the syncer service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncerConfig {
    /// Tick interval in milliseconds.
    pub tick_interval_ms: u64,

    /// Minimum seconds between metric refreshes of one vault.
    pub vault_refresh_interval_secs: u64,

    /// Chains to sync.
    pub chains: Vec<ChainSyncConfig>,

    /// RPC endpoints and policies.
    pub rpc: RpcConfig,

    /// Postgres URL; projections stay in memory when unset.
    pub database_url: Option<String>,

    /// Redis URL for shared rate limit counters.
    pub redis_url: Option<String>,
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            vault_refresh_interval_secs: DEFAULT_VAULT_REFRESH_INTERVAL_SECS,
            chains: Vec::new(),
            rpc: RpcConfig::default(),
            database_url: None,
            redis_url: None,
        }
    }
}

impl SyncerConfig {
    /// Creates a configuration with the given chains and RPC settings.
    #[must_use]
    pub fn with_chains(chains: Vec<ChainSyncConfig>, rpc: RpcConfig) -> Self {
        Self {
            chains,
            rpc,
            ..Default::default()
        }
    }

    /// Sets the tick interval.
    #[must_use]
    pub const fn with_tick_interval(mut self, ms: u64) -> Self {
        self.tick_interval_ms = ms;
        self
    }

    /// Sets the database URL.
    #[must_use]
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Sets the Redis URL.
    #[must_use]
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    /// Returns the tick interval.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Returns the vault metric refresh interval.
    #[must_use]
    pub fn vault_refresh_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.vault_refresh_interval_secs).unwrap_or(i64::MAX))
    }

    /// Loads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or an
    /// override is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let file = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Some(std::fs::read_to_string(&path).map_err(|e| ConfigError::Read {
                path,
                message: e.to_string(),
            })?),
            Err(_) => None,
        };

        Self::from_sources(file.as_deref(), |name| std::env::var(name).ok())
    }

    /// Builds the configuration from file contents and a variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or an override is malformed.
    pub fn from_sources<F>(file: Option<&str>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match file {
            Some(contents) => serde_json::from_str(contents)
                .map_err(|e| ConfigError::Parse(e.to_string()))?,
            None => Self::default(),
        };

        if let Some(url) = lookup("DATABASE_URL").filter(|u| !u.is_empty()) {
            config.database_url = Some(url);
        }
        if let Some(url) = lookup("REDIS_URL").filter(|u| !u.is_empty()) {
            config.redis_url = Some(url);
        }
        if let Some(value) = lookup("TICK_INTERVAL_MS") {
            config.tick_interval_ms = value.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "TICK_INTERVAL_MS".to_string(),
                value,
            })?;
        }

        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidTickInterval);
        }

        if self.vault_refresh_interval_secs == 0 {
            return Err(ConfigError::InvalidRefreshInterval);
        }

        if self.chains.is_empty() {
            return Err(ConfigError::NoChains);
        }

        let mut seen = HashSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.chain_id) {
                return Err(ConfigError::DuplicateChain(chain.chain_id));
            }

            chain.validate().map_err(|e| ConfigError::Chain {
                chain_id: chain.chain_id,
                message: e.to_string(),
            })?;

            if self.rpc.chain(chain.chain_id).is_none() {
                return Err(ConfigError::MissingEndpoints(chain.chain_id));
            }
        }

        self.rpc.validate()?;
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read {path}: {message}")]
    Read {
        /// File path.
        path: String,
        /// Underlying error.
        message: String,
    },

    /// Config file is not valid JSON for this schema.
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// Malformed environment override.
    #[error("invalid value for {name}: {value}")]
    InvalidEnv {
        /// Variable name.
        name: String,
        /// Rejected value.
        value: String,
    },

    /// Invalid tick interval.
    #[error("tick_interval_ms must be > 0")]
    InvalidTickInterval,

    /// Invalid refresh interval.
    #[error("vault_refresh_interval_secs must be > 0")]
    InvalidRefreshInterval,

    /// Nothing to sync.
    #[error("no chains configured")]
    NoChains,

    /// A chain is listed twice.
    #[error("chain {0} configured more than once")]
    DuplicateChain(ChainId),

    /// A chain's sync settings are invalid.
    #[error("chain {chain_id}: {message}")]
    Chain {
        /// Chain ID.
        chain_id: ChainId,
        /// Validation failure.
        message: String,
    },

    /// A chain has no RPC endpoints.
    #[error("chain {0} has no RPC endpoints configured")]
    MissingEndpoints(ChainId),

    /// Invalid RPC settings.
    #[error(transparent)]
    Rpc(#[from] RpcConfigError),
}
