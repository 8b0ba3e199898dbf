//! RPC client configuration.
//!
//! Provides endpoint, retry, health and rate-limit settings for the
//! resilient client.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ChainId;

/// Default request timeout in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;

/// Retry policy for a single logical chain read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts per call (raised to the endpoint count if lower).
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum backoff delay in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    /// Returns the backoff delay before retrying after the given attempt.
    ///
    /// Computed as `base * 2^attempt`, capped at `max_delay_ms`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Endpoint health thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Consecutive errors after which an endpoint is unhealthy.
    pub max_consecutive_errors: u32,

    /// How long a throttled endpoint is skipped, in milliseconds.
    pub rate_limit_cooldown_ms: u64,

    /// Time since the last error after which an unhealthy endpoint recovers.
    pub error_recovery_delay_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_consecutive_errors: 3,
            rate_limit_cooldown_ms: 60_000,
            error_recovery_delay_ms: 30_000,
        }
    }
}

impl HealthConfig {
    /// Returns the rate-limit cooldown.
    #[must_use]
    pub const fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_millis(self.rate_limit_cooldown_ms)
    }

    /// Returns the error recovery delay.
    #[must_use]
    pub const fn error_recovery_delay(&self) -> Duration {
        Duration::from_millis(self.error_recovery_delay_ms)
    }
}

/// Sliding-window admission limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests admitted per window.
    pub max_requests: u64,

    /// Window size in milliseconds.
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 25,
            window_ms: 1_000,
        }
    }
}

impl RateLimitConfig {
    /// Creates a new rate limit.
    #[must_use]
    pub const fn new(max_requests: u64, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
        }
    }
}

/// Endpoints configured for one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEndpoints {
    /// Chain ID.
    pub chain_id: ChainId,

    /// RPC endpoint URLs, in preference order.
    pub urls: Vec<String>,

    /// Chain-specific admission limits (falls back to the default).
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

impl ChainEndpoints {
    /// Creates an endpoint list for a chain.
    #[must_use]
    pub fn new(chain_id: ChainId, urls: Vec<String>) -> Self {
        Self {
            chain_id,
            urls,
            rate_limit: None,
        }
    }

    /// Sets chain-specific admission limits.
    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }
}

/// Resilient RPC client configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Per-chain endpoint lists.
    pub chains: Vec<ChainEndpoints>,

    /// Admission limits for chains without their own.
    pub default_rate_limit: RateLimitConfig,

    /// Retry policy.
    pub retry: RetryConfig,

    /// Endpoint health thresholds.
    pub health: HealthConfig,

    /// Per-request transport timeout in milliseconds (0 uses the default).
    pub request_timeout_ms: u64,
}

impl RpcConfig {
    /// Creates a configuration with the given chains.
    #[must_use]
    pub fn with_chains(chains: Vec<ChainEndpoints>) -> Self {
        Self {
            chains,
            ..Default::default()
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the health thresholds.
    #[must_use]
    pub fn with_health(mut self, health: HealthConfig) -> Self {
        self.health = health;
        self
    }

    /// Sets the default admission limits.
    #[must_use]
    pub fn with_default_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.default_rate_limit = rate_limit;
        self
    }

    /// Returns the request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        if self.request_timeout_ms == 0 {
            Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS)
        } else {
            Duration::from_millis(self.request_timeout_ms)
        }
    }

    /// Returns the endpoint list for a chain.
    #[must_use]
    pub fn chain(&self, chain_id: ChainId) -> Option<&ChainEndpoints> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), RpcConfigError> {
        for chain in &self.chains {
            if chain.urls.is_empty() {
                return Err(RpcConfigError::NoEndpoints(chain.chain_id));
            }

            if let Some(url) = chain
                .urls
                .iter()
                .find(|u| !u.starts_with("http://") && !u.starts_with("https://"))
            {
                return Err(RpcConfigError::InvalidUrl(url.clone()));
            }

            if let Some(limit) = chain.rate_limit {
                validate_rate_limit(&limit)?;
            }
        }

        let duplicates = self
            .chains
            .iter()
            .enumerate()
            .any(|(i, c)| self.chains.iter().skip(i + 1).any(|o| o.chain_id == c.chain_id));
        if duplicates {
            return Err(RpcConfigError::DuplicateChain);
        }

        validate_rate_limit(&self.default_rate_limit)?;

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(RpcConfigError::InvalidBackoff);
        }

        if self.health.max_consecutive_errors == 0 {
            return Err(RpcConfigError::InvalidErrorThreshold);
        }

        Ok(())
    }
}

fn validate_rate_limit(limit: &RateLimitConfig) -> Result<(), RpcConfigError> {
    if limit.max_requests == 0 || limit.window_ms == 0 {
        return Err(RpcConfigError::InvalidRateLimit);
    }
    Ok(())
}

/// RPC configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcConfigError {
    /// A chain has no endpoints.
    #[error("chain {0} has no RPC endpoints")]
    NoEndpoints(ChainId),

    /// An endpoint URL has an unsupported scheme.
    #[error("RPC URL must start with http:// or https://: {0}")]
    InvalidUrl(String),

    /// A chain is listed twice.
    #[error("chain listed more than once in RPC config")]
    DuplicateChain,

    /// Rate limit with a zero budget or window.
    #[error("rate limit max_requests and window_ms must be > 0")]
    InvalidRateLimit,

    /// Base delay above maximum delay.
    #[error("retry base_delay_ms must be <= max_delay_ms")]
    InvalidBackoff,

    /// Zero error threshold.
    #[error("max_consecutive_errors must be > 0")]
    InvalidErrorThreshold,
}
