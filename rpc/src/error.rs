//! RPC error types.
//!
//! Provides the error type shared by transports and the resilient client,
//! together with the classification used to pick between endpoint
//! failover and plain backoff.

use ethers::providers::{ProviderError, RpcError as _};

use crate::ChainId;

/// Message fragments that identify provider throttling or credential problems.
const FAILOVER_INDICATORS: &[&str] = &[
    "rate limit",
    "rate-limit",
    "ratelimit",
    "too many requests",
    "unauthorized",
    "api key",
    "api-key",
    "apikey",
    "payment required",
];

/// Errors produced by chain reads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// Endpoint answered with a non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// Endpoint answered with a JSON-RPC error object.
    #[error("JSON-RPC error [{code}]: {message}")]
    JsonRpc {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },

    /// Request could not be sent or the connection failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Request timed out.
    #[error("request timeout")]
    Timeout,

    /// Response could not be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// No endpoint is configured for the chain.
    #[error("no RPC endpoints configured for chain {0}")]
    NoEndpoints(ChainId),

    /// Shared counter store failure.
    #[error("counter store error: {0}")]
    CounterStore(String),
}

impl RpcError {
    /// Returns true if the failure is specific to the endpoint's quota or
    /// credentials, so switching endpoints is the right response.
    #[must_use]
    pub fn is_failover_worthy(&self) -> bool {
        match self {
            Self::Http { status, message } => {
                matches!(status, 401 | 402 | 403 | 429) || contains_failover_indicator(message)
            }
            Self::JsonRpc { message, .. } | Self::Transport(message) => {
                contains_failover_indicator(message)
            }
            Self::InvalidResponse(message) => contains_failover_indicator(message),
            Self::Timeout | Self::NoEndpoints(_) | Self::CounterStore(_) => false,
        }
    }

    /// Returns true if the request timed out.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

fn contains_failover_indicator(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("429") || FAILOVER_INDICATORS.iter().any(|needle| lower.contains(needle))
}

impl From<ProviderError> for RpcError {
    fn from(err: ProviderError) -> Self {
        if let Some(response) = err.as_error_response() {
            return Self::JsonRpc {
                code: response.code,
                message: response.message.clone(),
            };
        }
        // Non-JSON bodies such as a plain 429 page end up here with the text
        if err.as_serde_error().is_some() {
            return Self::InvalidResponse(err.to_string());
        }
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}
