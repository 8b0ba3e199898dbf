//! JSON-RPC over HTTP through an `ethers` provider.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Filter, Log, Transaction, TransactionRequest, H256};

use super::ChainTransport;
use crate::error::RpcError;

/// Transport that talks JSON-RPC 2.0 to one HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    url: String,
    provider: Provider<Http>,
    timeout: Duration,
}

impl HttpTransport {
    /// Creates a transport for `url` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` is not a valid endpoint URL.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        let url = url.into();
        let provider = Provider::<Http>::try_from(url.as_str())
            .map_err(|e| RpcError::Transport(format!("invalid endpoint URL {url}: {e}")))?;

        Ok(Self {
            url,
            provider,
            timeout,
        })
    }

    /// Returns the endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn timed<T, F>(&self, request: F) -> Result<T, RpcError>
    where
        F: Future<Output = Result<T, ProviderError>> + Send,
        T: Send,
    {
        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result.map_err(RpcError::from),
            Err(_) => Err(RpcError::Timeout),
        }
    }
}

#[async_trait]
impl ChainTransport for HttpTransport {
    async fn block_number(&self) -> Result<u64, RpcError> {
        let height = self.timed(self.provider.get_block_number()).await?;
        Ok(height.as_u64())
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, RpcError> {
        self.timed(self.provider.get_logs(filter)).await
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        self.timed(self.provider.call(&tx, None)).await
    }

    async fn get_transaction(&self, hash: H256) -> Result<Option<Transaction>, RpcError> {
        self.timed(self.provider.get_transaction(hash)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_new() {
        let transport =
            HttpTransport::new("https://rpc.example.org", Duration::from_secs(5)).expect("transport");
        assert_eq!(transport.url(), "https://rpc.example.org");
        assert_eq!(transport.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_transport_rejects_bad_url() {
        let err = HttpTransport::new("not a url", Duration::from_secs(5)).expect_err("bad url");
        assert!(matches!(err, RpcError::Transport(_)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let transport =
            HttpTransport::new("http://127.0.0.1:9", Duration::from_secs(5)).expect("transport");
        let err = transport.block_number().await.expect_err("no listener");
        assert!(!err.is_failover_worthy());
    }
}
