//! Contract log fetcher.
//!
//! Implements [`ChainSource`] on top of the resilient RPC client, so every
//! hub and vault read shares one retry and failover policy.

use std::sync::Arc;

use async_trait::async_trait;
use ethers::abi::{ParamType, Token};
use ethers::types::{Address, Bytes, Filter, U256};
use tracing::{debug, warn};
use vaultsync_rpc::{abi, ChainId, ResilientRpcClient};

use crate::error::IndexerError;
use crate::events::{decode_log, malformed_log, scale_down, u256_to_decimal, EventKind, FetchedLog};
use crate::projection::{VaultConfig, VaultMetrics};
use crate::source::ChainSource;

/// Fixed-point precision of `sharePrice()`.
const SHARE_PRICE_DECIMALS: u32 = 18;

/// Reads hub events and vault state for one chain.
#[derive(Debug, Clone)]
pub struct ContractLogFetcher {
    client: Arc<ResilientRpcClient>,
    chain_id: ChainId,
    hub_address: Address,
}

impl ContractLogFetcher {
    /// Creates a fetcher for a chain's hub contract.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::InvalidAddress`] if `hub_address` is not an
    /// address.
    pub fn new(
        client: Arc<ResilientRpcClient>,
        chain_id: ChainId,
        hub_address: &str,
    ) -> Result<Self, IndexerError> {
        let hub_address = abi::parse_address(hub_address)
            .map_err(|_| IndexerError::InvalidAddress(hub_address.to_string()))?;
        Ok(Self {
            client,
            chain_id,
            hub_address,
        })
    }

    /// Returns the hub contract address.
    #[must_use]
    pub const fn hub_address(&self) -> Address {
        self.hub_address
    }

    async fn call(&self, to: Address, signature: &str) -> Result<Bytes, IndexerError> {
        let data = abi::encode_call(signature, &[]);
        Ok(self.client.call(self.chain_id, to, &data).await?)
    }

    async fn call_uint(&self, to: Address, signature: &str) -> Result<U256, IndexerError> {
        let data = self.call(to, signature).await?;
        Ok(abi::decode_uint(&data)?)
    }

    async fn call_single(
        &self,
        to: Address,
        signature: &str,
        kind: ParamType,
    ) -> Result<Token, IndexerError> {
        let data = self.call(to, signature).await?;
        Ok(abi::decode_single(kind, &data)?)
    }
}

fn vault_address(vault: &str) -> Result<Address, IndexerError> {
    abi::parse_address(vault).map_err(|_| IndexerError::InvalidAddress(vault.to_string()))
}

#[async_trait]
impl ChainSource for ContractLogFetcher {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn block_height(&self) -> Result<u64, IndexerError> {
        Ok(self.client.block_number(self.chain_id).await?)
    }

    async fn live_nonce(&self) -> Result<u64, IndexerError> {
        let nonce = self.call_uint(self.hub_address, "eventNonce()").await?;
        Ok(abi::uint_to_u64(nonce)?)
    }

    async fn fetch_events(
        &self,
        kind: EventKind,
        from: u64,
        to: u64,
    ) -> Result<Vec<FetchedLog>, IndexerError> {
        let filter = Filter::new()
            .address(self.hub_address)
            .topic0(kind.topic())
            .from_block(from)
            .to_block(to);

        let logs = self.client.get_logs(self.chain_id, &filter).await?;
        debug!(chain_id = self.chain_id, kind = %kind, from, to, count = logs.len(), "fetched logs");

        let mut fetched = Vec::with_capacity(logs.len());
        for log in logs {
            if log.removed == Some(true) {
                debug!(chain_id = self.chain_id, kind = %kind, "skipping removed log");
                continue;
            }
            if log.address != self.hub_address {
                warn!(
                    chain_id = self.chain_id,
                    kind = %kind,
                    address = %abi::format_address(&log.address),
                    "skipping log from unexpected contract"
                );
                continue;
            }

            match decode_log(self.chain_id, kind, &log) {
                Ok(event) => fetched.push(FetchedLog::Event(event)),
                Err(e) => match malformed_log(self.chain_id, kind, &log, e.to_string()) {
                    Some(malformed) => {
                        warn!(
                            chain_id = self.chain_id,
                            kind = %kind,
                            nonce = malformed.nonce,
                            block = malformed.block_number,
                            error = %e,
                            "undecodable log"
                        );
                        fetched.push(FetchedLog::Malformed(malformed));
                    }
                    None => {
                        warn!(
                            chain_id = self.chain_id,
                            kind = %kind,
                            error = %e,
                            "skipping log without a readable nonce"
                        );
                    }
                },
            }
        }
        Ok(fetched)
    }

    async fn vault_config(&self, vault: &str) -> Result<VaultConfig, IndexerError> {
        let address = vault_address(vault)?;
        let (decimals, price_feed, assets, weights) = futures::try_join!(
            self.call_uint(address, "decimals()"),
            self.call_single(address, "priceFeed()", ParamType::Address),
            self.call_single(address, "getAssets()", ParamType::Array(Box::new(ParamType::Address))),
            self.call_single(address, "getWeights()", ParamType::Array(Box::new(ParamType::Uint(256)))),
        )?;

        let decimals = abi::uint_to_u64(decimals)
            .ok()
            .and_then(|d| u32::try_from(d).ok())
            .ok_or_else(|| IndexerError::Decode(format!("decimals {decimals} out of range")))?;

        Ok(VaultConfig {
            decimals,
            price_feed: abi::format_address(&abi::into_address(price_feed)?),
            assets: abi::into_array(assets)?
                .into_iter()
                .map(|token| Ok(abi::format_address(&abi::into_address(token)?)))
                .collect::<Result<_, IndexerError>>()?,
            weights: abi::into_array(weights)?
                .into_iter()
                .map(|token| u256_to_decimal(abi::into_uint(token)?))
                .collect::<Result<_, _>>()?,
        })
    }

    async fn vault_metrics(&self, vault: &str, decimals: u32) -> Result<VaultMetrics, IndexerError> {
        let address = vault_address(vault)?;
        let (total_supply, share_price) = futures::try_join!(
            self.call_uint(address, "totalSupply()"),
            self.call_uint(address, "sharePrice()"),
        )?;

        let total_supply = u256_to_decimal(total_supply)?;
        let share_price_usd = scale_down(u256_to_decimal(share_price)?, SHARE_PRICE_DECIMALS);

        Ok(VaultMetrics {
            total_supply,
            share_price_usd,
            tvl_usd: scale_down(total_supply, decimals) * share_price_usd,
        })
    }

    async fn transaction_sender(&self, hash: &str) -> Result<Option<String>, IndexerError> {
        let hash = abi::parse_hash(hash)?;
        let tx = self.client.get_transaction(self.chain_id, hash).await?;
        Ok(tx.map(|tx| abi::format_address(&tx.from)))
    }
}
