//! Shared test fixtures.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use vaultsync_rpc::ChainId;

use crate::error::IndexerError;
use crate::events::{ChainEvent, EventKind, FetchedLog, MalformedLog, VaultEvent};
use crate::projection::{VaultConfig, VaultMetrics, VaultProjection};
use crate::source::ChainSource;

pub const CHAIN: ChainId = 1;
pub const VAULT: &str = "0x00000000000000000000000000000000000000a1";
pub const OTHER_VAULT: &str = "0x00000000000000000000000000000000000000b2";
pub const USER: &str = "0x00000000000000000000000000000000000000c3";
pub const CREATOR: &str = "0x00000000000000000000000000000000000000d4";

/// Scriptable in-memory chain.
#[derive(Default)]
pub struct FakeChain {
    chain_id: ChainId,
    height: AtomicU64,
    nonce: AtomicU64,
    events: Mutex<Vec<FetchedLog>>,
    hidden: Mutex<BTreeSet<u64>>,
    queried_ranges: Mutex<Vec<(u64, u64)>>,
    vaults: Mutex<HashMap<String, (VaultConfig, VaultMetrics)>>,
    senders: Mutex<HashMap<String, String>>,
    fail_metrics: AtomicBool,
    log_queries: AtomicU64,
    metric_reads: AtomicU64,
    config_reads: AtomicU64,
}

impl FakeChain {
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            ..Default::default()
        }
    }

    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn set_nonce(&self, nonce: u64) {
        self.nonce.store(nonce, Ordering::SeqCst);
    }

    pub fn push(&self, event: ChainEvent) {
        self.events.lock().push(FetchedLog::Event(event));
    }

    /// Adds a log that the fetcher reports as undecodable.
    pub fn push_malformed(&self, kind: EventKind, nonce: u64, block_number: u64) {
        self.events.lock().push(FetchedLog::Malformed(MalformedLog {
            chain_id: self.chain_id,
            kind,
            nonce,
            block_number,
            transaction_hash: format!("0xtx{nonce}"),
            log_index: 0,
            reason: "invalid payload".to_string(),
        }));
    }

    /// Returns every `[from, to]` range passed to a log query.
    pub fn queried_ranges(&self) -> Vec<(u64, u64)> {
        self.queried_ranges.lock().clone()
    }

    /// Hides an event from log queries, as a lagging node would.
    pub fn hide(&self, nonce: u64) {
        self.hidden.lock().insert(nonce);
    }

    pub fn reveal(&self, nonce: u64) {
        self.hidden.lock().remove(&nonce);
    }

    pub fn set_vault(&self, vault: &str, config: VaultConfig, metrics: VaultMetrics) {
        self.vaults.lock().insert(vault.to_string(), (config, metrics));
    }

    pub fn set_sender(&self, hash: &str, sender: &str) {
        self.senders.lock().insert(hash.to_string(), sender.to_string());
    }

    pub fn fail_metric_reads(&self, fail: bool) {
        self.fail_metrics.store(fail, Ordering::SeqCst);
    }

    pub fn log_queries(&self) -> u64 {
        self.log_queries.load(Ordering::SeqCst)
    }

    pub fn metric_reads(&self) -> u64 {
        self.metric_reads.load(Ordering::SeqCst)
    }

    pub fn config_reads(&self) -> u64 {
        self.config_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainSource for FakeChain {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn block_height(&self) -> Result<u64, IndexerError> {
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn live_nonce(&self) -> Result<u64, IndexerError> {
        Ok(self.nonce.load(Ordering::SeqCst))
    }

    async fn fetch_events(
        &self,
        kind: EventKind,
        from: u64,
        to: u64,
    ) -> Result<Vec<FetchedLog>, IndexerError> {
        self.log_queries.fetch_add(1, Ordering::SeqCst);
        self.queried_ranges.lock().push((from, to));
        let hidden = self.hidden.lock().clone();
        Ok(self
            .events
            .lock()
            .iter()
            .filter(|e| e.kind() == kind)
            .filter(|e| (from..=to).contains(&e.block_number()))
            .filter(|e| !hidden.contains(&e.nonce()))
            .cloned()
            .collect())
    }

    async fn vault_config(&self, vault: &str) -> Result<VaultConfig, IndexerError> {
        self.config_reads.fetch_add(1, Ordering::SeqCst);
        self.vaults
            .lock()
            .get(vault)
            .map(|(config, _)| config.clone())
            .ok_or_else(|| IndexerError::Decode(format!("no contract at {vault}")))
    }

    async fn vault_metrics(&self, vault: &str, _decimals: u32) -> Result<VaultMetrics, IndexerError> {
        self.metric_reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_metrics.load(Ordering::SeqCst) {
            return Err(IndexerError::Decode("execution reverted".to_string()));
        }
        self.vaults
            .lock()
            .get(vault)
            .map(|(_, metrics)| metrics.clone())
            .ok_or_else(|| IndexerError::Decode(format!("no contract at {vault}")))
    }

    async fn transaction_sender(&self, hash: &str) -> Result<Option<String>, IndexerError> {
        Ok(self.senders.lock().get(hash).cloned())
    }
}

pub fn vault_config(decimals: u32) -> VaultConfig {
    VaultConfig {
        decimals,
        ..Default::default()
    }
}

pub fn vault_metrics(share_price_usd: i64) -> VaultMetrics {
    VaultMetrics {
        total_supply: Decimal::ZERO,
        share_price_usd: Decimal::from(share_price_usd),
        tvl_usd: Decimal::ZERO,
    }
}

pub fn vault_projection(chain_id: ChainId, vault: &str, decimals: u32) -> VaultProjection {
    VaultProjection {
        chain_id,
        address: vault.to_string(),
        name: "Index Vault".to_string(),
        symbol: "IDX".to_string(),
        share_token: vault.to_string(),
        deposit_token: "0x00000000000000000000000000000000000000e5".to_string(),
        creator: None,
        config: vault_config(decimals),
        total_supply: Decimal::ZERO,
        share_price_usd: None,
        tvl_usd: None,
        metrics_refreshed_at: None,
        deposit_count: 0,
        redeem_count: 0,
        rebalance_count: 0,
        last_rebalance_block: None,
        management_fee_bps: None,
        deposit_cap: None,
        created_block: 0,
        updated_at: Utc::now(),
    }
}

fn event(nonce: u64, block_number: u64, event: VaultEvent) -> ChainEvent {
    ChainEvent {
        chain_id: CHAIN,
        nonce,
        block_number,
        transaction_hash: format!("0xtx{nonce}"),
        log_index: 0,
        event,
    }
}

pub fn deposit(nonce: u64, block: u64, vault: &str, user: &str, shares: u64) -> ChainEvent {
    event(
        nonce,
        block,
        VaultEvent::Deposit {
            vault: vault.to_string(),
            user: user.to_string(),
            shares: Decimal::from(shares),
            deposit_amount: Decimal::from(shares),
        },
    )
}

pub fn redeem(nonce: u64, block: u64, vault: &str, user: &str, shares: u64) -> ChainEvent {
    event(
        nonce,
        block,
        VaultEvent::Redeem {
            vault: vault.to_string(),
            user: user.to_string(),
            shares: Decimal::from(shares),
            deposit_out: Decimal::from(shares),
        },
    )
}

pub fn vault_created(nonce: u64, block: u64, vault: &str, tx_hash: &str) -> ChainEvent {
    let mut created = event(
        nonce,
        block,
        VaultEvent::VaultCreated {
            vault: vault.to_string(),
            share_token: vault.to_string(),
            deposit_token: "0x00000000000000000000000000000000000000e5".to_string(),
            name: "Index Vault".to_string(),
            symbol: "IDX".to_string(),
        },
    );
    created.transaction_hash = tx_hash.to_string();
    created
}

pub fn rebalance(nonce: u64, block: u64, vault: &str) -> ChainEvent {
    event(
        nonce,
        block,
        VaultEvent::Rebalance {
            vault: vault.to_string(),
            rebalance_id: nonce,
        },
    )
}

pub fn params_updated(nonce: u64, block: u64, vault: &str, fee_bps: u64) -> ChainEvent {
    event(
        nonce,
        block,
        VaultEvent::ParamsUpdated {
            vault: vault.to_string(),
            management_fee_bps: fee_bps,
            deposit_cap: Some(Decimal::from(1_000_000)),
        },
    )
}
