//! Projection state.
//!
//! Derived, mutable state rebuilt from applied events: wallet positions,
//! vault configuration and metrics, and the per-chain sync checkpoint.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use vaultsync_rpc::ChainId;

use crate::events::scale_down;

/// Durable sync watermark of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    /// Chain ID.
    pub chain_id: ChainId,

    /// Last observed block height.
    pub height: u64,

    /// Last applied event nonce.
    pub nonce: u64,

    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

impl SyncCheckpoint {
    /// Creates a checkpoint.
    #[must_use]
    pub fn new(chain_id: ChainId, height: u64, nonce: u64) -> Self {
        Self {
            chain_id,
            height,
            nonce,
            updated_at: Utc::now(),
        }
    }

    /// Returns true if the nonce has already been applied.
    #[must_use]
    pub const fn is_applied(&self, nonce: u64) -> bool {
        nonce <= self.nonce
    }

    /// Returns the next nonce expected.
    #[must_use]
    pub const fn next_nonce(&self) -> u64 {
        self.nonce.saturating_add(1)
    }
}

/// A wallet's shares in one vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionEntry {
    /// Chain ID.
    pub chain_id: ChainId,

    /// Vault address.
    pub vault: String,

    /// Share balance in raw units.
    pub shares: Decimal,

    /// Share token decimals.
    pub decimals: u32,
}

impl PositionEntry {
    /// Returns the balance in whole shares.
    #[must_use]
    pub fn whole_shares(&self) -> Decimal {
        scale_down(self.shares, self.decimals)
    }
}

/// Reference to a vault on a chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VaultRef {
    /// Chain ID.
    pub chain_id: ChainId,

    /// Vault address.
    pub vault: String,
}

/// Per-wallet projection, keyed by normalized address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletProjection {
    /// Wallet address.
    pub address: String,

    /// Positions across chains and vaults.
    pub positions: Vec<PositionEntry>,

    /// Deposits made.
    pub deposit_count: u64,

    /// Redemptions made.
    pub redeem_count: u64,

    /// Net USD volume, never negative.
    pub volume_usd: Decimal,

    /// USD value of all positions at the last update.
    pub tvl_usd: Decimal,

    /// Vaults deployed by this wallet.
    pub vaults_created: Vec<VaultRef>,

    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl WalletProjection {
    /// Creates an empty projection.
    #[must_use]
    pub fn new(address: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            address: address.into(),
            positions: Vec::new(),
            deposit_count: 0,
            redeem_count: 0,
            volume_usd: Decimal::ZERO,
            tvl_usd: Decimal::ZERO,
            vaults_created: Vec::new(),
            updated_at: now,
        }
    }

    /// Returns the position in a vault.
    #[must_use]
    pub fn position(&self, chain_id: ChainId, vault: &str) -> Option<&PositionEntry> {
        self.positions
            .iter()
            .find(|p| p.chain_id == chain_id && p.vault == vault)
    }

    /// Adds `delta` shares to the position in a vault, creating it if needed.
    pub fn adjust_position(&mut self, chain_id: ChainId, vault: &str, delta: Decimal, decimals: u32) {
        match self
            .positions
            .iter_mut()
            .find(|p| p.chain_id == chain_id && p.vault == vault)
        {
            Some(position) => {
                position.shares += delta;
                position.decimals = decimals;
            }
            None => self.positions.push(PositionEntry {
                chain_id,
                vault: vault.to_string(),
                shares: delta,
                decimals,
            }),
        }
    }

    /// Adds `delta` USD to the volume, clamping at zero.
    pub fn add_volume(&mut self, delta: Decimal) {
        self.volume_usd = (self.volume_usd + delta).max(Decimal::ZERO);
    }

    /// Records a created vault once.
    pub fn add_created_vault(&mut self, vault: VaultRef) {
        if !self.vaults_created.contains(&vault) {
            self.vaults_created.push(vault);
        }
    }
}

/// Static vault configuration read from the vault contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Share token decimals.
    pub decimals: u32,

    /// Price feed address.
    pub price_feed: String,

    /// Underlying asset addresses.
    pub assets: Vec<String>,

    /// Target weights, aligned with `assets`.
    pub weights: Vec<Decimal>,
}

/// Dynamic vault metrics read from the vault contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultMetrics {
    /// Total share supply in raw units.
    pub total_supply: Decimal,

    /// USD per whole share.
    pub share_price_usd: Decimal,

    /// Total value locked in USD.
    pub tvl_usd: Decimal,
}

/// Per-vault projection, keyed by `(chain_id, address)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultProjection {
    /// Chain ID.
    pub chain_id: ChainId,

    /// Vault address.
    pub address: String,

    /// Vault name.
    pub name: String,

    /// Share token symbol.
    pub symbol: String,

    /// Share token address.
    pub share_token: String,

    /// Deposit token address.
    pub deposit_token: String,

    /// Deployer, resolved from the creation transaction.
    pub creator: Option<String>,

    /// Static configuration.
    pub config: VaultConfig,

    /// Total share supply in raw units.
    pub total_supply: Decimal,

    /// USD per whole share, if known.
    pub share_price_usd: Option<Decimal>,

    /// Total value locked in USD, if known.
    pub tvl_usd: Option<Decimal>,

    /// When metrics were last refreshed.
    pub metrics_refreshed_at: Option<DateTime<Utc>>,

    /// Deposits applied.
    pub deposit_count: u64,

    /// Redemptions applied.
    pub redeem_count: u64,

    /// Rebalances applied.
    pub rebalance_count: u64,

    /// Block of the last rebalance.
    pub last_rebalance_block: Option<u64>,

    /// Management fee in basis points.
    pub management_fee_bps: Option<u64>,

    /// Deposit cap in deposit token units.
    pub deposit_cap: Option<Decimal>,

    /// Creation block.
    pub created_block: u64,

    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl VaultProjection {
    /// Returns true if metrics are older than `interval` at `now`.
    #[must_use]
    pub fn metrics_stale(&self, interval: chrono::Duration, now: DateTime<Utc>) -> bool {
        match self.metrics_refreshed_at {
            Some(at) => now - at >= interval,
            None => true,
        }
    }

    /// Stores freshly read metrics.
    pub fn apply_metrics(&mut self, metrics: &VaultMetrics, now: DateTime<Utc>) {
        self.total_supply = metrics.total_supply;
        self.share_price_usd = Some(metrics.share_price_usd);
        self.tvl_usd = Some(metrics.tvl_usd);
        self.metrics_refreshed_at = Some(now);
    }

    /// Returns the USD value of `raw_shares`, zero if the price is unknown.
    #[must_use]
    pub fn value_of(&self, raw_shares: Decimal) -> Decimal {
        let price = self.share_price_usd.unwrap_or(Decimal::ZERO);
        scale_down(raw_shares, self.config.decimals) * price
    }
}
