//! Vault event types.
//!
//! Events are decoded once at the fetch boundary into [`VaultEvent`], so
//! the engine and the applier only ever see typed payloads.

use chrono::{DateTime, Utc};
use ethers::types::H256;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use vaultsync_rpc::{abi, ChainId};

/// Kinds of events emitted by the hub contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Shares minted for a deposit.
    Deposit,
    /// Shares burned for a redemption.
    Redeem,
    /// New vault deployed.
    VaultCreated,
    /// Vault portfolio rebalanced.
    Rebalance,
    /// Vault parameters changed.
    ParamsUpdated,
}

impl EventKind {
    /// Log query order, most frequent first.
    pub const QUERY_ORDER: [Self; 5] = [
        Self::Deposit,
        Self::Redeem,
        Self::Rebalance,
        Self::ParamsUpdated,
        Self::VaultCreated,
    ];

    /// Returns the Solidity event signature.
    #[must_use]
    pub const fn signature(&self) -> &'static str {
        match self {
            Self::Deposit => "Deposit(uint256,address,address,uint256,uint256)",
            Self::Redeem => "Redeem(uint256,address,address,uint256,uint256)",
            Self::VaultCreated => "VaultCreated(uint256,address,address,address,string,string)",
            Self::Rebalance => "Rebalance(uint256,address,uint256)",
            Self::ParamsUpdated => "ParamsUpdated(uint256,address,uint256,uint256)",
        }
    }

    /// Returns the topic0 of this event.
    #[must_use]
    pub fn topic(&self) -> H256 {
        abi::event_topic(self.signature())
    }

    /// Returns a stable lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Redeem => "redeem",
            Self::VaultCreated => "vault_created",
            Self::Rebalance => "rebalance",
            Self::ParamsUpdated => "params_updated",
        }
    }

    /// Parses a name produced by [`EventKind::as_str`].
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "deposit" => Some(Self::Deposit),
            "redeem" => Some(Self::Redeem),
            "vault_created" => Some(Self::VaultCreated),
            "rebalance" => Some(Self::Rebalance),
            "params_updated" => Some(Self::ParamsUpdated),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed event payload.
///
/// Amounts are raw token units; addresses are normalized lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VaultEvent {
    /// Shares minted for a deposit.
    Deposit {
        /// Vault address.
        vault: String,
        /// Depositor.
        user: String,
        /// Shares minted.
        shares: Decimal,
        /// Deposit token amount paid in.
        deposit_amount: Decimal,
    },

    /// Shares burned for a redemption.
    Redeem {
        /// Vault address.
        vault: String,
        /// Redeemer.
        user: String,
        /// Shares burned.
        shares: Decimal,
        /// Deposit token amount paid out.
        deposit_out: Decimal,
    },

    /// New vault deployed.
    VaultCreated {
        /// Vault address.
        vault: String,
        /// Share token address.
        share_token: String,
        /// Deposit token address.
        deposit_token: String,
        /// Vault name.
        name: String,
        /// Share token symbol.
        symbol: String,
    },

    /// Vault portfolio rebalanced.
    Rebalance {
        /// Vault address.
        vault: String,
        /// Rebalance identifier.
        rebalance_id: u64,
    },

    /// Vault parameters changed.
    ParamsUpdated {
        /// Vault address.
        vault: String,
        /// Management fee in basis points.
        management_fee_bps: u64,
        /// Deposit cap in deposit token units. `None` when the cap is
        /// larger than any representable amount, i.e. uncapped.
        deposit_cap: Option<Decimal>,
    },
}

impl VaultEvent {
    /// Returns the event kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Deposit { .. } => EventKind::Deposit,
            Self::Redeem { .. } => EventKind::Redeem,
            Self::VaultCreated { .. } => EventKind::VaultCreated,
            Self::Rebalance { .. } => EventKind::Rebalance,
            Self::ParamsUpdated { .. } => EventKind::ParamsUpdated,
        }
    }

    /// Returns the vault the event concerns.
    #[must_use]
    pub fn vault(&self) -> &str {
        match self {
            Self::Deposit { vault, .. }
            | Self::Redeem { vault, .. }
            | Self::VaultCreated { vault, .. }
            | Self::Rebalance { vault, .. }
            | Self::ParamsUpdated { vault, .. } => vault,
        }
    }

    /// Returns the wallet the event concerns, if any.
    #[must_use]
    pub fn user(&self) -> Option<&str> {
        match self {
            Self::Deposit { user, .. } | Self::Redeem { user, .. } => Some(user),
            _ => None,
        }
    }
}

/// A decoded event with its on-chain position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEvent {
    /// Chain ID.
    pub chain_id: ChainId,

    /// Event nonce assigned by the hub contract.
    pub nonce: u64,

    /// Block number.
    pub block_number: u64,

    /// Transaction hash.
    pub transaction_hash: String,

    /// Position within the block.
    pub log_index: u64,

    /// Decoded payload.
    pub event: VaultEvent,
}

impl ChainEvent {
    /// Returns the event kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.event.kind()
    }
}

/// A log that matched an event topic but could not be decoded.
///
/// Carries enough of its position for the engine to hold the checkpoint
/// right before its nonce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalformedLog {
    /// Chain ID.
    pub chain_id: ChainId,

    /// Event kind the log was fetched for.
    pub kind: EventKind,

    /// Event nonce read from the first indexed topic.
    pub nonce: u64,

    /// Block number.
    pub block_number: u64,

    /// Transaction hash, empty if the node omitted it.
    pub transaction_hash: String,

    /// Position within the block.
    pub log_index: u64,

    /// Decode failure.
    pub reason: String,
}

/// One entry returned by a log query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchedLog {
    /// Fully decoded event.
    Event(ChainEvent),
    /// Log whose payload could not be decoded.
    Malformed(MalformedLog),
}

impl FetchedLog {
    /// Returns the event nonce.
    #[must_use]
    pub const fn nonce(&self) -> u64 {
        match self {
            Self::Event(event) => event.nonce,
            Self::Malformed(log) => log.nonce,
        }
    }

    /// Returns the block number.
    #[must_use]
    pub const fn block_number(&self) -> u64 {
        match self {
            Self::Event(event) => event.block_number,
            Self::Malformed(log) => log.block_number,
        }
    }

    /// Returns the event kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Event(event) => event.kind(),
            Self::Malformed(log) => log.kind,
        }
    }

    /// Returns true if the log could not be decoded.
    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

impl From<ChainEvent> for FetchedLog {
    fn from(event: ChainEvent) -> Self {
        Self::Event(event)
    }
}

/// Append-only record of an applied event, unique per `(chain_id, nonce)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Chain ID.
    pub chain_id: ChainId,

    /// Event kind.
    pub kind: EventKind,

    /// Event nonce.
    pub nonce: u64,

    /// Block number.
    pub block_number: u64,

    /// Transaction hash.
    pub transaction_hash: String,

    /// Position within the block.
    pub log_index: u64,

    /// Vault address.
    pub vault: Option<String>,

    /// Wallet address.
    pub user: Option<String>,

    /// Full decoded payload.
    pub payload: VaultEvent,

    /// When the event was applied.
    pub applied_at: DateTime<Utc>,
}

impl EventRecord {
    /// Builds the record for an applied event.
    #[must_use]
    pub fn from_event(event: &ChainEvent, applied_at: DateTime<Utc>) -> Self {
        Self {
            chain_id: event.chain_id,
            kind: event.kind(),
            nonce: event.nonce,
            block_number: event.block_number,
            transaction_hash: event.transaction_hash.clone(),
            log_index: event.log_index,
            vault: Some(event.event.vault().to_string()),
            user: event.event.user().map(str::to_string),
            payload: event.event.clone(),
            applied_at,
        }
    }
}
