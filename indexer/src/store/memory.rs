//! In-memory projection store.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use vaultsync_rpc::ChainId;

use super::ProjectionStore;
use crate::error::IndexerError;
use crate::events::EventRecord;
use crate::projection::{SyncCheckpoint, VaultProjection, WalletProjection};

/// Projection store held in process memory.
///
/// Keeps every checkpoint write so tests can inspect how a watermark moved.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    checkpoints: RwLock<HashMap<ChainId, SyncCheckpoint>>,
    checkpoint_history: RwLock<Vec<SyncCheckpoint>>,
    wallets: RwLock<HashMap<String, WalletProjection>>,
    vaults: RwLock<HashMap<(ChainId, String), VaultProjection>>,
    events: RwLock<BTreeMap<(ChainId, u64), EventRecord>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the event records of a chain in nonce order.
    #[must_use]
    pub fn event_records(&self, chain_id: ChainId) -> Vec<EventRecord> {
        self.events
            .read()
            .range((chain_id, 0)..=(chain_id, u64::MAX))
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// Returns every checkpoint written for a chain, oldest first.
    #[must_use]
    pub fn checkpoint_history(&self, chain_id: ChainId) -> Vec<SyncCheckpoint> {
        self.checkpoint_history
            .read()
            .iter()
            .filter(|c| c.chain_id == chain_id)
            .cloned()
            .collect()
    }

    /// Overwrites the checkpoint of a chain, even with a lower nonce.
    ///
    /// Stands in for a lost checkpoint write.
    pub fn reset_checkpoint(&self, chain_id: ChainId, height: u64, nonce: u64) {
        self.checkpoints
            .write()
            .insert(chain_id, SyncCheckpoint::new(chain_id, height, nonce));
    }

    /// Returns the number of wallets.
    #[must_use]
    pub fn wallet_count(&self) -> usize {
        self.wallets.read().len()
    }
}

#[async_trait]
impl ProjectionStore for InMemoryStore {
    async fn find_checkpoint(&self, chain_id: ChainId) -> Result<Option<SyncCheckpoint>, IndexerError> {
        Ok(self.checkpoints.read().get(&chain_id).cloned())
    }

    async fn upsert_checkpoint(
        &self,
        chain_id: ChainId,
        height: u64,
        nonce: u64,
    ) -> Result<SyncCheckpoint, IndexerError> {
        let mut checkpoints = self.checkpoints.write();
        if let Some(existing) = checkpoints.get(&chain_id) {
            if existing.nonce > nonce {
                return Ok(existing.clone());
            }
        }
        let checkpoint = SyncCheckpoint::new(chain_id, height, nonce);
        checkpoints.insert(chain_id, checkpoint.clone());
        self.checkpoint_history.write().push(checkpoint.clone());
        Ok(checkpoint)
    }

    async fn find_wallet(&self, address: &str) -> Result<Option<WalletProjection>, IndexerError> {
        Ok(self.wallets.read().get(address).cloned())
    }

    async fn upsert_wallet(&self, wallet: &WalletProjection) -> Result<(), IndexerError> {
        self.wallets
            .write()
            .insert(wallet.address.clone(), wallet.clone());
        Ok(())
    }

    async fn find_vault(
        &self,
        chain_id: ChainId,
        address: &str,
    ) -> Result<Option<VaultProjection>, IndexerError> {
        Ok(self
            .vaults
            .read()
            .get(&(chain_id, address.to_string()))
            .cloned())
    }

    async fn upsert_vault(&self, vault: &VaultProjection) -> Result<(), IndexerError> {
        self.vaults
            .write()
            .insert((vault.chain_id, vault.address.clone()), vault.clone());
        Ok(())
    }

    async fn insert_event_record(&self, record: &EventRecord) -> Result<bool, IndexerError> {
        let mut events = self.events.write();
        let key = (record.chain_id, record.nonce);
        if events.contains_key(&key) {
            return Ok(false);
        }
        events.insert(key, record.clone());
        Ok(true)
    }

    async fn find_event_record(
        &self,
        chain_id: ChainId,
        nonce: u64,
    ) -> Result<Option<EventRecord>, IndexerError> {
        Ok(self.events.read().get(&(chain_id, nonce)).cloned())
    }

    async fn find_last_event_record(&self, chain_id: ChainId) -> Result<Option<EventRecord>, IndexerError> {
        Ok(self
            .events
            .read()
            .range((chain_id, 0)..=(chain_id, u64::MAX))
            .map(|(_, record)| record)
            .max_by_key(|record| (record.block_number, record.nonce))
            .cloned())
    }
}
