//! Projection applier.
//!
//! Maps one event onto the wallet and vault projections it touches. The
//! applier never decides whether an event should run; the sync engine
//! owns ordering, replay protection and checkpointing.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, warn};
use vaultsync_rpc::ChainId;

use super::model::{VaultProjection, VaultRef, WalletProjection};
use crate::error::IndexerError;
use crate::events::{ChainEvent, VaultEvent};
use crate::source::ChainSource;
use crate::store::ProjectionStore;

/// Default minimum time between vault metric refreshes.
pub const DEFAULT_REFRESH_INTERVAL_SECS: i64 = 60;

/// Applies events to projections.
#[derive(Debug, Clone)]
pub struct ProjectionApplier {
    refresh_interval: chrono::Duration,
}

impl Default for ProjectionApplier {
    fn default() -> Self {
        Self::new(chrono::Duration::seconds(DEFAULT_REFRESH_INTERVAL_SECS))
    }
}

impl ProjectionApplier {
    /// Creates an applier with a vault metric refresh interval.
    #[must_use]
    pub const fn new(refresh_interval: chrono::Duration) -> Self {
        Self { refresh_interval }
    }

    /// Returns the vault metric refresh interval.
    #[must_use]
    pub const fn refresh_interval(&self) -> chrono::Duration {
        self.refresh_interval
    }

    /// Applies one event.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::VaultNotFound`] if the event references a
    /// vault with no projection, or any chain or store error.
    pub async fn apply(
        &self,
        source: &dyn ChainSource,
        store: &dyn ProjectionStore,
        event: &ChainEvent,
    ) -> Result<(), IndexerError> {
        self.apply_at(source, store, event, Utc::now()).await
    }

    /// Applies one event as of `now`.
    ///
    /// # Errors
    ///
    /// See [`ProjectionApplier::apply`].
    pub async fn apply_at(
        &self,
        source: &dyn ChainSource,
        store: &dyn ProjectionStore,
        event: &ChainEvent,
        now: DateTime<Utc>,
    ) -> Result<(), IndexerError> {
        match &event.event {
            VaultEvent::Deposit { vault, user, shares, .. } => {
                self.apply_share_change(source, store, event.chain_id, vault, user, *shares, false, now)
                    .await
            }
            VaultEvent::Redeem { vault, user, shares, .. } => {
                self.apply_share_change(source, store, event.chain_id, vault, user, *shares, true, now)
                    .await
            }
            VaultEvent::VaultCreated {
                vault,
                share_token,
                deposit_token,
                name,
                symbol,
            } => {
                if store.find_vault(event.chain_id, vault).await?.is_some() {
                    debug!(chain_id = event.chain_id, vault = %vault, "vault already projected");
                    return Ok(());
                }

                let config = source.vault_config(vault).await?;
                let creator = source.transaction_sender(&event.transaction_hash).await?;

                let mut projection = VaultProjection {
                    chain_id: event.chain_id,
                    address: vault.clone(),
                    name: name.clone(),
                    symbol: symbol.clone(),
                    share_token: share_token.clone(),
                    deposit_token: deposit_token.clone(),
                    creator: creator.clone(),
                    config,
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
                    created_block: event.block_number,
                    updated_at: now,
                };
                self.refresh_metrics(source, &mut projection, now).await;
                store.upsert_vault(&projection).await?;

                if let Some(creator) = creator {
                    let mut wallet = store
                        .find_wallet(&creator)
                        .await?
                        .unwrap_or_else(|| WalletProjection::new(creator.clone(), now));
                    wallet.add_created_vault(VaultRef {
                        chain_id: event.chain_id,
                        vault: vault.clone(),
                    });
                    wallet.updated_at = now;
                    store.upsert_wallet(&wallet).await?;
                }

                Ok(())
            }
            VaultEvent::Rebalance { vault, .. } => {
                let mut projection = require_vault(store, event.chain_id, vault).await?;
                projection.rebalance_count = projection.rebalance_count.saturating_add(1);
                projection.last_rebalance_block = Some(event.block_number);
                self.refresh_metrics(source, &mut projection, now).await;
                projection.updated_at = now;
                store.upsert_vault(&projection).await
            }
            VaultEvent::ParamsUpdated {
                vault,
                management_fee_bps,
                deposit_cap,
            } => {
                let mut projection = require_vault(store, event.chain_id, vault).await?;
                projection.management_fee_bps = Some(*management_fee_bps);
                projection.deposit_cap = *deposit_cap;
                projection.updated_at = now;
                store.upsert_vault(&projection).await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_share_change(
        &self,
        source: &dyn ChainSource,
        store: &dyn ProjectionStore,
        chain_id: ChainId,
        vault: &str,
        user: &str,
        shares: Decimal,
        redeem: bool,
        now: DateTime<Utc>,
    ) -> Result<(), IndexerError> {
        let delta = if redeem { -shares } else { shares };
        let mut projection = require_vault(store, chain_id, vault).await?;
        self.refresh_metrics(source, &mut projection, now).await;

        let mut wallet = store
            .find_wallet(user)
            .await?
            .unwrap_or_else(|| WalletProjection::new(user, now));

        wallet.adjust_position(chain_id, vault, delta, projection.config.decimals);
        if redeem {
            wallet.redeem_count = wallet.redeem_count.saturating_add(1);
            projection.redeem_count = projection.redeem_count.saturating_add(1);
        } else {
            wallet.deposit_count = wallet.deposit_count.saturating_add(1);
            projection.deposit_count = projection.deposit_count.saturating_add(1);
        }
        wallet.add_volume(projection.value_of(delta));
        wallet.tvl_usd = wallet_tvl(store, &wallet, &projection).await?;
        wallet.updated_at = now;
        projection.updated_at = now;

        store.upsert_vault(&projection).await?;
        store.upsert_wallet(&wallet).await
    }

    /// Refreshes vault metrics if they are older than the refresh interval.
    ///
    /// A failed read keeps the previous metrics.
    async fn refresh_metrics(
        &self,
        source: &dyn ChainSource,
        projection: &mut VaultProjection,
        now: DateTime<Utc>,
    ) {
        if !projection.metrics_stale(self.refresh_interval, now) {
            return;
        }

        match source
            .vault_metrics(&projection.address, projection.config.decimals)
            .await
        {
            Ok(metrics) => projection.apply_metrics(&metrics, now),
            Err(e) => warn!(
                chain_id = projection.chain_id,
                vault = %projection.address,
                error = %e,
                "vault metric refresh failed"
            ),
        }
    }
}

async fn require_vault(
    store: &dyn ProjectionStore,
    chain_id: ChainId,
    vault: &str,
) -> Result<VaultProjection, IndexerError> {
    store
        .find_vault(chain_id, vault)
        .await?
        .ok_or_else(|| IndexerError::VaultNotFound {
            chain_id,
            vault: vault.to_string(),
        })
}

/// Sums the USD value of every position, using `current` for its own vault.
async fn wallet_tvl(
    store: &dyn ProjectionStore,
    wallet: &WalletProjection,
    current: &VaultProjection,
) -> Result<Decimal, IndexerError> {
    let mut total = Decimal::ZERO;
    for position in &wallet.positions {
        if position.chain_id == current.chain_id && position.vault == current.address {
            total += current.value_of(position.shares);
        } else if let Some(vault) = store.find_vault(position.chain_id, &position.vault).await? {
            total += vault.value_of(position.shares);
        }
    }
    Ok(total.max(Decimal::ZERO))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::InMemoryStore;
    use crate::testing::{self, FakeChain, CHAIN, USER, VAULT};

    async fn setup() -> (FakeChain, Arc<InMemoryStore>) {
        let chain = FakeChain::new(CHAIN);
        chain.set_vault(VAULT, testing::vault_config(6), testing::vault_metrics(2));
        let store = Arc::new(InMemoryStore::new());
        store
            .upsert_vault(&testing::vault_projection(CHAIN, VAULT, 6))
            .await
            .expect("vault");
        (chain, store)
    }

    #[tokio::test]
    async fn test_deposit_then_redeem() {
        let (chain, store) = setup().await;
        let applier = ProjectionApplier::default();

        applier
            .apply(&chain, store.as_ref(), &testing::deposit(51, 992, VAULT, USER, 5_000_000))
            .await
            .expect("deposit");
        applier
            .apply(&chain, store.as_ref(), &testing::redeem(52, 995, VAULT, USER, 2_000_000))
            .await
            .expect("redeem");

        let wallet = store.find_wallet(USER).await.expect("find").expect("wallet");
        assert_eq!(
            wallet.position(CHAIN, VAULT).map(|p| p.shares),
            Some(Decimal::from(3_000_000))
        );
        assert_eq!(wallet.deposit_count, 1);
        assert_eq!(wallet.redeem_count, 1);
        // 5 shares in and 2 out at $2
        assert_eq!(wallet.volume_usd, Decimal::from(6));
        assert_eq!(wallet.tvl_usd, Decimal::from(6));

        let vault = store.find_vault(CHAIN, VAULT).await.expect("find").expect("vault");
        assert_eq!(vault.deposit_count, 1);
        assert_eq!(vault.redeem_count, 1);
        assert_eq!(vault.share_price_usd, Some(Decimal::from(2)));
    }

    #[tokio::test]
    async fn test_deposit_unknown_vault() {
        let chain = FakeChain::new(CHAIN);
        let store = InMemoryStore::new();

        let err = ProjectionApplier::default()
            .apply(&chain, &store, &testing::deposit(1, 10, VAULT, USER, 1))
            .await
            .expect_err("should fail");

        assert!(matches!(err, IndexerError::VaultNotFound { .. }));
        assert!(store.find_wallet(USER).await.expect("find").is_none());
    }

    #[tokio::test]
    async fn test_volume_clamped_on_redeem() {
        let (chain, store) = setup().await;

        ProjectionApplier::default()
            .apply(&chain, store.as_ref(), &testing::redeem(1, 10, VAULT, USER, 4_000_000))
            .await
            .expect("redeem");

        let wallet = store.find_wallet(USER).await.expect("find").expect("wallet");
        assert_eq!(wallet.volume_usd, Decimal::ZERO);
        assert_eq!(wallet.tvl_usd, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_metric_refresh_throttled() {
        let (chain, store) = setup().await;
        let applier = ProjectionApplier::default();
        let now = Utc::now();

        applier
            .apply_at(&chain, store.as_ref(), &testing::deposit(1, 10, VAULT, USER, 1), now)
            .await
            .expect("deposit");
        applier
            .apply_at(
                &chain,
                store.as_ref(),
                &testing::deposit(2, 11, VAULT, USER, 1),
                now + chrono::Duration::seconds(30),
            )
            .await
            .expect("deposit");
        assert_eq!(chain.metric_reads(), 1);

        applier
            .apply_at(
                &chain,
                store.as_ref(),
                &testing::deposit(3, 12, VAULT, USER, 1),
                now + chrono::Duration::seconds(61),
            )
            .await
            .expect("deposit");
        assert_eq!(chain.metric_reads(), 2);
    }

    #[tokio::test]
    async fn test_metric_refresh_failure_is_not_fatal() {
        let (chain, store) = setup().await;
        chain.fail_metric_reads(true);

        ProjectionApplier::default()
            .apply(&chain, store.as_ref(), &testing::deposit(1, 10, VAULT, USER, 1_000_000))
            .await
            .expect("deposit");

        let wallet = store.find_wallet(USER).await.expect("find").expect("wallet");
        assert_eq!(wallet.deposit_count, 1);
        assert_eq!(wallet.volume_usd, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_vault_created() {
        let chain = FakeChain::new(CHAIN);
        chain.set_vault(VAULT, testing::vault_config(6), testing::vault_metrics(1));
        chain.set_sender("0xcreate", testing::CREATOR);
        let store = InMemoryStore::new();
        let applier = ProjectionApplier::default();
        let event = testing::vault_created(1, 5, VAULT, "0xcreate");

        applier.apply(&chain, &store, &event).await.expect("create");
        applier.apply(&chain, &store, &event).await.expect("replay");

        let vault = store.find_vault(CHAIN, VAULT).await.expect("find").expect("vault");
        assert_eq!(vault.creator.as_deref(), Some(testing::CREATOR));
        assert_eq!(vault.config.decimals, 6);
        assert_eq!(vault.created_block, 5);
        assert!(vault.metrics_refreshed_at.is_some());
        assert_eq!(chain.config_reads(), 1);

        let creator = store
            .find_wallet(testing::CREATOR)
            .await
            .expect("find")
            .expect("wallet");
        assert_eq!(creator.vaults_created.len(), 1);
    }

    #[tokio::test]
    async fn test_rebalance_and_params() {
        let (chain, store) = setup().await;
        let applier = ProjectionApplier::default();

        applier
            .apply(&chain, store.as_ref(), &testing::rebalance(1, 40, VAULT))
            .await
            .expect("rebalance");
        applier
            .apply(&chain, store.as_ref(), &testing::params_updated(2, 41, VAULT, 150))
            .await
            .expect("params");

        let vault = store.find_vault(CHAIN, VAULT).await.expect("find").expect("vault");
        assert_eq!(vault.rebalance_count, 1);
        assert_eq!(vault.last_rebalance_block, Some(40));
        assert_eq!(vault.management_fee_bps, Some(150));
        assert_eq!(vault.deposit_cap, Some(Decimal::from(1_000_000)));
    }
}
