//! Postgres projection store.
//!
//! Unsigned chain values are stored as `BIGINT`, amounts as `NUMERIC`,
//! positions and vault configuration as `JSONB`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::info;
use vaultsync_rpc::ChainId;

use super::ProjectionStore;
use crate::error::IndexerError;
use crate::events::{EventKind, EventRecord, VaultEvent};
use crate::projection::{
    PositionEntry, SyncCheckpoint, VaultConfig, VaultProjection, VaultRef, WalletProjection,
};

/// Default connection pool size.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Inserts or moves a checkpoint. Rows with a higher stored nonce are left
/// untouched and return nothing.
const UPSERT_CHECKPOINT: &str = "INSERT INTO sync_checkpoints (chain_id, height, nonce, updated_at) \
     VALUES ($1, $2, $3, now()) \
     ON CONFLICT (chain_id) DO UPDATE \
     SET height = EXCLUDED.height, nonce = EXCLUDED.nonce, updated_at = EXCLUDED.updated_at \
     WHERE sync_checkpoints.nonce <= EXCLUDED.nonce \
     RETURNING chain_id, height, nonce, updated_at";

/// Projection store backed by Postgres.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wraps an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `url` and runs pending migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or a migration fails.
    pub async fn connect(url: &str) -> Result<Self, IndexerError> {
        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(url)
            .await?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Runs the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<(), IndexerError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("projection store migrations applied");
        Ok(())
    }

    /// Returns the connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn to_i64(value: u64, field: &str) -> Result<i64, IndexerError> {
    i64::try_from(value).map_err(|_| IndexerError::Store(format!("{field} {value} exceeds BIGINT")))
}

fn to_u64(value: i64, field: &str) -> Result<u64, IndexerError> {
    u64::try_from(value).map_err(|_| IndexerError::Store(format!("negative {field}: {value}")))
}

fn get_u64(row: &PgRow, column: &str) -> Result<u64, IndexerError> {
    to_u64(row.try_get::<i64, _>(column)?, column)
}

fn get_opt_u64(row: &PgRow, column: &str) -> Result<Option<u64>, IndexerError> {
    row.try_get::<Option<i64>, _>(column)?
        .map(|v| to_u64(v, column))
        .transpose()
}

fn checkpoint_from_row(row: &PgRow) -> Result<SyncCheckpoint, IndexerError> {
    Ok(SyncCheckpoint {
        chain_id: get_u64(row, "chain_id")?,
        height: get_u64(row, "height")?,
        nonce: get_u64(row, "nonce")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn wallet_from_row(row: &PgRow) -> Result<WalletProjection, IndexerError> {
    let positions: Json<Vec<PositionEntry>> = row.try_get("positions")?;
    let vaults_created: Json<Vec<VaultRef>> = row.try_get("vaults_created")?;
    Ok(WalletProjection {
        address: row.try_get("address")?,
        positions: positions.0,
        deposit_count: get_u64(row, "deposit_count")?,
        redeem_count: get_u64(row, "redeem_count")?,
        volume_usd: row.try_get("volume_usd")?,
        tvl_usd: row.try_get("tvl_usd")?,
        vaults_created: vaults_created.0,
        updated_at: row.try_get("updated_at")?,
    })
}

fn vault_from_row(row: &PgRow) -> Result<VaultProjection, IndexerError> {
    let config: Json<VaultConfig> = row.try_get("config")?;
    Ok(VaultProjection {
        chain_id: get_u64(row, "chain_id")?,
        address: row.try_get("address")?,
        name: row.try_get("name")?,
        symbol: row.try_get("symbol")?,
        share_token: row.try_get("share_token")?,
        deposit_token: row.try_get("deposit_token")?,
        creator: row.try_get("creator")?,
        config: config.0,
        total_supply: row.try_get("total_supply")?,
        share_price_usd: row.try_get::<Option<Decimal>, _>("share_price_usd")?,
        tvl_usd: row.try_get::<Option<Decimal>, _>("tvl_usd")?,
        metrics_refreshed_at: row.try_get::<Option<DateTime<Utc>>, _>("metrics_refreshed_at")?,
        deposit_count: get_u64(row, "deposit_count")?,
        redeem_count: get_u64(row, "redeem_count")?,
        rebalance_count: get_u64(row, "rebalance_count")?,
        last_rebalance_block: get_opt_u64(row, "last_rebalance_block")?,
        management_fee_bps: get_opt_u64(row, "management_fee_bps")?,
        deposit_cap: row.try_get::<Option<Decimal>, _>("deposit_cap")?,
        created_block: get_u64(row, "created_block")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn event_record_from_row(row: &PgRow) -> Result<EventRecord, IndexerError> {
    let kind: String = row.try_get("kind")?;
    let payload: Json<VaultEvent> = row.try_get("payload")?;
    Ok(EventRecord {
        chain_id: get_u64(row, "chain_id")?,
        kind: EventKind::parse(&kind)
            .ok_or_else(|| IndexerError::Store(format!("unknown event kind {kind}")))?,
        nonce: get_u64(row, "nonce")?,
        block_number: get_u64(row, "block_number")?,
        transaction_hash: row.try_get("transaction_hash")?,
        log_index: get_u64(row, "log_index")?,
        vault: row.try_get("vault")?,
        user: row.try_get("user_address")?,
        payload: payload.0,
        applied_at: row.try_get("applied_at")?,
    })
}

const EVENT_COLUMNS: &str = "chain_id, nonce, kind, block_number, transaction_hash, log_index, \
                             vault, user_address, payload, applied_at";

#[async_trait]
impl ProjectionStore for PgStore {
    async fn find_checkpoint(&self, chain_id: ChainId) -> Result<Option<SyncCheckpoint>, IndexerError> {
        sqlx::query(
            "SELECT chain_id, height, nonce, updated_at FROM sync_checkpoints WHERE chain_id = $1",
        )
        .bind(to_i64(chain_id, "chain_id")?)
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(checkpoint_from_row)
        .transpose()
    }

    async fn upsert_checkpoint(
        &self,
        chain_id: ChainId,
        height: u64,
        nonce: u64,
    ) -> Result<SyncCheckpoint, IndexerError> {
        let row = sqlx::query(UPSERT_CHECKPOINT)
            .bind(to_i64(chain_id, "chain_id")?)
            .bind(to_i64(height, "height")?)
            .bind(to_i64(nonce, "nonce")?)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => checkpoint_from_row(&row),
            // Stored nonce is ahead, the write was ignored
            None => self.find_checkpoint(chain_id).await?.ok_or_else(|| {
                IndexerError::Store(format!("checkpoint of chain {chain_id} missing after upsert"))
            }),
        }
    }

    async fn find_wallet(&self, address: &str) -> Result<Option<WalletProjection>, IndexerError> {
        sqlx::query(
            "SELECT address, positions, deposit_count, redeem_count, volume_usd, tvl_usd, \
             vaults_created, updated_at FROM wallets WHERE address = $1",
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(wallet_from_row)
        .transpose()
    }

    async fn upsert_wallet(&self, wallet: &WalletProjection) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT INTO wallets (address, positions, deposit_count, redeem_count, volume_usd, \
             tvl_usd, vaults_created, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (address) DO UPDATE SET \
             positions = EXCLUDED.positions, deposit_count = EXCLUDED.deposit_count, \
             redeem_count = EXCLUDED.redeem_count, volume_usd = EXCLUDED.volume_usd, \
             tvl_usd = EXCLUDED.tvl_usd, vaults_created = EXCLUDED.vaults_created, \
             updated_at = EXCLUDED.updated_at",
        )
        .bind(&wallet.address)
        .bind(Json(&wallet.positions))
        .bind(to_i64(wallet.deposit_count, "deposit_count")?)
        .bind(to_i64(wallet.redeem_count, "redeem_count")?)
        .bind(wallet.volume_usd)
        .bind(wallet.tvl_usd)
        .bind(Json(&wallet.vaults_created))
        .bind(wallet.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_vault(
        &self,
        chain_id: ChainId,
        address: &str,
    ) -> Result<Option<VaultProjection>, IndexerError> {
        sqlx::query("SELECT * FROM vaults WHERE chain_id = $1 AND address = $2")
            .bind(to_i64(chain_id, "chain_id")?)
            .bind(address)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(vault_from_row)
            .transpose()
    }

    async fn upsert_vault(&self, vault: &VaultProjection) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT INTO vaults (chain_id, address, name, symbol, share_token, deposit_token, \
             creator, config, total_supply, share_price_usd, tvl_usd, metrics_refreshed_at, \
             deposit_count, redeem_count, rebalance_count, last_rebalance_block, \
             management_fee_bps, deposit_cap, created_block, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
             $17, $18, $19, $20) \
             ON CONFLICT (chain_id, address) DO UPDATE SET \
             name = EXCLUDED.name, symbol = EXCLUDED.symbol, creator = EXCLUDED.creator, \
             config = EXCLUDED.config, total_supply = EXCLUDED.total_supply, \
             share_price_usd = EXCLUDED.share_price_usd, tvl_usd = EXCLUDED.tvl_usd, \
             metrics_refreshed_at = EXCLUDED.metrics_refreshed_at, \
             deposit_count = EXCLUDED.deposit_count, redeem_count = EXCLUDED.redeem_count, \
             rebalance_count = EXCLUDED.rebalance_count, \
             last_rebalance_block = EXCLUDED.last_rebalance_block, \
             management_fee_bps = EXCLUDED.management_fee_bps, \
             deposit_cap = EXCLUDED.deposit_cap, updated_at = EXCLUDED.updated_at",
        )
        .bind(to_i64(vault.chain_id, "chain_id")?)
        .bind(&vault.address)
        .bind(&vault.name)
        .bind(&vault.symbol)
        .bind(&vault.share_token)
        .bind(&vault.deposit_token)
        .bind(&vault.creator)
        .bind(Json(&vault.config))
        .bind(vault.total_supply)
        .bind(vault.share_price_usd)
        .bind(vault.tvl_usd)
        .bind(vault.metrics_refreshed_at)
        .bind(to_i64(vault.deposit_count, "deposit_count")?)
        .bind(to_i64(vault.redeem_count, "redeem_count")?)
        .bind(to_i64(vault.rebalance_count, "rebalance_count")?)
        .bind(
            vault
                .last_rebalance_block
                .map(|b| to_i64(b, "last_rebalance_block"))
                .transpose()?,
        )
        .bind(
            vault
                .management_fee_bps
                .map(|b| to_i64(b, "management_fee_bps"))
                .transpose()?,
        )
        .bind(vault.deposit_cap)
        .bind(to_i64(vault.created_block, "created_block")?)
        .bind(vault.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_event_record(&self, record: &EventRecord) -> Result<bool, IndexerError> {
        let result = sqlx::query(&format!(
            "INSERT INTO event_records ({EVENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (chain_id, nonce) DO NOTHING"
        ))
        .bind(to_i64(record.chain_id, "chain_id")?)
        .bind(to_i64(record.nonce, "nonce")?)
        .bind(record.kind.as_str())
        .bind(to_i64(record.block_number, "block_number")?)
        .bind(&record.transaction_hash)
        .bind(to_i64(record.log_index, "log_index")?)
        .bind(&record.vault)
        .bind(&record.user)
        .bind(Json(&record.payload))
        .bind(record.applied_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find_event_record(
        &self,
        chain_id: ChainId,
        nonce: u64,
    ) -> Result<Option<EventRecord>, IndexerError> {
        sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM event_records WHERE chain_id = $1 AND nonce = $2"
        ))
        .bind(to_i64(chain_id, "chain_id")?)
        .bind(to_i64(nonce, "nonce")?)
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(event_record_from_row)
        .transpose()
    }

    async fn find_last_event_record(&self, chain_id: ChainId) -> Result<Option<EventRecord>, IndexerError> {
        sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM event_records WHERE chain_id = $1 \
             ORDER BY block_number DESC, nonce DESC LIMIT 1"
        ))
        .bind(to_i64(chain_id, "chain_id")?)
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(event_record_from_row)
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_conversions() {
        assert_eq!(to_i64(42, "nonce").expect("fits"), 42);
        assert!(to_i64(u64::MAX, "nonce").is_err());
        assert_eq!(to_u64(7, "height").expect("fits"), 7);
        assert!(to_u64(-1, "height").is_err());
    }

    #[test]
    fn test_checkpoint_upsert_never_lowers_nonce() {
        assert!(UPSERT_CHECKPOINT.contains("WHERE sync_checkpoints.nonce <= EXCLUDED.nonce"));
        assert!(UPSERT_CHECKPOINT.contains("RETURNING"));
    }

    #[test]
    fn test_event_columns_match_placeholders() {
        assert_eq!(EVENT_COLUMNS.split(',').count(), 10);
    }
}
