//! VaultSync Syncer binary.
//!
//! Entry point for the service that keeps vault projections in step with
//! every configured chain.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vaultsync_indexer::{
    ChainSyncer, ContractLogFetcher, InMemoryStore, PgStore, ProjectionApplier, ProjectionStore,
};
use vaultsync_rpc::{CounterStore, RedisCounterStore, ResilientRpcClient};
use vaultsync_syncer::{SyncService, SyncerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,vaultsync_indexer=debug,vaultsync_rpc=debug,vaultsync_syncer=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SyncerConfig::from_env().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    info!("Starting VaultSync syncer");
    info!("Chains: {}", config.chains.len());
    info!("Tick interval: {} ms", config.tick_interval_ms);

    let counters: Option<Arc<dyn CounterStore>> = match &config.redis_url {
        Some(url) => Some(Arc::new(
            RedisCounterStore::from_url(url).context("failed to create Redis pool")?,
        )),
        None => {
            warn!("REDIS_URL not set, rate limit counters are process-local");
            None
        }
    };

    let client = Arc::new(
        ResilientRpcClient::from_config(&config.rpc, counters)
            .context("failed to build RPC client")?,
    );

    let store: Arc<dyn ProjectionStore> = match &config.database_url {
        Some(url) => Arc::new(
            PgStore::connect(url)
                .await
                .context("failed to connect to Postgres")?,
        ),
        None => {
            warn!("DATABASE_URL not set, projections are kept in memory");
            Arc::new(InMemoryStore::new())
        }
    };

    let applier = ProjectionApplier::new(config.vault_refresh_interval());
    let syncers = config
        .chains
        .iter()
        .map(|chain| {
            let fetcher =
                ContractLogFetcher::new(Arc::clone(&client), chain.chain_id, &chain.hub_address)
                    .with_context(|| format!("invalid hub address for chain {}", chain.name))?;
            ChainSyncer::new(
                chain.clone(),
                Arc::new(fetcher),
                Arc::clone(&store),
                applier.clone(),
            )
            .map(Arc::new)
            .with_context(|| format!("failed to set up chain {}", chain.name))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let service = Arc::new(SyncService::new(config.tick_interval(), syncers));
    service.reconcile_on_startup().await;

    let runner = tokio::spawn(Arc::clone(&service).run());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down syncer");
    service.stop();
    runner.await?;

    Ok(())
}
