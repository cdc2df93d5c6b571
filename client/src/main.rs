//! Ferry Agent - pushes pending records from a local JSON store to a sync endpoint.
//!
//! Configuration comes from `FERRY_*` environment variables (a `.env` file is
//! honored). The agent runs until interrupted.

use std::sync::Arc;
use std::time::Duration;

use ferry_client::{load_record_set, AgentConfig, FileStore, StrategyKind, SyncCoordinator};
use ferry_engine::MigrationEngine;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ferry_client=debug,ferry_agent=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = AgentConfig::from_env()?;

    tracing::info!(
        store = %config.store_path.display(),
        storage_key = %config.storage_key,
        endpoint = %config.sync.endpoint,
        "Starting Ferry agent"
    );

    let store = Arc::new(FileStore::open(&config.store_path).await?);

    // The agent registers no transforms: older data must be migrated by the
    // application before it can be synced.
    let engine = MigrationEngine::new(config.schema_version)?;
    let set = load_record_set(store.as_ref(), &config.storage_key, &engine).await?;
    tracing::info!(
        version = set.version,
        items = set.len(),
        pending = set.pending_count(),
        "Record set loaded"
    );

    let strategy = config.sync.strategy;
    let interval = config.sync.sync_interval;
    let coordinator = SyncCoordinator::new(store, config.storage_key.clone());
    coordinator.enable(config.sync).await?;

    // Batch sessions poll on their own; other strategies sync on change, and
    // the agent has no change feed, so poll here.
    let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick(), if strategy != StrategyKind::Batch => {
                coordinator.sync().await?;
            }
        }
    }

    coordinator.disable();
    let status = coordinator.get_status();
    tracing::info!(
        synced = status.synced,
        failed = status.failed,
        pending = status.pending,
        "Ferry agent stopped"
    );

    Ok(())
}
