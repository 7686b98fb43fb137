use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use botfleet_core::FleetConfig;
use botfleet_runtime::{Fleet, TelegramConnector};
use botfleet_storage::{PgConnectionFactory, TokenVault};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "botfleet=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("botfleet starting...");

    let config = FleetConfig::from_env()?;
    tracing::info!(
        max_workers = config.max_active_workers,
        pool = config.max_connections,
        batch_size = config.batch_size,
        "fleet configured"
    );

    let vault = Arc::new(
        TokenVault::from_env().context("VAULT_KEY required (base64-encoded 32-byte key)")?,
    );

    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL environment variable required")?;
    let factory = PgConnectionFactory::new(database_url);

    let connector = Arc::new(TelegramConnector::new());

    let fleet = Fleet::new(config, factory, vault, connector)?;

    // Adopt any tokens provided at boot (comma separated plaintext tokens)
    if let Ok(tokens) = std::env::var("BOT_TOKENS") {
        for (i, token) in tokens
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .enumerate()
        {
            let name = format!("worker-{}", i + 1);
            match fleet.adopt(token, &name).await {
                Ok(_) => tracing::info!(worker = %name, "worker adopted"),
                Err(e) => tracing::error!(worker = %name, error = %e, "failed to adopt worker"),
            }
        }
    }

    tracing::info!("fleet ready, waiting for shutdown signal...");
    tokio::signal::ctrl_c().await?;

    let metrics = fleet.metrics().await;
    tracing::info!(
        workers = metrics.workers,
        queue_depth = metrics.queue_depth,
        events_persisted = metrics.events_persisted,
        "shutting down"
    );

    fleet.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}
