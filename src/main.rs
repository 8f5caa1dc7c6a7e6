// src/main.rs
use std::sync::Arc;

use ct_brand_monitor::config::HostConfig;
use ct_brand_monitor::database::{PgStore, Store};
use ct_brand_monitor::scheduler::Scheduler;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!("starting ct-brand-monitor");

    let config = HostConfig::from_env()?;

    let store = PgStore::new(&config.database_url, config.max_db_connections).await?;
    store.migrate().await?;
    tracing::info!("database connected and migrated");

    let store: Arc<dyn Store> = Arc::new(store);
    let scheduler = Arc::new(Scheduler::new(store));

    let (handle, stop_tx) = scheduler.start();
    tracing::info!("scheduler started, polling for new certificates");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    stop_tx.send(true).ok();
    handle.await?;

    tracing::info!("ct-brand-monitor stopped");
    Ok(())
}
