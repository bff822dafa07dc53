//! Stockhold worker.
//!
//! Runs the reclamation sweeper against `PostgreSQL` and exposes Prometheus metrics.
//! Any number of workers may run; the sweeper lease keeps exactly one of them sweeping.

mod config;

use anyhow::Context;
use config::Config;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use stockhold_core::SystemClock;
use stockhold_postgres::{PostgresInventoryStore, PostgresSweepLease};
use stockhold_runtime::ReclamationSweeper;
use stockhold_runtime::metrics::MetricsServer;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        instance_id = %config.instance_id,
        sweep_interval_secs = config.sweep_interval_secs,
        sweep_batch_size = config.sweep_batch_size,
        "Starting Stockhold worker"
    );

    let mut metrics = MetricsServer::new(config.metrics_addr()?);
    metrics.start().context("Failed to start metrics server")?;

    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout))
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;

    let store = Arc::new(PostgresInventoryStore::new(pool.clone()));
    store.migrate().await.context("Failed to run migrations")?;
    info!("Database ready");

    let sweeper = ReclamationSweeper::new(
        store,
        Arc::new(PostgresSweepLease::new(pool.clone())),
        Arc::new(SystemClock),
        &config.inventory(),
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(sweeper.run(shutdown_rx));

    shutdown_signal().await;
    // No receiver left means the sweeper already stopped.
    let _ = shutdown_tx.send(());

    handle.await.context("Sweeper task panicked")?;
    pool.close().await;

    info!("Worker stopped");
    Ok(())
}

/// Waits for Ctrl+C (SIGINT) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
