//! order_events - projection runner
//!
//! Keeps the read models up to date by running the projection engine on an
//! interval until SIGINT/SIGTERM.

use std::sync::Arc;

use order_events::jobs::{postgres_engine, ProjectionScheduler, ProjectionSchedulerConfig};
use order_events::{db, telemetry, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    telemetry::init_tracing(config.log_format);

    tracing::info!(environment = %config.environment, "Starting order_events projection runner");
    tracing::info!("Connecting to database...");

    let pool = db::connect(&config).await?;
    db::prepare_schema(&pool, &config).await?;

    tracing::info!("Database connected successfully");

    let engine = Arc::new(postgres_engine(pool.clone(), &config));
    let handle = ProjectionScheduler::with_config(
        engine,
        ProjectionSchedulerConfig {
            poll_interval: config.projection_poll_interval,
        },
    )
    .start();

    shutdown_signal().await;

    // Cleanup
    tracing::info!("Stopping projection scheduler...");
    handle.shutdown().await;
    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
