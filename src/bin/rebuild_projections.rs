//! Rebuild Projections
//!
//! Drops every read model and replays the whole event log into them.
//!
//! Run with: cargo run --bin rebuild_projections --release

use order_events::jobs::postgres_engine;
use order_events::projection::CancellationFlag;
use order_events::{db, telemetry, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    telemetry::init_tracing(config.log_format);

    let pool = db::connect(&config).await?;
    db::prepare_schema(&pool, &config).await?;

    let engine = postgres_engine(pool.clone(), &config);

    // Ctrl+C stops between events; the checkpoint then covers exactly what was folded
    let cancel = CancellationFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Cancellation requested, stopping after the current event");
                cancel.cancel();
            }
        });
    }

    tracing::info!(checkpoint = engine.checkpoint_name(), "Rebuilding projections");
    let report = engine.rebuild_projections(&cancel).await?;

    println!("Rebuild {}", if report.cancelled { "cancelled" } else { "completed" });
    println!("  Checkpoint: {}", report.checkpoint);
    println!("  Events folded: {}", report.events_processed);
    println!("  Batches: {}", report.batches);
    println!("  Last position: {}", report.last_position);
    println!(
        "  Duration: {} ms",
        (report.completed_at - report.started_at).num_milliseconds()
    );

    pool.close().await;
    Ok(())
}
