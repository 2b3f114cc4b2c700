//! Scheduled Jobs
//!
//! Background task that keeps the read models up to date by running the
//! projection engine on a fixed interval until shut down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use sqlx::PgPool;

use crate::config::Config;
use crate::event_store::PgEventStore;
use crate::projection::{
    CancellationFlag, DailySalesProjection, OrderSummaryProjection, PgCheckpointStore,
    PgReadModelStore, ProjectionEngine, ProjectionError, RunLock, RunReport,
};

/// Engine over PostgreSQL with the order read models registered.
///
/// Uses the advisory run lock so several runner processes can share one
/// database.
pub fn postgres_engine(pool: PgPool, config: &Config) -> ProjectionEngine {
    let read_models = Arc::new(PgReadModelStore::new(pool.clone()));

    ProjectionEngine::new(
        Arc::new(PgEventStore::new(pool.clone())),
        Arc::new(PgCheckpointStore::new(pool.clone())),
    )
    .with_checkpoint_name(config.projection_checkpoint.clone())
    .with_batch_size(config.projection_batch_size)
    .with_lock(RunLock::postgres(pool, config.projection_checkpoint.clone()))
    .register(Arc::new(OrderSummaryProjection::new(read_models.clone())))
    .register(Arc::new(DailySalesProjection::new(read_models)))
}

/// Configuration for the projection scheduler
#[derive(Debug, Clone)]
pub struct ProjectionSchedulerConfig {
    /// Delay between runs (default: 1 second)
    pub poll_interval: Duration,
}

impl Default for ProjectionSchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Projection Scheduler - runs the engine periodically
pub struct ProjectionScheduler {
    engine: Arc<ProjectionEngine>,
    config: ProjectionSchedulerConfig,
    cancel: CancellationFlag,
    shutdown: Arc<Notify>,
}

/// Handle to a running scheduler
pub struct SchedulerHandle {
    cancel: CancellationFlag,
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

impl ProjectionScheduler {
    /// Create a new scheduler
    pub fn new(engine: Arc<ProjectionEngine>) -> Self {
        Self::with_config(engine, ProjectionSchedulerConfig::default())
    }

    /// Create with custom configuration
    pub fn with_config(engine: Arc<ProjectionEngine>, config: ProjectionSchedulerConfig) -> Self {
        Self {
            engine,
            config,
            cancel: CancellationFlag::new(),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Start the scheduler in the background
    pub fn start(self) -> SchedulerHandle {
        let cancel = self.cancel.clone();
        let shutdown = self.shutdown.clone();
        let join = tokio::spawn(async move {
            self.run().await;
        });

        SchedulerHandle {
            cancel,
            shutdown,
            join,
        }
    }

    /// Run the scheduler loop
    async fn run(&self) {
        tracing::info!(
            checkpoint = self.engine.checkpoint_name(),
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Projection scheduler started"
        );

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // failures are logged inside and retried on the next tick
                    let _ = self.run_once().await;
                    if self.cancel.is_cancelled() {
                        break;
                    }
                }
                _ = self.shutdown.notified() => break,
            }
        }

        tracing::info!("Projection scheduler stopped");
    }

    /// Run the engine once until caught up (for manual trigger or testing)
    pub async fn run_once(&self) -> Result<RunReport, ProjectionError> {
        let result = self.engine.process_until_caught_up(&self.cancel).await;

        match &result {
            Ok(report) if report.events_processed > 0 => {
                tracing::debug!(
                    events_processed = report.events_processed,
                    last_position = report.last_position,
                    "Projection tick"
                );
            }
            Ok(_) => {}
            Err(e) if e.is_already_running() => {
                tracing::warn!("Projection run skipped: another run holds the lock");
            }
            Err(e) => tracing::error!(error = %e, "Projection run failed"),
        }

        result
    }
}

impl SchedulerHandle {
    /// Stop after the event currently being folded and wait for the task
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.shutdown.notify_one();

        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "Projection scheduler task failed");
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::{EventStore, InMemoryEventStore, NewEvent};
    use crate::projection::{CheckpointStore, InMemoryCheckpointStore};
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_scheduler_config_default() {
        let config = ProjectionSchedulerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_scheduler_catches_up_and_stops() {
        let events = Arc::new(InMemoryEventStore::new());
        let id = Uuid::new_v4();
        for version in 0..5 {
            events
                .append(
                    "Test",
                    id,
                    vec![NewEvent {
                        event_id: Uuid::new_v4(),
                        event_type: "Ticked".to_string(),
                        payload: serde_json::json!({}),
                        metadata: serde_json::json!({}),
                        occurred_at: Utc::now(),
                    }],
                    version,
                )
                .await
                .unwrap();
        }

        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        let engine = Arc::new(
            ProjectionEngine::new(events, checkpoints.clone()).with_batch_size(2),
        );
        let handle = ProjectionScheduler::with_config(
            engine,
            ProjectionSchedulerConfig {
                poll_interval: Duration::from_millis(10),
            },
        )
        .start();

        let caught_up = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if checkpoints.get("global").await.unwrap().last_processed_position == 5 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(caught_up.is_ok());

        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .unwrap();
    }
}
