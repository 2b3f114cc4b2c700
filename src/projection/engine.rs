//! Projection Engine
//!
//! Reads the global event stream from a durable checkpoint, folds every event
//! into each registered projection in position order, then advances the
//! checkpoint to that event.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::instrument;

use crate::event_store::{EventStore, StoredEvent};

use super::checkpoint::{CheckpointStore, DEFAULT_CHECKPOINT};
use super::lock::RunLock;
use super::{Projection, ProjectionError};

const DEFAULT_BATCH_SIZE: i64 = 100;

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Fetching,
    Folding,
    CheckpointAdvance,
}

impl RunPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RunPhase::Fetching,
            2 => RunPhase::Folding,
            3 => RunPhase::CheckpointAdvance,
            _ => RunPhase::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            RunPhase::Idle => 0,
            RunPhase::Fetching => 1,
            RunPhase::Folding => 2,
            RunPhase::CheckpointAdvance => 3,
        }
    }
}

/// Cooperative cancellation, checked between events
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of one engine run
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub checkpoint: String,
    pub batches: u64,
    pub events_processed: u64,
    /// Checkpoint position when the run ended
    pub last_position: i64,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl RunReport {
    fn start(checkpoint: &str) -> Self {
        let now = Utc::now();
        Self {
            checkpoint: checkpoint.to_string(),
            batches: 0,
            events_processed: 0,
            last_position: 0,
            cancelled: false,
            started_at: now,
            completed_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    SingleBatch,
    UntilCaughtUp,
}

/// Projection Engine for updating read models
pub struct ProjectionEngine {
    event_store: Arc<dyn EventStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    projections: Vec<Arc<dyn Projection>>,
    lock: RunLock,
    checkpoint_name: String,
    batch_size: i64,
    phase: AtomicU8,
}

impl ProjectionEngine {
    /// Create an engine on the default checkpoint with an in-process run lock
    pub fn new(event_store: Arc<dyn EventStore>, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            event_store,
            checkpoints,
            projections: Vec::new(),
            lock: RunLock::local(),
            checkpoint_name: DEFAULT_CHECKPOINT.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            phase: AtomicU8::new(RunPhase::Idle.as_u8()),
        }
    }

    pub fn with_checkpoint_name(mut self, name: impl Into<String>) -> Self {
        self.checkpoint_name = name.into();
        self
    }

    /// Events fetched per batch (at least 1)
    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_lock(mut self, lock: RunLock) -> Self {
        self.lock = lock;
        self
    }

    /// Register a projection; projections are applied in registration order
    pub fn register(mut self, projection: Arc<dyn Projection>) -> Self {
        self.projections.push(projection);
        self
    }

    pub fn checkpoint_name(&self) -> &str {
        &self.checkpoint_name
    }

    pub fn phase(&self) -> RunPhase {
        RunPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    fn set_phase(&self, phase: RunPhase) {
        self.phase.store(phase.as_u8(), Ordering::SeqCst);
    }

    // =========================================================================
    // Runs
    // =========================================================================

    /// Fold one batch of pending events
    #[instrument(skip(self, cancel), fields(checkpoint = %self.checkpoint_name))]
    pub async fn process_pending_events(
        &self,
        cancel: &CancellationFlag,
    ) -> Result<RunReport, ProjectionError> {
        self.locked_run(cancel, RunMode::SingleBatch, false).await
    }

    /// Fold batches until the stream is drained or the run is cancelled
    #[instrument(skip(self, cancel), fields(checkpoint = %self.checkpoint_name))]
    pub async fn process_until_caught_up(
        &self,
        cancel: &CancellationFlag,
    ) -> Result<RunReport, ProjectionError> {
        self.locked_run(cancel, RunMode::UntilCaughtUp, false).await
    }

    /// Reset every projection and the checkpoint, then replay from position zero
    #[instrument(skip(self, cancel), fields(checkpoint = %self.checkpoint_name))]
    pub async fn rebuild_projections(
        &self,
        cancel: &CancellationFlag,
    ) -> Result<RunReport, ProjectionError> {
        self.locked_run(cancel, RunMode::UntilCaughtUp, true).await
    }

    async fn locked_run(
        &self,
        cancel: &CancellationFlag,
        mode: RunMode,
        rebuild: bool,
    ) -> Result<RunReport, ProjectionError> {
        let lease = self
            .lock
            .try_acquire()
            .await?
            .ok_or_else(|| ProjectionError::AlreadyRunning(self.checkpoint_name.clone()))?;

        let result = self.run(cancel, mode, rebuild).await;

        self.set_phase(RunPhase::Idle);
        lease.release().await;

        match &result {
            Ok(report) if report.events_processed > 0 || rebuild => {
                tracing::info!(
                    events_processed = report.events_processed,
                    batches = report.batches,
                    last_position = report.last_position,
                    cancelled = report.cancelled,
                    rebuild,
                    "Projection run finished"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Projection run failed"),
        }

        result
    }

    async fn run(
        &self,
        cancel: &CancellationFlag,
        mode: RunMode,
        rebuild: bool,
    ) -> Result<RunReport, ProjectionError> {
        let mut report = RunReport::start(&self.checkpoint_name);

        if rebuild {
            // Checkpoint first: a run that stops before the projections are
            // cleared replays from 0 over guarded documents.
            self.checkpoints.reset(&self.checkpoint_name).await?;
            for projection in &self.projections {
                projection.reset().await?;
            }
            tracing::warn!(
                projections = self.projections.len(),
                "Projections reset, replaying from position 0"
            );
        }

        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let fetched = self.run_batch(cancel, &mut report).await?;

            if mode == RunMode::SingleBatch || report.cancelled || fetched < self.batch_size as usize {
                break;
            }
        }

        report.completed_at = Utc::now();
        Ok(report)
    }

    /// Fetch one batch and fold it; returns how many events were fetched
    async fn run_batch(
        &self,
        cancel: &CancellationFlag,
        report: &mut RunReport,
    ) -> Result<usize, ProjectionError> {
        self.set_phase(RunPhase::Fetching);

        let checkpoint = self.checkpoints.get(&self.checkpoint_name).await?;
        report.last_position = checkpoint.last_processed_position;

        let events = self
            .event_store
            .get_unprocessed_events(checkpoint.last_processed_position, self.batch_size)
            .await?;
        report.batches += 1;

        for event in &events {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            self.set_phase(RunPhase::Folding);
            self.fold(event).await?;

            self.set_phase(RunPhase::CheckpointAdvance);
            self.checkpoints
                .advance(&self.checkpoint_name, event.position)
                .await?;

            report.events_processed += 1;
            report.last_position = event.position;
        }

        Ok(events.len())
    }

    async fn fold(&self, event: &StoredEvent) -> Result<(), ProjectionError> {
        for projection in &self.projections {
            if let Err(e) = projection.apply(event).await {
                tracing::error!(
                    projection = projection.name(),
                    position = event.position,
                    event_type = %event.event_type,
                    error = %e,
                    "Projection fold failed"
                );
                return Err(ProjectionError::Fold {
                    projection: projection.name().to_string(),
                    position: event.position,
                    message: e.to_string(),
                });
            }
        }

        Ok(())
    }
}
