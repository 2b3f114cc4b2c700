//! Projection module
//!
//! Folds the global event stream into read models (projections). Read models
//! are derived data: they can be dropped and rebuilt from position zero at any
//! time.

mod checkpoint;
mod daily_sales;
mod engine;
mod error;
mod lock;
mod order_summary;
mod read_model;

pub use checkpoint::{
    Checkpoint, CheckpointError, CheckpointStore, InMemoryCheckpointStore, PgCheckpointStore,
    DEFAULT_CHECKPOINT,
};
pub use daily_sales::{DailySales, DailySalesProjection};
pub use engine::{CancellationFlag, ProjectionEngine, RunPhase, RunReport};
pub use error::ProjectionError;
pub use lock::{RunLease, RunLock};
pub use order_summary::{OrderSummary, OrderSummaryProjection};
pub use read_model::{Document, InMemoryReadModelStore, PgReadModelStore, ReadModelError, ReadModelStore};

use async_trait::async_trait;

use crate::event_store::StoredEvent;

/// A read model fed from the global event stream.
///
/// `apply` may see an event again after a crash between folding and
/// checkpointing, so implementations must ignore positions they have already
/// absorbed.
#[async_trait]
pub trait Projection: Send + Sync {
    /// Stable name, used in logs and fold errors
    fn name(&self) -> &str;

    /// Fold one event
    async fn apply(&self, event: &StoredEvent) -> Result<(), ProjectionError>;

    /// Drop everything this projection has written
    async fn reset(&self) -> Result<(), ProjectionError>;
}
