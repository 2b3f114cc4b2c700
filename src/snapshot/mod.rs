//! Snapshot module
//!
//! Keyed store of the latest folded state per aggregate. Snapshots are an
//! optimization only: deleting every snapshot changes replay cost, never the
//! loaded state.

mod memory;
mod postgres;

pub use memory::InMemorySnapshotStore;
pub use postgres::PgSnapshotStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::domain::DomainError;

/// Errors that can occur in a snapshot store
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Snapshot store lock poisoned")]
    LockPoisoned,
}

/// Stored snapshot of one aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    /// Number of events folded into `state`
    pub version: i64,
    pub state: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// Capture an aggregate's current state
    pub fn capture<A: Aggregate>(aggregate: &A) -> Result<Self, SnapshotError> {
        Ok(Self {
            aggregate_id: aggregate.id(),
            aggregate_type: A::aggregate_type().to_string(),
            version: aggregate.version(),
            state: serde_json::to_value(aggregate.to_snapshot())?,
            created_at: Utc::now(),
        })
    }

    /// Restore the aggregate this snapshot was taken from
    pub fn restore<A: Aggregate>(&self) -> Result<A, DomainError> {
        if self.aggregate_type != A::aggregate_type() {
            return Err(DomainError::SnapshotDecode(format!(
                "snapshot belongs to {} not {}",
                self.aggregate_type,
                A::aggregate_type()
            )));
        }

        let state: A::Snapshot = serde_json::from_value(self.state.clone())
            .map_err(|e| DomainError::SnapshotDecode(e.to_string()))?;
        let aggregate = A::from_snapshot(state, self.version)?;

        if aggregate.id() != self.aggregate_id {
            return Err(DomainError::AggregateMismatch {
                expected: self.aggregate_id,
                found: aggregate.id(),
            });
        }

        Ok(aggregate)
    }
}

/// When the repository should take a snapshot after a save
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotPolicy {
    /// Snapshot whenever the version reaches or crosses a multiple of N
    EveryNEvents(u64),
    /// Never write snapshots (existing ones are still read)
    Never,
}

impl SnapshotPolicy {
    /// Policy from an interval where 0 disables snapshotting
    pub fn every(interval: u64) -> Self {
        if interval == 0 {
            Self::Never
        } else {
            Self::EveryNEvents(interval)
        }
    }

    /// Decide after `appended` events brought the aggregate to `version`.
    ///
    /// With one event per save this is exactly `version % N == 0`; a batch
    /// that jumps over a multiple still triggers.
    pub fn should_snapshot(&self, version: i64, appended: usize) -> bool {
        match self {
            Self::Never => false,
            Self::EveryNEvents(interval) => {
                if version <= 0 || appended == 0 {
                    return false;
                }
                // an interval beyond any reachable version never fires
                let Ok(interval) = i64::try_from(*interval) else {
                    return false;
                };
                let before = version - appended as i64;
                version / interval > before.max(0) / interval
            }
        }
    }
}

/// Snapshot persistence.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Store a snapshot, replacing any existing one for the aggregate
    async fn save(&self, snapshot: Snapshot) -> Result<(), SnapshotError>;

    /// Latest snapshot, or `None`
    async fn get(&self, aggregate_id: Uuid) -> Result<Option<Snapshot>, SnapshotError>;

    /// Remove the snapshot for an aggregate
    async fn delete(&self, aggregate_id: Uuid) -> Result<(), SnapshotError>;
}
