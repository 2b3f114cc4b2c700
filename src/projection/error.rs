//! Projection Errors

use crate::domain::{DomainError, MoneyError};
use crate::event_store::EventStoreError;

use super::checkpoint::CheckpointError;
use super::read_model::ReadModelError;

/// Errors that can occur while projecting events
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// Another run holds the lock for this checkpoint
    #[error("Projection run already in progress for checkpoint '{0}'")]
    AlreadyRunning(String),

    /// A projection failed to fold an event; the checkpoint stays before it
    #[error("Projection '{projection}' failed at position {position}: {message}")]
    Fold {
        projection: String,
        position: i64,
        message: String,
    },

    #[error("Event decode error: {0}")]
    Decode(#[from] DomainError),

    #[error("Amount error: {0}")]
    Amount(#[from] MoneyError),

    /// A running total left the range of `Decimal`
    #[error("Read model '{model}' total overflowed for '{key}'")]
    SumOverflow { model: String, key: String },

    /// An event arrived for a document that was never created
    #[error("Read model '{model}' has no document '{key}'")]
    MissingDocument { model: String, key: String },

    #[error(transparent)]
    EventStore(#[from] EventStoreError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    ReadModel(#[from] ReadModelError),

    #[error("Run lock error: {0}")]
    Lock(#[source] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProjectionError {
    pub fn is_already_running(&self) -> bool {
        matches!(self, ProjectionError::AlreadyRunning(_))
    }
}
