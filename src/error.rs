//! Error handling module
//!
//! The command-facing error type and its stable error codes.

use uuid::Uuid;

use crate::domain::DomainError;
use crate::event_store::EventStoreError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Business rejection or unreadable history
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Another writer appended first; reload and retry
    #[error("Version conflict for aggregate {aggregate_id}: expected {expected}, found {actual}")]
    ConcurrencyConflict {
        aggregate_id: Uuid,
        expected: i64,
        actual: i64,
    },

    #[error("{aggregate_type} not found: {id}")]
    NotFound {
        aggregate_type: &'static str,
        id: Uuid,
    },

    #[error("Event store error: {0}")]
    EventStore(EventStoreError),
}

impl From<EventStoreError> for AppError {
    fn from(err: EventStoreError) -> Self {
        match err {
            EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            } => AppError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            },
            other => AppError::EventStore(other),
        }
    }
}

impl AppError {
    /// Check if reloading and retrying the command may succeed
    pub fn is_conflict(&self) -> bool {
        matches!(self, AppError::ConcurrencyConflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound { .. })
    }

    /// Stable machine-readable code
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Domain(e) if e.is_rule_violation() => match e {
                DomainError::InvalidAmount(_) => "invalid_amount",
                _ => "business_rule_violation",
            },
            AppError::Domain(_) => "replay_failure",
            AppError::ConcurrencyConflict { .. } => "version_conflict",
            AppError::NotFound { .. } => "not_found",
            AppError::EventStore(_) => "event_store_error",
        }
    }
}
