//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use thiserror::Error;
use uuid::Uuid;

use super::MoneyError;

/// Domain-specific errors
///
/// These errors represent business rule violations and replay failures.
/// They are independent of the storage layer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// A business precondition failed; no event was raised
    #[error("Domain rule violation: {0}")]
    RuleViolation(String),

    /// Invalid monetary value supplied to an operation
    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] MoneyError),

    /// Attempted to build an aggregate from zero events
    #[error("Cannot rebuild aggregate from an empty history")]
    EmptyHistory,

    /// Event versions are not contiguous
    #[error("Version gap during replay: expected {expected}, found {found}")]
    VersionGap { expected: i64, found: i64 },

    /// Event belongs to a different stream
    #[error("Event for aggregate {found} applied to aggregate {expected}")]
    AggregateMismatch { expected: Uuid, found: Uuid },

    /// Event type not in the aggregate's closed event set
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// Payload could not be decoded into the declared event type
    #[error("Failed to decode {event_type} payload: {message}")]
    EventDecode { event_type: String, message: String },

    /// Snapshot state could not be decoded
    #[error("Failed to decode snapshot: {0}")]
    SnapshotDecode(String),
}

impl DomainError {
    /// Create a rule violation error
    pub fn rule(reason: impl Into<String>) -> Self {
        Self::RuleViolation(reason.into())
    }

    /// Check if this is a business rejection (caller's fault)
    pub fn is_rule_violation(&self) -> bool {
        matches!(self, Self::RuleViolation(_) | Self::InvalidAmount(_))
    }

    /// Check if this error indicates corrupt or unreadable history
    pub fn is_replay_failure(&self) -> bool {
        matches!(
            self,
            Self::VersionGap { .. }
                | Self::AggregateMismatch { .. }
                | Self::UnknownEventType(_)
                | Self::EventDecode { .. }
                | Self::SnapshotDecode(_)
        )
    }
}
