//! Event Store module
//!
//! Persistence layer for Event Sourcing: an append-only log with one stream
//! per aggregate, a global position across all streams, and optimistic
//! concurrency on append.

mod error;
mod memory;
mod postgres;

pub use error::EventStoreError;
pub use memory::InMemoryEventStore;
pub use postgres::PgEventStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{DomainError, DomainEvent, OperationContext, RecordedEvent};

/// Stored event from the log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Global, monotonically increasing position across all aggregates
    pub position: i64,
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub aggregate_type: String,
    pub event_type: String,
    /// 1-based version within the aggregate's stream
    pub version: i64,
    pub payload: serde_json::Value,
    pub metadata: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Decode the payload into the aggregate's typed event
    pub fn decode<E: DomainEvent>(&self) -> Result<RecordedEvent<E>, DomainError> {
        Ok(RecordedEvent {
            event_id: self.event_id,
            aggregate_id: self.aggregate_id,
            version: self.version,
            occurred_at: self.occurred_at,
            payload: E::decode(&self.event_type, &self.payload)?,
        })
    }
}

/// Decode a version-ordered stream
pub fn decode_stream<E: DomainEvent>(
    events: &[StoredEvent],
) -> Result<Vec<RecordedEvent<E>>, DomainError> {
    events.iter().map(StoredEvent::decode).collect()
}

/// An event ready to be appended; the store assigns version and position
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub metadata: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl NewEvent {
    /// Serialize a raised event for storage
    pub fn from_recorded<E: DomainEvent>(
        event: &RecordedEvent<E>,
        context: &OperationContext,
    ) -> Result<Self, EventStoreError> {
        Ok(Self {
            event_id: event.event_id,
            event_type: event.event_type().to_string(),
            payload: serde_json::to_value(&event.payload)?,
            metadata: context.to_metadata(),
            occurred_at: event.occurred_at,
        })
    }
}

/// Append-only event log.
///
/// Implementations must:
/// - reject an append whose `expected_version` differs from the stream's
///   current max version, without writing anything
/// - assign versions `expected_version + 1 ..= expected_version + n`
/// - write a batch atomically
/// - assign global positions such that a reader polling with
///   `get_unprocessed_events` never observes a position before every
///   lower position is visible
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append events to one aggregate's stream
    async fn append(
        &self,
        aggregate_type: &str,
        aggregate_id: Uuid,
        events: Vec<NewEvent>,
        expected_version: i64,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Full history of one aggregate, version ascending
    async fn get_events(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Events with `version > from_version`, version ascending
    async fn get_events_from_version(
        &self,
        aggregate_id: Uuid,
        from_version: i64,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Up to `batch_size` events with `position > last_position`, position ascending
    async fn get_unprocessed_events(
        &self,
        last_position: i64,
        batch_size: i64,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Current max version of a stream (0 when empty)
    async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, EventStoreError>;
}

/// Checks shared by every backend before touching storage
fn validate_append(expected_version: i64, events: &[NewEvent]) -> Result<(), EventStoreError> {
    if expected_version < 0 {
        return Err(EventStoreError::InvalidEventData(format!(
            "expected version must not be negative (got {})",
            expected_version
        )));
    }

    if let Some(event) = events.iter().find(|e| e.event_type.trim().is_empty()) {
        return Err(EventStoreError::InvalidEventData(format!(
            "event {} has an empty event type",
            event.event_id
        )));
    }

    Ok(())
}
