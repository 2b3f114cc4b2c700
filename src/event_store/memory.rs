//! In-memory event store
//!
//! Intended for tests and local development. Appends take one write lock, so
//! the version check and the write are a single critical section and
//! positions are handed out in commit order.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use super::{validate_append, EventStore, EventStoreError, NewEvent, StoredEvent};

#[derive(Debug, Default)]
struct Log {
    /// Position `p` lives at index `p - 1`
    events: Vec<StoredEvent>,
    /// Per-aggregate indexes into `events`, version ascending
    streams: HashMap<Uuid, Vec<usize>>,
}

/// In-memory append-only event store.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    log: RwLock<Log>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events across all streams
    pub fn len(&self) -> usize {
        self.log.read().map(|log| log.events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stream(&self, aggregate_id: Uuid, from_version: i64) -> Result<Vec<StoredEvent>, EventStoreError> {
        let log = self.log.read().map_err(|_| EventStoreError::LockPoisoned)?;

        Ok(log
            .streams
            .get(&aggregate_id)
            .map(|indexes| {
                indexes
                    .iter()
                    .map(|&i| &log.events[i])
                    .filter(|event| event.version > from_version)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        aggregate_type: &str,
        aggregate_id: Uuid,
        events: Vec<NewEvent>,
        expected_version: i64,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        validate_append(expected_version, &events)?;

        let mut log = self.log.write().map_err(|_| EventStoreError::LockPoisoned)?;

        let current = log
            .streams
            .get(&aggregate_id)
            .map(|indexes| indexes.len() as i64)
            .unwrap_or(0);

        if current != expected_version {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual: current,
            });
        }

        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut committed = Vec::with_capacity(events.len());
        for (offset, event) in events.into_iter().enumerate() {
            let index = log.events.len();
            let stored = StoredEvent {
                position: index as i64 + 1,
                event_id: event.event_id,
                aggregate_id,
                aggregate_type: aggregate_type.to_string(),
                event_type: event.event_type,
                version: expected_version + offset as i64 + 1,
                payload: event.payload,
                metadata: event.metadata,
                occurred_at: event.occurred_at,
            };
            log.events.push(stored.clone());
            log.streams.entry(aggregate_id).or_default().push(index);
            committed.push(stored);
        }

        Ok(committed)
    }

    async fn get_events(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.stream(aggregate_id, 0)
    }

    async fn get_events_from_version(
        &self,
        aggregate_id: Uuid,
        from_version: i64,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.stream(aggregate_id, from_version)
    }

    async fn get_unprocessed_events(
        &self,
        last_position: i64,
        batch_size: i64,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let log = self.log.read().map_err(|_| EventStoreError::LockPoisoned)?;

        let start = usize::try_from(last_position.max(0)).unwrap_or(usize::MAX);
        let take = usize::try_from(batch_size.max(0)).unwrap_or(0);

        Ok(log.events.iter().skip(start).take(take).cloned().collect())
    }

    async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, EventStoreError> {
        let log = self.log.read().map_err(|_| EventStoreError::LockPoisoned)?;
        Ok(log
            .streams
            .get(&aggregate_id)
            .map(|indexes| indexes.len() as i64)
            .unwrap_or(0))
    }
}
