//! PostgreSQL event store
//!
//! Core implementation of the Event Store pattern on top of the `events`
//! table. Provides atomic event persistence with optimistic concurrency
//! control.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::instrument;
use uuid::Uuid;

use super::{validate_append, EventStore, EventStoreError, NewEvent, StoredEvent};

/// Advisory lock taken by every append transaction.
///
/// Holding it until commit makes positions become visible in order, so a
/// poller that has seen position `p` will never later discover a smaller one.
const APPEND_LOCK_KEY: i64 = 0x6f72_6465_725f_6c6f;

type EventRow = (
    i64,
    Uuid,
    Uuid,
    String,
    String,
    i64,
    serde_json::Value,
    serde_json::Value,
    DateTime<Utc>,
);

fn into_stored(row: EventRow) -> StoredEvent {
    let (position, event_id, aggregate_id, aggregate_type, event_type, version, payload, metadata, occurred_at) =
        row;
    StoredEvent {
        position,
        event_id,
        aggregate_id,
        aggregate_type,
        event_type,
        version,
        payload,
        metadata,
        occurred_at,
    }
}

/// Unique constraint guarding one version per stream
const VERSION_CONSTRAINT: &str = "events_aggregate_version_key";

/// Name of the unique constraint `err` violated, if any
fn violated_unique_constraint(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => db.constraint(),
        _ => None,
    }
}

/// Event Store for persisting and retrieving events
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Create a new PgEventStore with a database pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get current version of an aggregate inside a transaction
    async fn current_version_in(
        tx: &mut Transaction<'_, Postgres>,
        aggregate_id: Uuid,
    ) -> Result<i64, EventStoreError> {
        let result: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT MAX(version) FROM events WHERE aggregate_id = $1
            "#,
        )
        .bind(aggregate_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(result.unwrap_or(0))
    }

    /// Insert one event, returning its position
    async fn insert_event(
        tx: &mut Transaction<'_, Postgres>,
        aggregate_type: &str,
        aggregate_id: Uuid,
        version: i64,
        event: &NewEvent,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            INSERT INTO events (
                event_id, aggregate_id, aggregate_type, event_type,
                version, payload, metadata, occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING position
            "#,
        )
        .bind(event.event_id)
        .bind(aggregate_id)
        .bind(aggregate_type)
        .bind(&event.event_type)
        .bind(version)
        .bind(&event.payload)
        .bind(&event.metadata)
        .bind(event.occurred_at)
        .fetch_one(&mut **tx)
        .await
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    #[instrument(skip(self, events), fields(count = events.len()), err)]
    async fn append(
        &self,
        aggregate_type: &str,
        aggregate_id: Uuid,
        events: Vec<NewEvent>,
        expected_version: i64,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        validate_append(expected_version, &events)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(APPEND_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        // Optimistic locking: the stream must be exactly where the caller left it
        let current_version = Self::current_version_in(&mut tx, aggregate_id).await?;
        if current_version != expected_version {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual: current_version,
            });
        }

        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut committed = Vec::with_capacity(events.len());
        for (offset, event) in events.into_iter().enumerate() {
            let version = expected_version + offset as i64 + 1;

            let position =
                match Self::insert_event(&mut tx, aggregate_type, aggregate_id, version, &event).await {
                    Ok(position) => position,
                    Err(e) => match violated_unique_constraint(&e).map(str::to_owned).as_deref() {
                        Some(VERSION_CONSTRAINT) => {
                            // A writer outside the advisory lock got there first
                            tx.rollback().await?;
                            let actual = self.current_version(aggregate_id).await?;
                            return Err(EventStoreError::ConcurrencyConflict {
                                aggregate_id,
                                expected: expected_version,
                                actual,
                            });
                        }
                        Some(_) => {
                            return Err(EventStoreError::InvalidEventData(format!(
                                "event {} is already recorded",
                                event.event_id
                            )));
                        }
                        None => return Err(e.into()),
                    },
                };

            committed.push(StoredEvent {
                position,
                event_id: event.event_id,
                aggregate_id,
                aggregate_type: aggregate_type.to_string(),
                event_type: event.event_type,
                version,
                payload: event.payload,
                metadata: event.metadata,
                occurred_at: event.occurred_at,
            });
        }

        tx.commit().await?;

        tracing::debug!(
            aggregate_type,
            %aggregate_id,
            from_version = expected_version + 1,
            to_version = expected_version + committed.len() as i64,
            "Appended events"
        );

        Ok(committed)
    }

    async fn get_events(&self, aggregate_id: Uuid) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.get_events_from_version(aggregate_id, 0).await
    }

    async fn get_events_from_version(
        &self,
        aggregate_id: Uuid,
        from_version: i64,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let events = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT position, event_id, aggregate_id, aggregate_type, event_type,
                   version, payload, metadata, occurred_at
            FROM events
            WHERE aggregate_id = $1 AND version > $2
            ORDER BY version ASC
            "#,
        )
        .bind(aggregate_id)
        .bind(from_version)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(into_stored)
        .collect();

        Ok(events)
    }

    async fn get_unprocessed_events(
        &self,
        last_position: i64,
        batch_size: i64,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let events = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT position, event_id, aggregate_id, aggregate_type, event_type,
                   version, payload, metadata, occurred_at
            FROM events
            WHERE position > $1
            ORDER BY position ASC
            LIMIT $2
            "#,
        )
        .bind(last_position)
        .bind(batch_size)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(into_stored)
        .collect();

        Ok(events)
    }

    async fn current_version(&self, aggregate_id: Uuid) -> Result<i64, EventStoreError> {
        let version: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) FROM events WHERE aggregate_id = $1",
        )
        .bind(aggregate_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(version)
    }
}

// =========================================================================
// Tests (integration tests against a database live in tests/)
// =========================================================================
