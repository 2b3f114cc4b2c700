//! Aggregate Repository
//!
//! Loads aggregates from a snapshot plus the event tail, saves their
//! uncommitted events with an optimistic version check and takes snapshots
//! according to the configured policy.

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::instrument;
use uuid::Uuid;

use crate::aggregate::Aggregate;
use crate::domain::OperationContext;
use crate::error::AppError;
use crate::event_store::{decode_stream, EventStore, NewEvent, StoredEvent};
use crate::snapshot::{Snapshot, SnapshotPolicy, SnapshotStore};

pub struct AggregateRepository<A> {
    events: Arc<dyn EventStore>,
    snapshots: Arc<dyn SnapshotStore>,
    policy: SnapshotPolicy,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A: Aggregate> AggregateRepository<A> {
    pub fn new(
        events: Arc<dyn EventStore>,
        snapshots: Arc<dyn SnapshotStore>,
        policy: SnapshotPolicy,
    ) -> Self {
        Self {
            events,
            snapshots,
            policy,
            _aggregate: PhantomData,
        }
    }

    pub fn policy(&self) -> SnapshotPolicy {
        self.policy
    }

    /// Load the current state of an aggregate.
    ///
    /// Starts from the snapshot when one exists and decodes; otherwise (or if
    /// the snapshot is unusable) replays the full history.
    #[instrument(skip(self), fields(aggregate_type = A::aggregate_type()))]
    pub async fn load(&self, id: Uuid) -> Result<A, AppError> {
        let snapshot = match self.snapshots.get(id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(%id, error = %e, "Snapshot read failed, replaying full history");
                None
            }
        };

        if let Some(snapshot) = snapshot {
            match snapshot.restore::<A>() {
                Ok(mut aggregate) => {
                    let tail = self
                        .events
                        .get_events_from_version(id, snapshot.version)
                        .await?;
                    aggregate.fold(&decode_stream::<A::Event>(&tail)?)?;
                    return Ok(aggregate);
                }
                Err(e) => {
                    tracing::warn!(
                        %id,
                        version = snapshot.version,
                        error = %e,
                        "Snapshot unusable, replaying full history"
                    );
                }
            }
        }

        let history = self.events.get_events(id).await?;
        if history.is_empty() {
            return Err(AppError::NotFound {
                aggregate_type: A::aggregate_type(),
                id,
            });
        }

        Ok(A::from_history(&decode_stream::<A::Event>(&history)?)?)
    }

    /// Load the state as it was at `cutoff`
    pub async fn load_as_of(&self, id: Uuid, cutoff: DateTime<Utc>) -> Result<A, AppError> {
        let history = decode_stream::<A::Event>(&self.events.get_events(id).await?)?;

        match history.first() {
            Some(first) if first.occurred_at <= cutoff => Ok(A::from_history_until(&history, cutoff)?),
            _ => Err(AppError::NotFound {
                aggregate_type: A::aggregate_type(),
                id,
            }),
        }
    }

    /// Append the aggregate's uncommitted events.
    ///
    /// On success the uncommitted buffer is cleared; on conflict it is left as
    /// is and nothing was written.
    #[instrument(
        skip(self, aggregate, context),
        fields(aggregate_type = A::aggregate_type(), aggregate_id = %aggregate.id())
    )]
    pub async fn save(
        &self,
        aggregate: &mut A,
        context: &OperationContext,
    ) -> Result<Vec<StoredEvent>, AppError> {
        let pending = aggregate.uncommitted_events();
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let expected_version = aggregate.version() - pending.len() as i64;
        let new_events = pending
            .iter()
            .map(|event| NewEvent::from_recorded(event, context))
            .collect::<Result<Vec<_>, _>>()?;

        let stored = self
            .events
            .append(A::aggregate_type(), aggregate.id(), new_events, expected_version)
            .await?;
        aggregate.clear_uncommitted_events();

        if self.policy.should_snapshot(aggregate.version(), stored.len()) {
            self.save_snapshot(aggregate).await;
        }

        Ok(stored)
    }

    /// Write a snapshot; failures are logged and never fail the command
    async fn save_snapshot(&self, aggregate: &A) {
        let snapshot = match Snapshot::capture(aggregate) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(aggregate_id = %aggregate.id(), error = %e, "Snapshot capture failed");
                return;
            }
        };

        if let Err(e) = self.snapshots.save(snapshot).await {
            tracing::warn!(
                aggregate_id = %aggregate.id(),
                version = aggregate.version(),
                error = %e,
                "Snapshot save failed"
            );
        }
    }
}
