//! Aggregate module
//!
//! Aggregate Root pattern implementation for Event Sourcing.

pub mod order;

pub use order::{DiscountKind, Order, OrderLine, OrderSnapshot, OrderState, OrderStatus};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::domain::{DomainError, DomainEvent, RecordedEvent};

/// Aggregate trait that all aggregates must implement
///
/// State is only ever changed through [`Aggregate::apply`], which is shared by
/// command execution, full replay, snapshot-tail replay and time travel.
pub trait Aggregate: Sized + Send + Sync {
    /// The closed set of events this aggregate handles
    type Event: DomainEvent;

    /// Versioned, explicitly typed snapshot payload
    type Snapshot: Serialize + DeserializeOwned + Send;

    /// Get the aggregate type name (for storage)
    fn aggregate_type() -> &'static str;

    /// Blank state at version 0, before any event
    fn empty(id: Uuid) -> Self;

    /// Get the aggregate ID
    fn id(&self) -> Uuid;

    /// Get the current version (number of events applied)
    fn version(&self) -> i64;

    /// Apply an event to update the aggregate state.
    ///
    /// Sets the version to `event.version`; callers that replay stored events
    /// go through [`Aggregate::replay`] which checks continuity first.
    fn apply(&mut self, event: &RecordedEvent<Self::Event>);

    /// Events raised since the last successful save
    fn uncommitted_events(&self) -> &[RecordedEvent<Self::Event>];

    /// Drop the uncommitted buffer; called after the store accepted it
    fn clear_uncommitted_events(&mut self);

    /// Capture the current state as a snapshot payload
    fn to_snapshot(&self) -> Self::Snapshot;

    /// Restore state directly from a snapshot, without applying events
    fn from_snapshot(state: Self::Snapshot, version: i64) -> Result<Self, DomainError>;

    /// Apply a stored event after checking it continues this stream
    fn replay(&mut self, event: &RecordedEvent<Self::Event>) -> Result<(), DomainError> {
        if event.aggregate_id != self.id() {
            return Err(DomainError::AggregateMismatch {
                expected: self.id(),
                found: event.aggregate_id,
            });
        }

        let expected = self.version() + 1;
        if event.version != expected {
            return Err(DomainError::VersionGap {
                expected,
                found: event.version,
            });
        }

        self.apply(event);
        Ok(())
    }

    /// Replay a version-ordered tail of events
    fn fold<'a, I>(&mut self, events: I) -> Result<(), DomainError>
    where
        I: IntoIterator<Item = &'a RecordedEvent<Self::Event>>,
    {
        for event in events {
            self.replay(event)?;
        }
        Ok(())
    }

    /// Rebuild from the full, version-ordered history
    fn from_history(events: &[RecordedEvent<Self::Event>]) -> Result<Self, DomainError> {
        let first = events.first().ok_or(DomainError::EmptyHistory)?;
        let mut aggregate = Self::empty(first.aggregate_id);
        aggregate.fold(events)?;
        Ok(aggregate)
    }

    /// Rebuild the state as it was at `cutoff`.
    ///
    /// Folds the version-ordered prefix whose `occurred_at <= cutoff`.
    fn from_history_until(
        events: &[RecordedEvent<Self::Event>],
        cutoff: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let prefix = events
            .iter()
            .take_while(|event| event.occurred_at <= cutoff)
            .count();
        Self::from_history(&events[..prefix])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Money, OrderEvent};
    use chrono::Duration;
    use std::str::FromStr;

    fn history(order_id: Uuid) -> Vec<RecordedEvent<OrderEvent>> {
        let mut order = Order::open(order_id, Uuid::new_v4());
        order
            .add_item("SKU-1", "Widget", 2, Money::from_str("10.00").unwrap())
            .unwrap();
        order.finalize().unwrap();
        order.uncommitted_events().to_vec()
    }

    #[test]
    fn test_from_history_empty() {
        let result = Order::from_history(&[]);
        assert!(matches!(result, Err(DomainError::EmptyHistory)));
    }

    #[test]
    fn test_from_history_detects_gap() {
        let mut events = history(Uuid::new_v4());
        events.remove(1);

        let result = Order::from_history(&events);
        assert_eq!(
            result.err(),
            Some(DomainError::VersionGap {
                expected: 2,
                found: 3
            })
        );
    }

    #[test]
    fn test_from_history_detects_foreign_event() {
        let mut events = history(Uuid::new_v4());
        let foreign = history(Uuid::new_v4());
        events[1] = foreign[1].clone();

        let result = Order::from_history(&events);
        assert!(matches!(result, Err(DomainError::AggregateMismatch { .. })));
    }

    #[test]
    fn test_from_history_until_cutoff() {
        let mut events = history(Uuid::new_v4());
        let base = Utc::now() - Duration::hours(3);
        for (i, event) in events.iter_mut().enumerate() {
            event.occurred_at = base + Duration::hours(i as i64);
        }

        let order = Order::from_history_until(&events, base + Duration::minutes(90)).unwrap();
        assert_eq!(order.version(), 2);
        assert_eq!(order.status(), OrderStatus::Open);
        assert_eq!(order.subtotal().to_string(), "20.00");

        let before = Order::from_history_until(&events, base - Duration::minutes(1));
        assert!(matches!(before, Err(DomainError::EmptyHistory)));
    }
}
