//! Domain Events
//!
//! Event definitions for Event Sourcing.
//! Events are immutable facts that have happened in the system.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use super::{DomainError, Money};

/// A closed set of events belonging to one aggregate kind.
///
/// `decode` is the only way stored payloads become typed events, so an event
/// type outside `EVENT_TYPES` is rejected instead of being skipped.
pub trait DomainEvent:
    Serialize + DeserializeOwned + Clone + std::fmt::Debug + Send + Sync + 'static
{
    /// Every event type name this enum can decode
    const EVENT_TYPES: &'static [&'static str];

    /// Get the event type as a string
    fn event_type(&self) -> &'static str;

    /// Decode a stored payload tagged with `event_type`
    fn decode(event_type: &str, payload: &serde_json::Value) -> Result<Self, DomainError> {
        if !Self::EVENT_TYPES.contains(&event_type) {
            return Err(DomainError::UnknownEventType(event_type.to_string()));
        }

        let event: Self =
            serde_json::from_value(payload.clone()).map_err(|e| DomainError::EventDecode {
                event_type: event_type.to_string(),
                message: e.to_string(),
            })?;

        if event.event_type() != event_type {
            return Err(DomainError::EventDecode {
                event_type: event_type.to_string(),
                message: format!("payload is tagged {}", event.event_type()),
            });
        }

        Ok(event)
    }
}

/// An event together with its stream coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent<E> {
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    /// 1-based position within the aggregate's stream
    pub version: i64,
    pub occurred_at: DateTime<Utc>,
    pub payload: E,
}

impl<E: DomainEvent> RecordedEvent<E> {
    /// Record a freshly raised event at `version`
    pub fn new(aggregate_id: Uuid, version: i64, payload: E) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            aggregate_id,
            version,
            occurred_at: Utc::now(),
            payload,
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }
}

/// Order-related events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OrderEvent {
    /// Order was opened for a customer
    OrderOpened {
        order_id: Uuid,
        customer_id: Uuid,
        opened_at: DateTime<Utc>,
    },

    /// A line was added (or an existing line's quantity increased)
    ItemAdded {
        sku: String,
        description: String,
        quantity: u32,
        unit_price: Money,
    },

    /// A line was removed
    ItemRemoved { sku: String },

    /// A discount was applied; `amount` is authoritative on replay
    DiscountApplied {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        percentage: Option<Decimal>,
        amount: Money,
    },

    /// Order was finalized and closed
    OrderFinalized {
        subtotal: Money,
        discount: Money,
        total: Money,
        finalized_at: DateTime<Utc>,
    },

    /// Order was cancelled
    OrderCancelled {
        reason: String,
        cancelled_at: DateTime<Utc>,
    },
}

impl DomainEvent for OrderEvent {
    const EVENT_TYPES: &'static [&'static str] = &[
        "OrderOpened",
        "ItemAdded",
        "ItemRemoved",
        "DiscountApplied",
        "OrderFinalized",
        "OrderCancelled",
    ];

    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderOpened { .. } => "OrderOpened",
            OrderEvent::ItemAdded { .. } => "ItemAdded",
            OrderEvent::ItemRemoved { .. } => "ItemRemoved",
            OrderEvent::DiscountApplied { .. } => "DiscountApplied",
            OrderEvent::OrderFinalized { .. } => "OrderFinalized",
            OrderEvent::OrderCancelled { .. } => "OrderCancelled",
        }
    }
}
