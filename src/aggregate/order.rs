//! Order Aggregate
//!
//! An order is a priced basket owned by one customer. Business operations
//! validate against the current state and raise events; the state itself only
//! changes inside `apply`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{DomainError, Money, OrderEvent, RecordedEvent};

use super::Aggregate;

/// Order status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Open,
    Closed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Open => "open",
            OrderStatus::Closed => "closed",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a discount is expressed by the caller
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DiscountKind {
    /// Percentage of the current subtotal, 0 < p <= 100
    Percentage(Decimal),
    /// Fixed amount off
    Fixed(Money),
}

/// One order line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub sku: String,
    pub description: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl OrderLine {
    fn total(&self) -> Decimal {
        self.unit_price.value() * Decimal::from(self.quantity)
    }
}

/// Everything an order knows, derived from its events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderState {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub status: OrderStatus,
    pub lines: Vec<OrderLine>,
    pub discount: Money,
    pub discount_percentage: Option<Decimal>,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub version: i64,
}

/// Snapshot payload, tagged with its schema so old rows stay readable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "schema")]
pub enum OrderSnapshot {
    #[serde(rename = "order.v1")]
    V1(OrderState),
}

/// Order Aggregate
///
/// State is derived from events, never directly mutated.
#[derive(Debug, Clone)]
pub struct Order {
    state: OrderState,
    uncommitted: Vec<RecordedEvent<OrderEvent>>,
}

impl Order {
    /// Open a new order and raise `OrderOpened`
    pub fn open(order_id: Uuid, customer_id: Uuid) -> Self {
        let mut order = Self::empty(order_id);
        order.raise(OrderEvent::OrderOpened {
            order_id,
            customer_id,
            opened_at: Utc::now(),
        });
        order
    }

    /// Add `quantity` units of `sku`; repeats of a sku merge into one line
    pub fn add_item(
        &mut self,
        sku: impl Into<String>,
        description: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Result<(), DomainError> {
        self.ensure_open("add items")?;

        let sku = sku.into();
        if sku.trim().is_empty() {
            return Err(DomainError::rule("sku must not be empty"));
        }
        if quantity == 0 {
            return Err(DomainError::rule("quantity must be greater than zero"));
        }

        if let Some(line) = self.line(&sku) {
            if line.unit_price != unit_price {
                return Err(DomainError::rule(format!(
                    "sku {} is already priced at {}",
                    sku, line.unit_price
                )));
            }
            if line.quantity.checked_add(quantity).is_none() {
                return Err(DomainError::rule("line quantity overflow"));
            }
        }

        let added = unit_price.times(quantity)?;
        self.subtotal().checked_add(&added)?;

        self.raise(OrderEvent::ItemAdded {
            sku,
            description: description.into(),
            quantity,
            unit_price,
        });
        Ok(())
    }

    /// Remove the line for `sku`
    pub fn remove_item(&mut self, sku: &str) -> Result<(), DomainError> {
        self.ensure_open("remove items")?;

        let line = self
            .line(sku)
            .ok_or_else(|| DomainError::rule(format!("sku {} is not on the order", sku)))?;

        let remaining = self.subtotal().value() - line.total();
        if self.state.discount.value() > remaining {
            return Err(DomainError::rule(
                "removing this line would leave the discount larger than the subtotal",
            ));
        }

        self.raise(OrderEvent::ItemRemoved {
            sku: sku.to_string(),
        });
        Ok(())
    }

    /// Apply a discount, replacing any earlier one
    pub fn apply_discount(&mut self, discount: DiscountKind) -> Result<(), DomainError> {
        self.ensure_open("apply a discount")?;

        if self.state.lines.is_empty() {
            return Err(DomainError::rule("cannot discount an empty order"));
        }

        let subtotal = self.subtotal();
        let (percentage, amount) = match discount {
            DiscountKind::Percentage(p) => {
                if p <= Decimal::ZERO || p > Decimal::ONE_HUNDRED {
                    return Err(DomainError::rule(format!(
                        "discount percentage must be in (0, 100], got {}",
                        p
                    )));
                }
                (Some(p), subtotal.percentage(p)?)
            }
            DiscountKind::Fixed(amount) => {
                if amount.is_zero() {
                    return Err(DomainError::rule("discount must be greater than zero"));
                }
                (None, amount)
            }
        };

        if amount > subtotal {
            return Err(DomainError::rule(format!(
                "discount {} exceeds subtotal {}",
                amount, subtotal
            )));
        }

        self.raise(OrderEvent::DiscountApplied { percentage, amount });
        Ok(())
    }

    /// Close the order
    pub fn finalize(&mut self) -> Result<(), DomainError> {
        self.ensure_open("finalize")?;

        if self.state.lines.is_empty() {
            return Err(DomainError::rule("cannot finalize an empty order"));
        }

        self.raise(OrderEvent::OrderFinalized {
            subtotal: self.subtotal(),
            discount: self.state.discount,
            total: self.total(),
            finalized_at: Utc::now(),
        });
        Ok(())
    }

    /// Cancel the order
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), DomainError> {
        self.ensure_open("cancel")?;

        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(DomainError::rule("cancellation reason must not be empty"));
        }

        self.raise(OrderEvent::OrderCancelled {
            reason,
            cancelled_at: Utc::now(),
        });
        Ok(())
    }

    fn ensure_open(&self, action: &str) -> Result<(), DomainError> {
        if self.state.status != OrderStatus::Open {
            return Err(DomainError::rule(format!(
                "cannot {}: order is {}",
                action, self.state.status
            )));
        }
        Ok(())
    }

    fn raise(&mut self, payload: OrderEvent) {
        let event = RecordedEvent::new(self.state.id, self.state.version + 1, payload);
        self.apply(&event);
        self.uncommitted.push(event);
    }

    fn line(&self, sku: &str) -> Option<&OrderLine> {
        self.state.lines.iter().find(|line| line.sku == sku)
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn customer_id(&self) -> Uuid {
        self.state.customer_id
    }

    pub fn status(&self) -> OrderStatus {
        self.state.status
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.state.lines
    }

    pub fn discount(&self) -> Money {
        self.state.discount
    }

    pub fn state(&self) -> &OrderState {
        &self.state
    }

    pub fn subtotal(&self) -> Money {
        let sum: Decimal = self.state.lines.iter().map(OrderLine::total).sum();
        Money::new(sum).unwrap_or_else(|e| {
            tracing::error!(order_id = %self.state.id, error = %e, "Order subtotal out of range");
            Money::zero()
        })
    }

    pub fn total(&self) -> Money {
        self.subtotal()
            .checked_sub(&self.state.discount)
            .unwrap_or_else(|_| Money::zero())
    }
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Snapshot = OrderSnapshot;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn empty(id: Uuid) -> Self {
        Self {
            state: OrderState {
                id,
                ..OrderState::default()
            },
            uncommitted: Vec::new(),
        }
    }

    fn id(&self) -> Uuid {
        self.state.id
    }

    fn version(&self) -> i64 {
        self.state.version
    }

    fn apply(&mut self, event: &RecordedEvent<OrderEvent>) {
        let state = &mut self.state;

        match &event.payload {
            OrderEvent::OrderOpened {
                customer_id,
                opened_at,
                ..
            } => {
                state.customer_id = *customer_id;
                state.status = OrderStatus::Open;
                state.opened_at = Some(*opened_at);
            }

            OrderEvent::ItemAdded {
                sku,
                description,
                quantity,
                unit_price,
            } => match state.lines.iter_mut().find(|line| &line.sku == sku) {
                Some(line) => {
                    line.quantity = line.quantity.saturating_add(*quantity);
                }
                None => state.lines.push(OrderLine {
                    sku: sku.clone(),
                    description: description.clone(),
                    quantity: *quantity,
                    unit_price: *unit_price,
                }),
            },

            OrderEvent::ItemRemoved { sku } => {
                state.lines.retain(|line| &line.sku != sku);
            }

            OrderEvent::DiscountApplied { percentage, amount } => {
                state.discount = *amount;
                state.discount_percentage = *percentage;
            }

            OrderEvent::OrderFinalized { finalized_at, .. } => {
                state.status = OrderStatus::Closed;
                state.closed_at = Some(*finalized_at);
            }

            OrderEvent::OrderCancelled {
                reason,
                cancelled_at,
            } => {
                state.status = OrderStatus::Cancelled;
                state.closed_at = Some(*cancelled_at);
                state.cancellation_reason = Some(reason.clone());
            }
        }

        state.version = event.version;
    }

    fn uncommitted_events(&self) -> &[RecordedEvent<OrderEvent>] {
        &self.uncommitted
    }

    fn clear_uncommitted_events(&mut self) {
        self.uncommitted.clear();
    }

    fn to_snapshot(&self) -> OrderSnapshot {
        OrderSnapshot::V1(self.state.clone())
    }

    fn from_snapshot(state: OrderSnapshot, version: i64) -> Result<Self, DomainError> {
        let OrderSnapshot::V1(state) = state;

        if state.version != version {
            return Err(DomainError::SnapshotDecode(format!(
                "snapshot state is at version {} but was stored as {}",
                state.version, version
            )));
        }

        Ok(Self {
            state,
            uncommitted: Vec::new(),
        })
    }
}
