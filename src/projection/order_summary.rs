//! Order summary read model: one document per order.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{Aggregate, Order, OrderLine, OrderStatus};
use crate::domain::{Money, OrderEvent, RecordedEvent};
use crate::event_store::StoredEvent;

use super::{Projection, ProjectionError, ReadModelStore};

pub const ORDER_SUMMARY_MODEL: &str = "order_summary";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub status: OrderStatus,
    pub lines: Vec<OrderLine>,
    pub line_count: usize,
    pub item_count: u64,
    pub subtotal: Money,
    pub discount: Money,
    pub total: Money,
    pub version: i64,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

impl OrderSummary {
    fn opened(order_id: Uuid, customer_id: Uuid, opened_at: DateTime<Utc>) -> Self {
        Self {
            order_id,
            customer_id,
            status: OrderStatus::Open,
            lines: Vec::new(),
            line_count: 0,
            item_count: 0,
            subtotal: Money::zero(),
            discount: Money::zero(),
            total: Money::zero(),
            version: 0,
            opened_at: Some(opened_at),
            closed_at: None,
            cancellation_reason: None,
        }
    }

    /// Recompute the derived totals from the lines and discount
    fn recompute(&mut self) -> Result<(), ProjectionError> {
        let mut subtotal = Money::zero();
        for line in &self.lines {
            subtotal = subtotal.checked_add(&line.unit_price.times(line.quantity)?)?;
        }

        self.line_count = self.lines.len();
        self.item_count = self.lines.iter().map(|l| u64::from(l.quantity)).sum();
        self.subtotal = subtotal;
        self.total = subtotal.checked_sub(&self.discount).unwrap_or_else(|_| Money::zero());
        Ok(())
    }
}

/// Fold one order event into its summary
fn fold(
    current: Option<OrderSummary>,
    event: &RecordedEvent<OrderEvent>,
) -> Result<OrderSummary, ProjectionError> {
    let mut summary = match (&event.payload, current) {
        (
            OrderEvent::OrderOpened {
                order_id,
                customer_id,
                opened_at,
            },
            _,
        ) => OrderSummary::opened(*order_id, *customer_id, *opened_at),
        (_, Some(summary)) => summary,
        (_, None) => {
            return Err(ProjectionError::MissingDocument {
                model: ORDER_SUMMARY_MODEL.to_string(),
                key: event.aggregate_id.to_string(),
            })
        }
    };

    match &event.payload {
        OrderEvent::OrderOpened { .. } => {}
        OrderEvent::ItemAdded {
            sku,
            description,
            quantity,
            unit_price,
        } => {
            match summary.lines.iter_mut().find(|line| &line.sku == sku) {
                Some(line) => line.quantity = line.quantity.saturating_add(*quantity),
                None => summary.lines.push(OrderLine {
                    sku: sku.clone(),
                    description: description.clone(),
                    quantity: *quantity,
                    unit_price: *unit_price,
                }),
            }
            summary.recompute()?;
        }
        OrderEvent::ItemRemoved { sku } => {
            summary.lines.retain(|line| &line.sku != sku);
            summary.recompute()?;
        }
        OrderEvent::DiscountApplied { amount, .. } => {
            summary.discount = *amount;
            summary.recompute()?;
        }
        OrderEvent::OrderFinalized {
            subtotal,
            discount,
            total,
            finalized_at,
        } => {
            summary.status = OrderStatus::Closed;
            summary.subtotal = *subtotal;
            summary.discount = *discount;
            summary.total = *total;
            summary.closed_at = Some(*finalized_at);
        }
        OrderEvent::OrderCancelled {
            reason,
            cancelled_at,
        } => {
            summary.status = OrderStatus::Cancelled;
            summary.cancellation_reason = Some(reason.clone());
            summary.closed_at = Some(*cancelled_at);
        }
    }

    summary.version = event.version;
    Ok(summary)
}

/// Maintains `order_summary`
pub struct OrderSummaryProjection {
    store: Arc<dyn ReadModelStore>,
}

impl OrderSummaryProjection {
    pub fn new(store: Arc<dyn ReadModelStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, order_id: Uuid) -> Result<Option<OrderSummary>, ProjectionError> {
        match self.store.get(ORDER_SUMMARY_MODEL, &order_id.to_string()).await? {
            Some(doc) => Ok(Some(doc.parse()?)),
            None => Ok(None),
        }
    }

    pub async fn list(&self) -> Result<Vec<OrderSummary>, ProjectionError> {
        let docs = self.store.list(ORDER_SUMMARY_MODEL).await?;
        let mut summaries = Vec::with_capacity(docs.len());
        for doc in docs {
            summaries.push(doc.parse()?);
        }
        Ok(summaries)
    }
}

#[async_trait]
impl Projection for OrderSummaryProjection {
    fn name(&self) -> &str {
        ORDER_SUMMARY_MODEL
    }

    async fn apply(&self, event: &StoredEvent) -> Result<(), ProjectionError> {
        if event.aggregate_type != Order::aggregate_type() {
            return Ok(());
        }

        let key = event.aggregate_id.to_string();
        let existing = self.store.get(ORDER_SUMMARY_MODEL, &key).await?;

        if let Some(doc) = &existing {
            if doc.last_position >= event.position {
                tracing::debug!(position = event.position, key = %key, "Order summary already has event");
                return Ok(());
            }
        }

        let recorded = event.decode::<OrderEvent>()?;
        let current = match existing {
            Some(doc) => Some(doc.parse::<OrderSummary>()?),
            None => None,
        };

        let summary = fold(current, &recorded)?;
        self.store
            .upsert(
                ORDER_SUMMARY_MODEL,
                &key,
                serde_json::to_value(&summary)?,
                event.position,
            )
            .await?;

        Ok(())
    }

    async fn reset(&self) -> Result<(), ProjectionError> {
        self.store.clear(ORDER_SUMMARY_MODEL).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::DiscountKind;
    use crate::event_store::InMemoryEventStore;
    use crate::projection::testing::commit;
    use crate::projection::InMemoryReadModelStore;
    use rust_decimal_macros::dec;

    fn money(value: rust_decimal::Decimal) -> Money {
        Money::new(value).unwrap()
    }

    fn projection() -> OrderSummaryProjection {
        OrderSummaryProjection::new(Arc::new(InMemoryReadModelStore::new()))
    }

    #[tokio::test]
    async fn test_checkout_summary() {
        let events = InMemoryEventStore::new();
        let projection = projection();

        let mut order = Order::open(Uuid::new_v4(), Uuid::new_v4());
        order.add_item("A", "Apple", 2, money(dec!(10.00))).unwrap();
        order.add_item("B", "Banana", 1, money(dec!(5.00))).unwrap();
        order.add_item("A", "Apple", 1, money(dec!(10.00))).unwrap();
        order.remove_item("B").unwrap();
        order
            .apply_discount(DiscountKind::Percentage(dec!(10)))
            .unwrap();
        order.finalize().unwrap();

        for event in commit(&events, &mut order).await {
            projection.apply(&event).await.unwrap();
        }

        let summary = projection.get(order.id()).await.unwrap().unwrap();
        assert_eq!(summary.status, OrderStatus::Closed);
        assert_eq!(summary.line_count, 1);
        assert_eq!(summary.item_count, 3);
        assert_eq!(summary.subtotal.value(), dec!(30.00));
        assert_eq!(summary.discount.value(), dec!(3.00));
        assert_eq!(summary.total.value(), dec!(27.00));
        assert_eq!(summary.version, 7);
        assert!(summary.closed_at.is_some());
    }

    #[tokio::test]
    async fn test_redelivered_event_is_skipped() {
        let events = InMemoryEventStore::new();
        let projection = projection();

        let mut order = Order::open(Uuid::new_v4(), Uuid::new_v4());
        order.add_item("A", "Apple", 2, money(dec!(1.25))).unwrap();
        let stored = commit(&events, &mut order).await;

        for event in &stored {
            projection.apply(event).await.unwrap();
        }
        // crash between fold and checkpoint: the same events arrive again
        for event in &stored {
            projection.apply(event).await.unwrap();
        }

        let summary = projection.get(order.id()).await.unwrap().unwrap();
        assert_eq!(summary.item_count, 2);
        assert_eq!(summary.subtotal.value(), dec!(2.50));
    }

    #[tokio::test]
    async fn test_cancelled_order_and_foreign_aggregates() {
        let events = InMemoryEventStore::new();
        let projection = projection();

        let mut order = Order::open(Uuid::new_v4(), Uuid::new_v4());
        order.cancel("customer changed their mind").unwrap();
        for event in commit(&events, &mut order).await {
            projection.apply(&event).await.unwrap();
        }

        let mut foreign = commit(&events, &mut Order::open(Uuid::new_v4(), Uuid::new_v4()))
            .await
            .remove(0);
        foreign.aggregate_type = "Invoice".to_string();
        projection.apply(&foreign).await.unwrap();

        let summaries = projection.list().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].status, OrderStatus::Cancelled);
        assert_eq!(
            summaries[0].cancellation_reason.as_deref(),
            Some("customer changed their mind")
        );

        projection.reset().await.unwrap();
        assert!(projection.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_event_type_fails() {
        let events = InMemoryEventStore::new();
        let projection = projection();

        let mut event = commit(&events, &mut Order::open(Uuid::new_v4(), Uuid::new_v4()))
            .await
            .remove(0);
        event.event_type = "OrderShipped".to_string();

        let err = projection.apply(&event).await.unwrap_err();
        assert!(matches!(err, ProjectionError::Decode(_)));
    }

    #[tokio::test]
    async fn test_event_without_opened_document_fails() {
        let events = InMemoryEventStore::new();
        let projection = projection();

        let mut order = Order::open(Uuid::new_v4(), Uuid::new_v4());
        order.add_item("A", "Apple", 1, money(dec!(1.00))).unwrap();
        let stored = commit(&events, &mut order).await;

        let err = projection.apply(&stored[1]).await.unwrap_err();
        assert!(matches!(err, ProjectionError::MissingDocument { .. }));
    }
}
