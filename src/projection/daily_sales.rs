//! Daily sales read model, keyed by the UTC day an event occurred.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, Order};
use crate::domain::{Money, OrderEvent};
use crate::event_store::StoredEvent;

use super::{Projection, ProjectionError, ReadModelStore};

pub const DAILY_SALES_MODEL: &str = "daily_sales";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySales {
    pub day: NaiveDate,
    pub orders_opened: u64,
    pub orders_finalized: u64,
    pub orders_cancelled: u64,
    /// Sum of finalized subtotals. Day totals are plain decimals: each order
    /// is capped as `Money`, their sum is not.
    pub gross_revenue: Decimal,
    pub discounts: Decimal,
    /// Sum of finalized totals
    pub net_revenue: Decimal,
}

impl DailySales {
    fn empty(day: NaiveDate) -> Self {
        Self {
            day,
            orders_opened: 0,
            orders_finalized: 0,
            orders_cancelled: 0,
            gross_revenue: Decimal::ZERO,
            discounts: Decimal::ZERO,
            net_revenue: Decimal::ZERO,
        }
    }
}

fn accumulate(sum: &mut Decimal, amount: &Money, key: &str) -> Result<(), ProjectionError> {
    *sum = sum
        .checked_add(amount.value())
        .ok_or_else(|| ProjectionError::SumOverflow {
            model: DAILY_SALES_MODEL.to_string(),
            key: key.to_string(),
        })?;
    Ok(())
}

/// Maintains `daily_sales`
pub struct DailySalesProjection {
    store: Arc<dyn ReadModelStore>,
}

impl DailySalesProjection {
    pub fn new(store: Arc<dyn ReadModelStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, day: NaiveDate) -> Result<Option<DailySales>, ProjectionError> {
        match self.store.get(DAILY_SALES_MODEL, &day.to_string()).await? {
            Some(doc) => Ok(Some(doc.parse()?)),
            None => Ok(None),
        }
    }

    /// Every day with activity, oldest first
    pub async fn list(&self) -> Result<Vec<DailySales>, ProjectionError> {
        let docs = self.store.list(DAILY_SALES_MODEL).await?;
        let mut days = Vec::with_capacity(docs.len());
        for doc in docs {
            days.push(doc.parse()?);
        }
        Ok(days)
    }
}

#[async_trait]
impl Projection for DailySalesProjection {
    fn name(&self) -> &str {
        DAILY_SALES_MODEL
    }

    async fn apply(&self, event: &StoredEvent) -> Result<(), ProjectionError> {
        if event.aggregate_type != Order::aggregate_type() {
            return Ok(());
        }

        let recorded = event.decode::<OrderEvent>()?;
        let counts = matches!(
            recorded.payload,
            OrderEvent::OrderOpened { .. }
                | OrderEvent::OrderFinalized { .. }
                | OrderEvent::OrderCancelled { .. }
        );
        if !counts {
            return Ok(());
        }

        let day = event.occurred_at.date_naive();
        let key = day.to_string();

        let mut sales = match self.store.get(DAILY_SALES_MODEL, &key).await? {
            Some(doc) if doc.last_position >= event.position => return Ok(()),
            Some(doc) => doc.parse::<DailySales>()?,
            None => DailySales::empty(day),
        };

        match &recorded.payload {
            OrderEvent::OrderOpened { .. } => sales.orders_opened += 1,
            OrderEvent::OrderFinalized {
                subtotal,
                discount,
                total,
                ..
            } => {
                sales.orders_finalized += 1;
                accumulate(&mut sales.gross_revenue, subtotal, &key)?;
                accumulate(&mut sales.discounts, discount, &key)?;
                accumulate(&mut sales.net_revenue, total, &key)?;
            }
            OrderEvent::OrderCancelled { .. } => sales.orders_cancelled += 1,
            _ => {}
        }

        self.store
            .upsert(
                DAILY_SALES_MODEL,
                &key,
                serde_json::to_value(&sales)?,
                event.position,
            )
            .await?;

        Ok(())
    }

    async fn reset(&self) -> Result<(), ProjectionError> {
        self.store.clear(DAILY_SALES_MODEL).await?;
        Ok(())
    }
}
