//! Order Handler
//!
//! Executes order commands: load, decide, append, maybe snapshot.

use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;

use crate::aggregate::{Aggregate, Order};
use crate::domain::{DomainError, OperationContext};
use crate::error::AppError;
use crate::event_store::EventStore;
use crate::snapshot::{SnapshotPolicy, SnapshotStore};

use super::{AggregateRepository, CommandResult, OrderCommand};

/// Handler for order commands
pub struct OrderCommandHandler {
    repository: AggregateRepository<Order>,
}

impl OrderCommandHandler {
    pub fn new(
        events: Arc<dyn EventStore>,
        snapshots: Arc<dyn SnapshotStore>,
        policy: SnapshotPolicy,
    ) -> Self {
        Self {
            repository: AggregateRepository::new(events, snapshots, policy),
        }
    }

    pub fn repository(&self) -> &AggregateRepository<Order> {
        &self.repository
    }

    /// Execute a command once; a concurrent writer surfaces as a conflict
    #[instrument(skip(self, context), fields(command = command.name(), order_id = %command.order_id()))]
    pub async fn execute(
        &self,
        command: OrderCommand,
        context: &OperationContext,
    ) -> Result<CommandResult, AppError> {
        let mut context = context.clone();
        context.ensure_correlation_id();

        let mut order = match &command {
            // An id that already has events fails the append with a conflict
            OrderCommand::OpenOrder {
                order_id,
                customer_id,
            } => Order::open(*order_id, *customer_id),
            _ => {
                let mut order = self.repository.load(command.order_id()).await?;
                decide(&mut order, &command)?;
                order
            }
        };

        let stored = self.repository.save(&mut order, &context).await?;

        tracing::debug!(version = order.version(), events = stored.len(), "Order command applied");

        Ok(CommandResult {
            order_id: order.id(),
            version: order.version(),
            event_ids: stored.iter().map(|e| e.event_id).collect(),
            status: order.status(),
            total: order.total(),
        })
    }

    /// Execute, reloading and retrying on conflict up to `max_attempts` times
    pub async fn execute_with_retry(
        &self,
        command: OrderCommand,
        context: &OperationContext,
        max_attempts: u32,
    ) -> Result<CommandResult, AppError> {
        // Reloading cannot help an open that lost the race
        let max_attempts = match command {
            OrderCommand::OpenOrder { .. } => 1,
            _ => max_attempts.max(1),
        };

        let mut attempt = 1;
        loop {
            match self.execute(command.clone(), context).await {
                Err(e) if e.is_conflict() && attempt < max_attempts => {
                    // Linear backoff before retry
                    let delay = Duration::from_millis(50 * u64::from(attempt));
                    tokio::time::sleep(delay).await;
                    tracing::warn!(
                        "Concurrency conflict, retrying (attempt {}/{})",
                        attempt,
                        max_attempts
                    );
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

/// Run the business operation a command asks for
fn decide(order: &mut Order, command: &OrderCommand) -> Result<(), DomainError> {
    match command {
        OrderCommand::OpenOrder { .. } => Err(DomainError::rule("order is already open")),
        OrderCommand::AddItem {
            sku,
            description,
            quantity,
            unit_price,
            ..
        } => order.add_item(sku.as_str(), description.as_str(), *quantity, *unit_price),
        OrderCommand::RemoveItem { sku, .. } => order.remove_item(sku),
        OrderCommand::ApplyDiscount { discount, .. } => order.apply_discount(*discount),
        OrderCommand::FinalizeOrder { .. } => order.finalize(),
        OrderCommand::CancelOrder { reason, .. } => order.cancel(reason.as_str()),
    }
}
