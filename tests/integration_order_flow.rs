//! End-to-end tests over the in-memory backends: commands, event log,
//! snapshots and projections.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal_macros::dec;
use uuid::Uuid;

use order_events::aggregate::{Aggregate, DiscountKind, Order, OrderStatus};
use order_events::event_store::{EventStore, StoredEvent};
use order_events::handlers::OrderCommand;
use order_events::projection::{
    CancellationFlag, CheckpointStore, Document, Projection, ProjectionError, ReadModelStore,
};
use order_events::snapshot::SnapshotPolicy;
use order_events::{AppError, DomainError, OperationContext};

mod common;

use common::{money, Harness};

async fn checkout(harness: &Harness, context: &OperationContext) -> Uuid {
    let order_id = harness
        .handler
        .execute(OrderCommand::open(Uuid::new_v4()), context)
        .await
        .unwrap()
        .order_id;

    for command in [
        OrderCommand::add_item(order_id, "A", "Apple", 2, money("10.00")),
        OrderCommand::add_item(order_id, "B", "Banana", 1, money("5.00")),
        OrderCommand::ApplyDiscount {
            order_id,
            discount: DiscountKind::Percentage(dec!(10)),
        },
        OrderCommand::FinalizeOrder { order_id },
    ] {
        harness.handler.execute(command, context).await.unwrap();
    }

    order_id
}

/// Read model contents without timestamps
async fn snapshot_of(harness: &Harness, model: &str) -> Vec<(String, serde_json::Value, i64)> {
    harness
        .read_models
        .list(model)
        .await
        .unwrap()
        .into_iter()
        .map(|Document { key, data, last_position, .. }| (key, data, last_position))
        .collect()
}

#[tokio::test]
async fn test_checkout_end_to_end() {
    let harness = Harness::new(SnapshotPolicy::every(2));
    let context = OperationContext::new().with_actor("e2e");

    let order_id = checkout(&harness, &context).await;

    let order: Order = harness.handler.repository().load(order_id).await.unwrap();
    assert_eq!(order.version(), 5);
    assert_eq!(order.status(), OrderStatus::Closed);
    assert_eq!(order.total(), money("22.50"));

    let err = harness
        .handler
        .execute(
            OrderCommand::add_item(order_id, "C", "Cherry", 1, money("1.00")),
            &context,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Domain(DomainError::RuleViolation(_))));
    assert_eq!(harness.events.current_version(order_id).await.unwrap(), 5);

    let report = harness
        .engine()
        .process_until_caught_up(&CancellationFlag::new())
        .await
        .unwrap();
    assert_eq!(report.events_processed, 5);
    assert_eq!(report.last_position, 5);

    let summary = harness.summaries.get(order_id).await.unwrap().unwrap();
    assert_eq!(summary.status, OrderStatus::Closed);
    assert_eq!(summary.subtotal, money("25.00"));
    assert_eq!(summary.discount, money("2.50"));
    assert_eq!(summary.total, money("22.50"));
    assert_eq!(summary.item_count, 3);
    assert_eq!(summary.version, 5);

    let days = harness.daily_sales.list().await.unwrap();
    assert_eq!(days.len(), 1);
    assert_eq!(days[0].orders_opened, 1);
    assert_eq!(days[0].orders_finalized, 1);
    assert_eq!(days[0].net_revenue, dec!(22.50));
}

#[tokio::test]
async fn test_rebuild_matches_incremental() {
    let harness = Harness::new(SnapshotPolicy::Never);
    let context = OperationContext::new();
    let engine = harness.engine();

    for round in 0..3 {
        checkout(&harness, &context).await;

        let cancelled = harness
            .handler
            .execute(OrderCommand::open(Uuid::new_v4()), &context)
            .await
            .unwrap()
            .order_id;
        harness
            .handler
            .execute(
                OrderCommand::CancelOrder {
                    order_id: cancelled,
                    reason: format!("round {}", round),
                },
                &context,
            )
            .await
            .unwrap();

        // incremental runs interleaved with writes
        engine
            .process_pending_events(&CancellationFlag::new())
            .await
            .unwrap();
    }
    engine
        .process_until_caught_up(&CancellationFlag::new())
        .await
        .unwrap();

    let incremental_summaries = snapshot_of(&harness, "order_summary").await;
    let incremental_sales = snapshot_of(&harness, "daily_sales").await;
    assert_eq!(incremental_summaries.len(), 6);

    let report = engine
        .rebuild_projections(&CancellationFlag::new())
        .await
        .unwrap();
    assert_eq!(report.events_processed, harness.events.len() as u64);

    assert_eq!(snapshot_of(&harness, "order_summary").await, incremental_summaries);
    assert_eq!(snapshot_of(&harness, "daily_sales").await, incremental_sales);

    let days = harness.daily_sales.list().await.unwrap();
    assert_eq!(days[0].orders_opened, 6);
    assert_eq!(days[0].orders_finalized, 3);
    assert_eq!(days[0].orders_cancelled, 3);
    assert_eq!(days[0].net_revenue, dec!(67.50));
}

/// Fails the first time it sees `position`, simulating a crash mid-event
struct FlakyOnce {
    position: i64,
    failed: AtomicBool,
}

#[async_trait]
impl Projection for FlakyOnce {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn apply(&self, event: &StoredEvent) -> Result<(), ProjectionError> {
        if event.position == self.position && !self.failed.swap(true, Ordering::SeqCst) {
            return Err(ProjectionError::MissingDocument {
                model: "flaky".to_string(),
                key: event.position.to_string(),
            });
        }
        Ok(())
    }

    async fn reset(&self) -> Result<(), ProjectionError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_partial_fold_is_reconciled_on_rerun() {
    let harness = Harness::new(SnapshotPolicy::Never);
    let context = OperationContext::new();
    let order_id = checkout(&harness, &context).await;

    let engine = harness.engine_with(vec![Arc::new(FlakyOnce {
        position: 3,
        failed: AtomicBool::new(false),
    })]);

    let err = engine
        .process_until_caught_up(&CancellationFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProjectionError::Fold { position: 3, .. }));

    // order_summary already absorbed position 3, the checkpoint did not
    assert_eq!(
        harness.checkpoints.get("global").await.unwrap().last_processed_position,
        2
    );
    let partial = harness.summaries.get(order_id).await.unwrap().unwrap();
    assert_eq!(partial.version, 3);

    engine
        .process_until_caught_up(&CancellationFlag::new())
        .await
        .unwrap();

    let summary = harness.summaries.get(order_id).await.unwrap().unwrap();
    assert_eq!(summary.item_count, 3);
    assert_eq!(summary.total, money("22.50"));
    assert_eq!(
        harness.checkpoints.get("global").await.unwrap().last_processed_position,
        5
    );
}

/// Folds nothing and refuses to reset
struct UnresettableProjection;

#[async_trait]
impl Projection for UnresettableProjection {
    fn name(&self) -> &str {
        "unresettable"
    }

    async fn apply(&self, _event: &StoredEvent) -> Result<(), ProjectionError> {
        Ok(())
    }

    async fn reset(&self) -> Result<(), ProjectionError> {
        Err(ProjectionError::MissingDocument {
            model: "unresettable".to_string(),
            key: "*".to_string(),
        })
    }
}

#[tokio::test]
async fn test_interrupted_rebuild_recovers_on_next_run() {
    let harness = Harness::new(SnapshotPolicy::Never);
    let context = OperationContext::new();
    for _ in 0..3 {
        checkout(&harness, &context).await;
    }

    let engine = harness.engine_with(vec![Arc::new(UnresettableProjection)]);
    engine
        .process_until_caught_up(&CancellationFlag::new())
        .await
        .unwrap();
    let summaries = snapshot_of(&harness, "order_summary").await;
    let sales = snapshot_of(&harness, "daily_sales").await;

    // order projections are cleared, the last reset fails
    assert!(engine
        .rebuild_projections(&CancellationFlag::new())
        .await
        .is_err());
    assert_eq!(
        harness.checkpoints.get("global").await.unwrap().last_processed_position,
        0
    );

    engine
        .process_until_caught_up(&CancellationFlag::new())
        .await
        .unwrap();

    assert_eq!(snapshot_of(&harness, "order_summary").await, summaries);
    assert_eq!(snapshot_of(&harness, "daily_sales").await, sales);
    assert_eq!(harness.daily_sales.list().await.unwrap()[0].orders_opened, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_serialize_through_retries() {
    let harness = Arc::new(Harness::new(SnapshotPolicy::every(3)));
    let context = OperationContext::new();
    let order_id = harness
        .handler
        .execute(OrderCommand::open(Uuid::new_v4()), &context)
        .await
        .unwrap()
        .order_id;

    let writers: Vec<_> = (0..8)
        .map(|i| {
            let harness = harness.clone();
            tokio::spawn(async move {
                harness
                    .handler
                    .execute_with_retry(
                        OrderCommand::add_item(order_id, format!("SKU-{}", i), "Item", 1, money("1.00")),
                        &OperationContext::new(),
                        20,
                    )
                    .await
            })
        })
        .collect();

    for writer in writers {
        writer.await.unwrap().unwrap();
    }

    let stored = harness.events.get_events(order_id).await.unwrap();
    let versions: Vec<i64> = stored.iter().map(|e| e.version).collect();
    assert_eq!(versions, (1..=9).collect::<Vec<_>>());

    let order: Order = harness.handler.repository().load(order_id).await.unwrap();
    assert_eq!(order.lines().len(), 8);
    assert_eq!(order.subtotal(), money("8.00"));
}

#[tokio::test]
async fn test_time_travel_sees_open_order() {
    let harness = Harness::new(SnapshotPolicy::Never);
    let context = OperationContext::new();

    let order_id = harness
        .handler
        .execute(OrderCommand::open(Uuid::new_v4()), &context)
        .await
        .unwrap()
        .order_id;
    harness
        .handler
        .execute(
            OrderCommand::add_item(order_id, "A", "Apple", 1, money("3.00")),
            &context,
        )
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let cutoff = chrono::Utc::now();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    harness
        .handler
        .execute(
            OrderCommand::CancelOrder {
                order_id,
                reason: "duplicate".to_string(),
            },
            &context,
        )
        .await
        .unwrap();

    let then: Order = harness
        .handler
        .repository()
        .load_as_of(order_id, cutoff)
        .await
        .unwrap();
    assert_eq!(then.status(), OrderStatus::Open);
    assert_eq!(then.version(), 2);

    let now: Order = harness.handler.repository().load(order_id).await.unwrap();
    assert_eq!(now.status(), OrderStatus::Cancelled);
}
