//! Common test utilities
#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::OnceCell;

use order_events::event_store::InMemoryEventStore;
use order_events::handlers::OrderCommandHandler;
use order_events::projection::{
    DailySalesProjection, InMemoryCheckpointStore, InMemoryReadModelStore,
    OrderSummaryProjection, Projection, ProjectionEngine,
};
use order_events::snapshot::{InMemorySnapshotStore, SnapshotPolicy};
use order_events::Money;

/// Everything wired together over the in-memory backends
pub struct Harness {
    pub events: Arc<InMemoryEventStore>,
    pub snapshots: Arc<InMemorySnapshotStore>,
    pub checkpoints: Arc<InMemoryCheckpointStore>,
    pub read_models: Arc<InMemoryReadModelStore>,
    pub summaries: Arc<OrderSummaryProjection>,
    pub daily_sales: Arc<DailySalesProjection>,
    pub handler: OrderCommandHandler,
}

impl Harness {
    pub fn new(policy: SnapshotPolicy) -> Self {
        let events = Arc::new(InMemoryEventStore::new());
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let read_models = Arc::new(InMemoryReadModelStore::new());

        Self {
            handler: OrderCommandHandler::new(events.clone(), snapshots.clone(), policy),
            summaries: Arc::new(OrderSummaryProjection::new(read_models.clone())),
            daily_sales: Arc::new(DailySalesProjection::new(read_models.clone())),
            checkpoints: Arc::new(InMemoryCheckpointStore::new()),
            events,
            snapshots,
            read_models,
        }
    }

    /// Engine with both order projections registered
    pub fn engine(&self) -> ProjectionEngine {
        self.engine_with(Vec::new())
    }

    /// Engine with the order projections followed by `extra`
    pub fn engine_with(&self, extra: Vec<Arc<dyn Projection>>) -> ProjectionEngine {
        let mut engine = ProjectionEngine::new(self.events.clone(), self.checkpoints.clone())
            .with_batch_size(4)
            .register(self.summaries.clone())
            .register(self.daily_sales.clone());
        for projection in extra {
            engine = engine.register(projection);
        }
        engine
    }
}

pub fn money(value: &str) -> Money {
    Money::from_str(value).unwrap()
}

/// Schema is applied once per test binary
static SCHEMA: OnceCell<()> = OnceCell::const_new();

/// Connect to the test database and make sure the schema exists.
///
/// Tests share the database, so they use fresh ids instead of truncating.
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    SCHEMA
        .get_or_init(|| async {
            order_events::db::apply_schema(&pool)
                .await
                .expect("Failed to apply schema");
        })
        .await;

    pool
}
