//! PostgreSQL snapshot store backed by the `snapshots` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{Snapshot, SnapshotError, SnapshotStore};

#[derive(Debug, Clone)]
pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn save(&self, snapshot: Snapshot) -> Result<(), SnapshotError> {
        // Upsert, but never move an aggregate's snapshot backwards
        sqlx::query(
            r#"
            INSERT INTO snapshots (aggregate_id, aggregate_type, version, state, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (aggregate_id)
            DO UPDATE SET
                aggregate_type = EXCLUDED.aggregate_type,
                version = EXCLUDED.version,
                state = EXCLUDED.state,
                created_at = EXCLUDED.created_at
            WHERE snapshots.version <= EXCLUDED.version
            "#,
        )
        .bind(snapshot.aggregate_id)
        .bind(&snapshot.aggregate_type)
        .bind(snapshot.version)
        .bind(&snapshot.state)
        .bind(snapshot.created_at)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            "Snapshot saved for {} aggregate {} at version {}",
            snapshot.aggregate_type,
            snapshot.aggregate_id,
            snapshot.version
        );

        Ok(())
    }

    async fn get(&self, aggregate_id: Uuid) -> Result<Option<Snapshot>, SnapshotError> {
        let row: Option<(String, i64, serde_json::Value, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT aggregate_type, version, state, created_at
            FROM snapshots
            WHERE aggregate_id = $1
            "#,
        )
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(aggregate_type, version, state, created_at)| Snapshot {
            aggregate_id,
            aggregate_type,
            version,
            state,
            created_at,
        }))
    }

    async fn delete(&self, aggregate_id: Uuid) -> Result<(), SnapshotError> {
        sqlx::query("DELETE FROM snapshots WHERE aggregate_id = $1")
            .bind(aggregate_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
