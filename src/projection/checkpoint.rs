//! Projection checkpoints
//!
//! A checkpoint is a forward-only cursor into the global event stream. It is
//! advanced only after an event has been folded into every projection.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// Checkpoint used when none is configured
pub const DEFAULT_CHECKPOINT: &str = "global";

/// Errors that can occur in a checkpoint store
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A checkpoint may never move backwards
    #[error("Checkpoint '{name}' cannot move from position {current} back to {requested}")]
    Regression {
        name: String,
        current: i64,
        requested: i64,
    },

    #[error("Checkpoint store lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub projection_name: String,
    pub last_processed_position: i64,
    pub last_updated: DateTime<Utc>,
}

impl Checkpoint {
    fn start(name: &str) -> Self {
        Self {
            projection_name: name.to_string(),
            last_processed_position: 0,
            last_updated: Utc::now(),
        }
    }
}

/// Durable storage for checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Current checkpoint, created at position 0 on first use
    async fn get(&self, name: &str) -> Result<Checkpoint, CheckpointError>;

    /// Move the checkpoint to `position`; moving backwards is an error
    async fn advance(&self, name: &str, position: i64) -> Result<(), CheckpointError>;

    /// Put the checkpoint back to position 0 (rebuild only)
    async fn reset(&self, name: &str) -> Result<(), CheckpointError>;
}

// =========================================================================
// In-memory
// =========================================================================

#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get(&self, name: &str) -> Result<Checkpoint, CheckpointError> {
        let mut checkpoints = self
            .checkpoints
            .write()
            .map_err(|_| CheckpointError::LockPoisoned)?;

        Ok(checkpoints
            .entry(name.to_string())
            .or_insert_with(|| Checkpoint::start(name))
            .clone())
    }

    async fn advance(&self, name: &str, position: i64) -> Result<(), CheckpointError> {
        let mut checkpoints = self
            .checkpoints
            .write()
            .map_err(|_| CheckpointError::LockPoisoned)?;

        let checkpoint = checkpoints
            .entry(name.to_string())
            .or_insert_with(|| Checkpoint::start(name));

        if position < checkpoint.last_processed_position {
            return Err(CheckpointError::Regression {
                name: name.to_string(),
                current: checkpoint.last_processed_position,
                requested: position,
            });
        }

        checkpoint.last_processed_position = position;
        checkpoint.last_updated = Utc::now();
        Ok(())
    }

    async fn reset(&self, name: &str) -> Result<(), CheckpointError> {
        let mut checkpoints = self
            .checkpoints
            .write()
            .map_err(|_| CheckpointError::LockPoisoned)?;
        checkpoints.insert(name.to_string(), Checkpoint::start(name));
        Ok(())
    }
}

// =========================================================================
// PostgreSQL
// =========================================================================

#[derive(Debug, Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn get(&self, name: &str) -> Result<Checkpoint, CheckpointError> {
        sqlx::query(
            r#"
            INSERT INTO projection_checkpoints (projection_name, last_processed_position)
            VALUES ($1, 0)
            ON CONFLICT (projection_name) DO NOTHING
            "#,
        )
        .bind(name)
        .execute(&self.pool)
        .await?;

        let (last_processed_position, last_updated): (i64, DateTime<Utc>) = sqlx::query_as(
            r#"
            SELECT last_processed_position, last_updated
            FROM projection_checkpoints
            WHERE projection_name = $1
            "#,
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(Checkpoint {
            projection_name: name.to_string(),
            last_processed_position,
            last_updated,
        })
    }

    async fn advance(&self, name: &str, position: i64) -> Result<(), CheckpointError> {
        let rows_affected = sqlx::query(
            r#"
            INSERT INTO projection_checkpoints (projection_name, last_processed_position, last_updated)
            VALUES ($1, $2, NOW())
            ON CONFLICT (projection_name)
            DO UPDATE SET
                last_processed_position = EXCLUDED.last_processed_position,
                last_updated = NOW()
            WHERE projection_checkpoints.last_processed_position <= EXCLUDED.last_processed_position
            "#,
        )
        .bind(name)
        .bind(position)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            let current = self.get(name).await?.last_processed_position;
            return Err(CheckpointError::Regression {
                name: name.to_string(),
                current,
                requested: position,
            });
        }

        Ok(())
    }

    async fn reset(&self, name: &str) -> Result<(), CheckpointError> {
        sqlx::query(
            r#"
            INSERT INTO projection_checkpoints (projection_name, last_processed_position, last_updated)
            VALUES ($1, 0, NOW())
            ON CONFLICT (projection_name)
            DO UPDATE SET last_processed_position = 0, last_updated = NOW()
            "#,
        )
        .bind(name)
        .execute(&self.pool)
        .await?;

        tracing::warn!(checkpoint = name, "Checkpoint reset to position 0");
        Ok(())
    }
}
