//! Database module
//!
//! Connectivity and schema utilities. The schema lives in
//! `migrations/0001_event_store.sql`.

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};

use crate::config::Config;

/// Schema applied by [`apply_schema`]
const SCHEMA_SQL: &str = include_str!("../migrations/0001_event_store.sql");

const REQUIRED_TABLES: [&str; 4] = ["events", "snapshots", "projection_checkpoints", "read_models"];

/// Database setup errors
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database schema is not complete. Please run migrations.")]
    SchemaIncomplete,
}

/// Create the connection pool
pub async fn connect(config: &Config) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(config.database_acquire_timeout)
        .connect(&config.database_url)
        .await
}

/// Make sure the schema exists before anything runs.
///
/// Outside production a missing schema is created; in production it is an
/// error and migrations must be run explicitly.
pub async fn prepare_schema(pool: &PgPool, config: &Config) -> Result<(), DbError> {
    verify_connection(pool).await?;

    if check_schema(pool).await? {
        return Ok(());
    }

    if config.is_production() {
        return Err(DbError::SchemaIncomplete);
    }

    tracing::warn!(environment = %config.environment, "Schema incomplete, applying it");
    apply_schema(pool).await?;

    if check_schema(pool).await? {
        Ok(())
    } else {
        Err(DbError::SchemaIncomplete)
    }
}

/// Verify database connectivity
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    for table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema() AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!("Required table '{}' does not exist", table);
            return Ok(false);
        }
    }

    Ok(true)
}

/// Create the schema if it is missing; safe to run repeatedly
pub async fn apply_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Multi-statement script: must go through the simple query protocol
    pool.execute(SCHEMA_SQL).await?;
    tracing::info!("Database schema applied");
    Ok(())
}
