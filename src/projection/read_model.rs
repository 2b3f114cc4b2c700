//! Read model storage
//!
//! Projections write JSON documents keyed by `(model, key)`. Every document
//! remembers the last global position folded into it.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sqlx::PgPool;

/// Errors that can occur in a read model store
#[derive(Debug, thiserror::Error)]
pub enum ReadModelError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Read model document is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Read model store lock poisoned")]
    LockPoisoned,
}

/// One read model document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub key: String,
    pub data: serde_json::Value,
    pub last_position: i64,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Decode `data` into the projection's row type
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ReadModelError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// Keyed document storage for read models
#[async_trait]
pub trait ReadModelStore: Send + Sync {
    async fn get(&self, model: &str, key: &str) -> Result<Option<Document>, ReadModelError>;

    /// Insert a document, or replace it if `position` is newer than the one
    /// it reflects; older or equal positions are ignored
    async fn upsert(
        &self,
        model: &str,
        key: &str,
        data: serde_json::Value,
        position: i64,
    ) -> Result<(), ReadModelError>;

    /// Every document of a model, key ascending
    async fn list(&self, model: &str) -> Result<Vec<Document>, ReadModelError>;

    /// Drop every document of a model, returning how many were removed
    async fn clear(&self, model: &str) -> Result<u64, ReadModelError>;
}

// =========================================================================
// In-memory
// =========================================================================

#[derive(Debug, Default)]
pub struct InMemoryReadModelStore {
    models: RwLock<BTreeMap<String, BTreeMap<String, Document>>>,
}

impl InMemoryReadModelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReadModelStore for InMemoryReadModelStore {
    async fn get(&self, model: &str, key: &str) -> Result<Option<Document>, ReadModelError> {
        let models = self.models.read().map_err(|_| ReadModelError::LockPoisoned)?;
        Ok(models.get(model).and_then(|docs| docs.get(key)).cloned())
    }

    async fn upsert(
        &self,
        model: &str,
        key: &str,
        data: serde_json::Value,
        position: i64,
    ) -> Result<(), ReadModelError> {
        let mut models = self.models.write().map_err(|_| ReadModelError::LockPoisoned)?;
        let docs = models.entry(model.to_string()).or_default();

        if docs.get(key).is_some_and(|doc| doc.last_position >= position) {
            return Ok(());
        }

        docs.insert(
            key.to_string(),
            Document {
                key: key.to_string(),
                data,
                last_position: position,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn list(&self, model: &str) -> Result<Vec<Document>, ReadModelError> {
        let models = self.models.read().map_err(|_| ReadModelError::LockPoisoned)?;
        Ok(models
            .get(model)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn clear(&self, model: &str) -> Result<u64, ReadModelError> {
        let mut models = self.models.write().map_err(|_| ReadModelError::LockPoisoned)?;
        Ok(models.remove(model).map(|docs| docs.len() as u64).unwrap_or(0))
    }
}

// =========================================================================
// PostgreSQL
// =========================================================================

type DocumentRow = (String, serde_json::Value, i64, DateTime<Utc>);

fn into_document((key, data, last_position, updated_at): DocumentRow) -> Document {
    Document {
        key,
        data,
        last_position,
        updated_at,
    }
}

#[derive(Debug, Clone)]
pub struct PgReadModelStore {
    pool: PgPool,
}

impl PgReadModelStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReadModelStore for PgReadModelStore {
    async fn get(&self, model: &str, key: &str) -> Result<Option<Document>, ReadModelError> {
        let row: Option<DocumentRow> = sqlx::query_as(
            r#"
            SELECT key, data, last_position, updated_at
            FROM read_models
            WHERE model = $1 AND key = $2
            "#,
        )
        .bind(model)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(into_document))
    }

    async fn upsert(
        &self,
        model: &str,
        key: &str,
        data: serde_json::Value,
        position: i64,
    ) -> Result<(), ReadModelError> {
        sqlx::query(
            r#"
            INSERT INTO read_models (model, key, data, last_position, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (model, key)
            DO UPDATE SET
                data = EXCLUDED.data,
                last_position = EXCLUDED.last_position,
                updated_at = NOW()
            WHERE read_models.last_position < EXCLUDED.last_position
            "#,
        )
        .bind(model)
        .bind(key)
        .bind(data)
        .bind(position)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self, model: &str) -> Result<Vec<Document>, ReadModelError> {
        let rows: Vec<DocumentRow> = sqlx::query_as(
            r#"
            SELECT key, data, last_position, updated_at
            FROM read_models
            WHERE model = $1
            ORDER BY key ASC
            "#,
        )
        .bind(model)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(into_document).collect())
    }

    async fn clear(&self, model: &str) -> Result<u64, ReadModelError> {
        let rows_deleted = sqlx::query("DELETE FROM read_models WHERE model = $1")
            .bind(model)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows_deleted > 0 {
            tracing::info!(model, rows_deleted, "Cleared read model");
        }

        Ok(rows_deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_upsert_get_list_clear() {
        let store = InMemoryReadModelStore::new();

        store.upsert("m", "b", json!({ "n": 2 }), 2).await.unwrap();
        store.upsert("m", "a", json!({ "n": 1 }), 1).await.unwrap();
        store.upsert("other", "a", json!({}), 3).await.unwrap();
        store.upsert("m", "a", json!({ "n": 10 }), 4).await.unwrap();

        let doc = store.get("m", "a").await.unwrap().unwrap();
        assert_eq!(doc.data["n"], 10);
        assert_eq!(doc.last_position, 4);

        let keys: Vec<String> = store
            .list("m")
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.key)
            .collect();
        assert_eq!(keys, vec!["a", "b"]);

        assert_eq!(store.clear("m").await.unwrap(), 2);
        assert!(store.get("m", "a").await.unwrap().is_none());
        assert!(store.get("other", "a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_upsert_ignores_stale_position() {
        let store = InMemoryReadModelStore::new();

        store.upsert("m", "a", json!({ "n": 2 }), 20).await.unwrap();
        store.upsert("m", "a", json!({ "n": 1 }), 10).await.unwrap();
        store.upsert("m", "a", json!({ "n": 3 }), 20).await.unwrap();

        let doc = store.get("m", "a").await.unwrap().unwrap();
        assert_eq!(doc.data["n"], 2);
        assert_eq!(doc.last_position, 20);
    }

    #[test]
    fn test_document_parse() {
        #[derive(Deserialize)]
        struct Row {
            n: u32,
        }

        let doc = Document {
            key: "k".to_string(),
            data: json!({ "n": 3 }),
            last_position: 1,
            updated_at: Utc::now(),
        };
        assert_eq!(doc.parse::<Row>().unwrap().n, 3);
        assert!(doc.parse::<Vec<u32>>().is_err());
    }
}
