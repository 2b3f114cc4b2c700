//! In-memory snapshot store for tests and local development.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use super::{Snapshot, SnapshotError, SnapshotStore};

#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<HashMap<Uuid, Snapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of aggregates with a snapshot
    pub fn len(&self) -> usize {
        self.snapshots.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every snapshot
    pub fn clear(&self) {
        if let Ok(mut snapshots) = self.snapshots.write() {
            snapshots.clear();
        }
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, snapshot: Snapshot) -> Result<(), SnapshotError> {
        let mut snapshots = self.snapshots.write().map_err(|_| SnapshotError::LockPoisoned)?;

        // A slower writer must not replace a newer snapshot
        if let Some(existing) = snapshots.get(&snapshot.aggregate_id) {
            if existing.version > snapshot.version {
                return Ok(());
            }
        }

        snapshots.insert(snapshot.aggregate_id, snapshot);
        Ok(())
    }

    async fn get(&self, aggregate_id: Uuid) -> Result<Option<Snapshot>, SnapshotError> {
        let snapshots = self.snapshots.read().map_err(|_| SnapshotError::LockPoisoned)?;
        Ok(snapshots.get(&aggregate_id).cloned())
    }

    async fn delete(&self, aggregate_id: Uuid) -> Result<(), SnapshotError> {
        let mut snapshots = self.snapshots.write().map_err(|_| SnapshotError::LockPoisoned)?;
        snapshots.remove(&aggregate_id);
        Ok(())
    }
}
