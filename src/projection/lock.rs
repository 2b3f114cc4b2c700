//! Overlap guard for projection runs
//!
//! At most one run per checkpoint may be active. `Local` guards a single
//! process; `Postgres` holds a transaction-scoped advisory lock so several
//! processes can share one database.

use std::sync::Arc;

use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::ProjectionError;

/// Advisory lock class for projection runs; the object id is `hashtext(name)`
const PROJECTION_LOCK_CLASS: i32 = 0x7072_6a00;

#[derive(Debug, Clone)]
pub enum RunLock {
    Local(Arc<Mutex<()>>),
    Postgres { pool: PgPool, name: String },
}

/// Proof that the holder owns the run; dropping it releases the lock
#[derive(Debug)]
pub enum RunLease {
    Local(OwnedMutexGuard<()>),
    Postgres(Transaction<'static, Postgres>),
}

impl RunLock {
    /// In-process lock
    pub fn local() -> Self {
        Self::Local(Arc::new(Mutex::new(())))
    }

    /// Cross-process lock keyed by checkpoint name
    pub fn postgres(pool: PgPool, name: impl Into<String>) -> Self {
        Self::Postgres {
            pool,
            name: name.into(),
        }
    }

    /// Try to take the lock without waiting; `None` if another run holds it
    pub async fn try_acquire(&self) -> Result<Option<RunLease>, ProjectionError> {
        match self {
            RunLock::Local(mutex) => Ok(mutex.clone().try_lock_owned().ok().map(RunLease::Local)),
            RunLock::Postgres { pool, name } => {
                let mut tx = pool.begin().await.map_err(ProjectionError::Lock)?;

                let acquired: bool =
                    sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1, hashtext($2))")
                        .bind(PROJECTION_LOCK_CLASS)
                        .bind(name.as_str())
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(ProjectionError::Lock)?;

                if acquired {
                    Ok(Some(RunLease::Postgres(tx)))
                } else {
                    tx.rollback().await.map_err(ProjectionError::Lock)?;
                    Ok(None)
                }
            }
        }
    }
}

impl RunLease {
    /// Release the lock explicitly
    pub async fn release(self) {
        match self {
            RunLease::Local(guard) => drop(guard),
            RunLease::Postgres(tx) => {
                if let Err(e) = tx.rollback().await {
                    tracing::warn!(error = %e, "Failed to release projection run lock");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_lock_is_exclusive() {
        let lock = RunLock::local();

        let lease = lock.try_acquire().await.unwrap();
        assert!(lease.is_some());
        assert!(lock.clone().try_acquire().await.unwrap().is_none());

        if let Some(lease) = lease {
            lease.release().await;
        }
        assert!(lock.try_acquire().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_separate_local_locks_do_not_interfere() {
        let a = RunLock::local();
        let b = RunLock::local();

        let _lease = a.try_acquire().await.unwrap();
        assert!(b.try_acquire().await.unwrap().is_some());
    }
}
