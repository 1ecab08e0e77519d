// SQLite LockStore Implementation
//
// One `worker_locks` row per queue. Acquire runs its read-modify-write
// inside a transaction, so concurrent worker instances sharing the
// database cannot lose updates; a denied acquire leaves the row untouched.

use async_trait::async_trait;
use siphon_core::application::worker::constants::DEFAULT_LOCK_TTL_MS;
use siphon_core::domain::WorkerLock;
use siphon_core::error::{AppError, Result};
use siphon_core::port::{LockGuard, LockStore, TimeProvider};
use sqlx::SqlitePool;
use std::sync::Arc;

// Helper to convert sqlx::Error to AppError with the database message
fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            AppError::Database(format!("Database error: {}", db_err.message()))
        }
        _ => AppError::Database(err.to_string()),
    }
}

pub struct SqliteLockStore {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
    ttl_millis: i64,
}

impl SqliteLockStore {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
            ttl_millis: DEFAULT_LOCK_TTL_MS,
        }
    }

    /// Override the lock expiry window
    pub fn with_ttl(mut self, ttl_millis: i64) -> Self {
        self.ttl_millis = ttl_millis;
        self
    }

    /// Current counter value, for assertions and diagnostics
    pub async fn active_workers(&self, queue: &str) -> Result<i64> {
        let count: Option<i64> =
            sqlx::query_scalar("SELECT active_workers FROM worker_locks WHERE queue = ?")
                .bind(queue)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        Ok(count.unwrap_or(0))
    }
}

#[async_trait]
impl LockStore for SqliteLockStore {
    async fn try_acquire(&self, queue: &str, max_workers: u32) -> Result<Option<LockGuard>> {
        let now = self.time_provider.now_millis();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let row: Option<(i64, Option<i64>)> =
            sqlx::query_as("SELECT active_workers, expires_at FROM worker_locks WHERE queue = ?")
                .bind(queue)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;

        let mut lock = match row {
            Some((active_workers, expires_at)) => WorkerLock {
                queue: queue.to_string(),
                active_workers,
                expires_at,
            },
            None => {
                // First acquire attempt for this queue creates the record
                sqlx::query(
                    "INSERT INTO worker_locks (queue, active_workers, expires_at) VALUES (?, 0, NULL)",
                )
                .bind(queue)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
                WorkerLock::new(queue)
            }
        };

        if !lock.occupy(max_workers, now, self.ttl_millis) {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(None);
        }

        sqlx::query("UPDATE worker_locks SET active_workers = ?, expires_at = ? WHERE queue = ?")
            .bind(lock.active_workers)
            .bind(lock.expires_at)
            .bind(queue)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;

        Ok(Some(LockGuard::new(queue)))
    }

    async fn release(&self, guard: &LockGuard) -> Result<()> {
        // Clamped in SQL: releasing without a matching acquire is harmless
        sqlx::query(
            "UPDATE worker_locks SET active_workers = MAX(active_workers - 1, 0) WHERE queue = ?",
        )
        .bind(guard.queue())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}
