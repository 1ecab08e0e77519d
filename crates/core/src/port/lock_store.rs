// Lock Store Port
//
// Cross-instance mutual exclusion for drain loops: one counter record per
// queue, at most `max_workers` holders at a time. Implementations must make
// acquire/release a linearizable read-modify-write on that single record.

use crate::domain::QueueName;
use crate::error::Result;
use async_trait::async_trait;

/// Handle returned by a successful acquire; passed back to `release`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGuard {
    queue: QueueName,
}

impl LockGuard {
    pub fn new(queue: impl Into<QueueName>) -> Self {
        Self {
            queue: queue.into(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }
}

/// Atomic acquire/release on the per-queue worker-lock counter
///
/// A denied acquire is a normal outcome (another drain loop is active),
/// not a fault, so it is modelled as `Ok(None)`.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Atomically increment the counter for `queue` if it is below
    /// `max_workers`, creating the record at count 0 when absent.
    async fn try_acquire(&self, queue: &str, max_workers: u32) -> Result<Option<LockGuard>>;

    /// Atomically decrement the counter. Clamps at zero: releasing a lock
    /// that was never acquired must not drive the counter negative.
    async fn release(&self, guard: &LockGuard) -> Result<()>;
}

pub mod memory {
    use super::*;
    use crate::domain::WorkerLock;
    use crate::port::time_provider::{SystemTimeProvider, TimeProvider};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// In-process lock store for tests and single-process deployments
    pub struct MemoryLockStore {
        locks: Mutex<HashMap<QueueName, WorkerLock>>,
        time_provider: Arc<dyn TimeProvider>,
        ttl_millis: i64,
    }

    impl MemoryLockStore {
        pub fn new() -> Self {
            Self::with_time_provider(Arc::new(SystemTimeProvider))
        }

        pub fn with_time_provider(time_provider: Arc<dyn TimeProvider>) -> Self {
            Self {
                locks: Mutex::new(HashMap::new()),
                time_provider,
                ttl_millis: crate::application::worker::constants::DEFAULT_LOCK_TTL_MS,
            }
        }

        /// Current counter value, for assertions
        pub fn active_workers(&self, queue: &str) -> i64 {
            self.locks
                .lock()
                .expect("lock store poisoned")
                .get(queue)
                .map(|l| l.active_workers)
                .unwrap_or(0)
        }
    }

    impl Default for MemoryLockStore {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl LockStore for MemoryLockStore {
        async fn try_acquire(&self, queue: &str, max_workers: u32) -> Result<Option<LockGuard>> {
            let now = self.time_provider.now_millis();
            let mut locks = self.locks.lock().expect("lock store poisoned");
            let lock = locks
                .entry(queue.to_string())
                .or_insert_with(|| WorkerLock::new(queue));

            if lock.occupy(max_workers, now, self.ttl_millis) {
                Ok(Some(LockGuard::new(queue)))
            } else {
                Ok(None)
            }
        }

        async fn release(&self, guard: &LockGuard) -> Result<()> {
            let mut locks = self.locks.lock().expect("lock store poisoned");
            if let Some(lock) = locks.get_mut(guard.queue()) {
                lock.vacate();
            }
            Ok(())
        }
    }
}
