// Queue Service Port
//
// Contract consumed from the managed push/pull queue service. The service
// is assumed to provide at-least-once delivery with visibility timeouts;
// everything beyond this interface (backoff, dead-lettering, dispatch of
// push tasks) is owned by the service, not by this crate.

use crate::domain::{LeasedTask, NewTask, TaskId};
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait QueueService: Send + Sync {
    /// Lease up to `max_tasks` pull tasks from `queue` for `lease`,
    /// optionally filtered by tag. Leased tasks stay invisible to other
    /// consumers until the lease expires or they are deleted.
    async fn lease(
        &self,
        queue: &str,
        max_tasks: usize,
        lease: Duration,
        tag: Option<&str>,
    ) -> Result<Vec<LeasedTask>>;

    /// Permanently remove tasks (acknowledge successful processing)
    async fn delete(&self, queue: &str, task_ids: &[TaskId]) -> Result<()>;

    /// Submit a new task; returns the service-assigned task ID
    async fn add(&self, queue: &str, task: NewTask) -> Result<TaskId>;
}

pub mod memory {
    use super::*;
    use crate::domain::DeliveryMethod;
    use crate::port::id_provider::{IdProvider, UuidProvider};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    struct Entry {
        id: TaskId,
        task: NewTask,
        leased_until: Option<Instant>,
    }

    #[derive(Default)]
    struct Counters {
        lease_calls: usize,
        delete_calls: usize,
        deleted: usize,
    }

    /// In-process queue backend with visibility timeouts
    ///
    /// A stand-in for the managed queue service in tests and the dev
    /// daemon. Tracks lease/delete call counts so drain behavior can be
    /// asserted against.
    pub struct MemoryQueueService {
        queues: Mutex<HashMap<String, Vec<Entry>>>,
        counters: Mutex<Counters>,
        ids: Arc<dyn IdProvider>,
    }

    impl MemoryQueueService {
        pub fn new() -> Self {
            Self::with_id_provider(Arc::new(UuidProvider))
        }

        pub fn with_id_provider(ids: Arc<dyn IdProvider>) -> Self {
            Self {
                queues: Mutex::new(HashMap::new()),
                counters: Mutex::new(Counters::default()),
                ids,
            }
        }

        /// Number of lease calls issued so far
        pub fn lease_calls(&self) -> usize {
            self.counters.lock().expect("counters poisoned").lease_calls
        }

        /// Number of delete calls issued so far
        pub fn delete_calls(&self) -> usize {
            self.counters.lock().expect("counters poisoned").delete_calls
        }

        /// Total tasks removed across all delete calls
        pub fn deleted_total(&self) -> usize {
            self.counters.lock().expect("counters poisoned").deleted
        }

        /// Tasks still owned by the queue (leased or not)
        pub fn depth(&self, queue: &str) -> usize {
            self.queues
                .lock()
                .expect("queues poisoned")
                .get(queue)
                .map(|v| v.len())
                .unwrap_or(0)
        }

        /// Snapshot of submitted tasks, newest last, for assertions
        pub fn submitted(&self, queue: &str) -> Vec<NewTask> {
            self.queues
                .lock()
                .expect("queues poisoned")
                .get(queue)
                .map(|v| v.iter().map(|e| e.task.clone()).collect())
                .unwrap_or_default()
        }
    }

    impl Default for MemoryQueueService {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl QueueService for MemoryQueueService {
        async fn lease(
            &self,
            queue: &str,
            max_tasks: usize,
            lease: Duration,
            tag: Option<&str>,
        ) -> Result<Vec<LeasedTask>> {
            self.counters.lock().expect("counters poisoned").lease_calls += 1;

            let now = Instant::now();
            let wall_now = chrono::Utc::now();
            let mut queues = self.queues.lock().expect("queues poisoned");
            let entries = match queues.get_mut(queue) {
                Some(e) => e,
                None => return Ok(Vec::new()),
            };

            let mut leased = Vec::new();
            for entry in entries.iter_mut() {
                if leased.len() >= max_tasks {
                    break;
                }
                // Push tasks are dispatched by the service, never leased
                if !matches!(entry.task.method, DeliveryMethod::Pull) {
                    continue;
                }
                if matches!(entry.leased_until, Some(until) if until > now) {
                    continue;
                }
                if matches!(entry.task.eta, Some(eta) if eta > wall_now) {
                    continue;
                }
                if tag.is_some() && entry.task.tag.as_deref() != tag {
                    continue;
                }
                entry.leased_until = Some(now + lease);
                leased.push(LeasedTask {
                    id: entry.id.clone(),
                    payload: entry.task.payload.clone(),
                    tag: entry.task.tag.clone(),
                });
            }
            Ok(leased)
        }

        async fn delete(&self, queue: &str, task_ids: &[TaskId]) -> Result<()> {
            let mut counters = self.counters.lock().expect("counters poisoned");
            counters.delete_calls += 1;

            let mut queues = self.queues.lock().expect("queues poisoned");
            if let Some(entries) = queues.get_mut(queue) {
                let before = entries.len();
                entries.retain(|e| !task_ids.contains(&e.id));
                counters.deleted += before - entries.len();
            }
            Ok(())
        }

        async fn add(&self, queue: &str, task: NewTask) -> Result<TaskId> {
            let id = self.ids.generate_id();
            self.queues
                .lock()
                .expect("queues poisoned")
                .entry(queue.to_string())
                .or_default()
                .push(Entry {
                    id: id.clone(),
                    task,
                    leased_until: None,
                });
            Ok(id)
        }
    }
}
