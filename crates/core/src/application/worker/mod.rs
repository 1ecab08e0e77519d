// Pull Worker - batch drain loop
//
// Drains a pull queue under the per-queue worker lock: acquire, optional
// delay, lease/process/acknowledge until an empty lease, release. The
// lock is released on every exit path after acquisition.

pub mod constants;

use constants::*;

use crate::application::codec::CallPayload;
use crate::domain::{LeasedTask, TaskId};
use crate::error::Result;
use crate::port::{LockGuard, LockStore, QueueService};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// One decoded unit of leased work
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub task: LeasedTask,
    pub payload: CallPayload,
}

/// Collects the tasks a processor has finished with.
///
/// Anything not marked complete stays leased and is re-delivered by the
/// queue service once the visibility timeout expires.
#[derive(Debug, Default)]
pub struct Completions {
    done: Vec<TaskId>,
}

impl Completions {
    /// Mark a single task complete
    pub fn complete(&mut self, task: &LeasedTask) {
        self.done.push(task.id.clone());
    }

    /// Mark a whole sequence of tasks complete
    pub fn complete_all<'a>(&mut self, tasks: impl IntoIterator<Item = &'a LeasedTask>) {
        for task in tasks {
            self.complete(task);
        }
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }

    fn take(&mut self) -> Vec<TaskId> {
        std::mem::take(&mut self.done)
    }
}

/// User-supplied processor for one leased batch.
///
/// Completions recorded before an error are still acknowledged, so a
/// processor that fails partway keeps its partial progress.
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    async fn process(&self, batch: &[BatchItem], completions: &mut Completions) -> Result<()>;
}

/// Pull worker configuration
#[derive(Debug, Clone)]
pub struct PullWorkerConfig {
    /// Tasks requested per lease call
    pub lease_size: usize,
    /// Visibility window granted per lease
    pub lease_seconds: u64,
    /// Lease filter; a worker instance serves one tag or none
    pub tag: Option<String>,
    /// Concurrent drain loops allowed for this queue
    pub max_workers: u32,
}

impl Default for PullWorkerConfig {
    fn default() -> Self {
        Self {
            lease_size: DEFAULT_LEASE_SIZE,
            lease_seconds: DEFAULT_LEASE_SECONDS,
            tag: None,
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

/// Why a drain call returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The queue was drained down to an empty lease
    Drained(DrainStats),
    /// Another drain loop already holds the lock; nothing was leased
    Locked,
}

/// Counters for one completed drain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub lease_calls: usize,
    pub batches: usize,
    pub leased: usize,
    pub acknowledged: usize,
    pub undecoded: usize,
}

/// Worker draining one pull queue under the worker lock
///
/// Cheap to clone: the port handles are shared, so a clone drains the
/// same queue against the same lock.
#[derive(Clone)]
pub struct PullWorker {
    queue: String,
    config: PullWorkerConfig,
    lock_store: Arc<dyn LockStore>,
    queue_service: Arc<dyn QueueService>,
    processor: Arc<dyn BatchProcessor>,
}

impl PullWorker {
    pub fn new(
        queue: impl Into<String>,
        lock_store: Arc<dyn LockStore>,
        queue_service: Arc<dyn QueueService>,
        processor: Arc<dyn BatchProcessor>,
    ) -> Self {
        Self {
            queue: queue.into(),
            config: PullWorkerConfig::default(),
            lock_store,
            queue_service,
            processor,
        }
    }

    pub fn with_config(mut self, config: PullWorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Run a full drain. Returns `Locked` without issuing a single lease
    /// when another loop holds the lock; that is a normal outcome.
    pub async fn drain(&self, initial_delay: Option<Duration>) -> Result<DrainOutcome> {
        let guard = match self
            .lock_store
            .try_acquire(&self.queue, self.config.max_workers)
            .await?
        {
            Some(guard) => guard,
            None => {
                debug!(queue = %self.queue, "Drain loop already active, exiting");
                return Ok(DrainOutcome::Locked);
            }
        };
        self.drain_locked(guard, initial_delay)
            .await
            .map(DrainOutcome::Drained)
    }

    /// Acquire the lock, then continue the drain on the runtime.
    ///
    /// Returns `None` when the lock is already held. The caller can
    /// respond immediately either way (fire-and-forget trigger).
    pub async fn try_start(
        &self,
        initial_delay: Option<Duration>,
    ) -> Result<Option<JoinHandle<Result<DrainStats>>>> {
        let guard = match self
            .lock_store
            .try_acquire(&self.queue, self.config.max_workers)
            .await?
        {
            Some(guard) => guard,
            None => {
                debug!(queue = %self.queue, "Drain loop already active, not starting another");
                return Ok(None);
            }
        };
        let worker = self.clone();
        Ok(Some(tokio::spawn(async move {
            worker.drain_locked(guard, initial_delay).await
        })))
    }

    /// Drain with the lock held. The lock is released whatever happens
    /// inside; a drain error wins over a release error.
    async fn drain_locked(
        &self,
        guard: LockGuard,
        initial_delay: Option<Duration>,
    ) -> Result<DrainStats> {
        // The delay is slept under the lock so other instances cannot
        // acquire and hot-loop on a sparse queue during the window.
        if let Some(delay) = initial_delay {
            debug!(queue = %self.queue, delay_ms = delay.as_millis() as u64, "Delaying first lease");
            sleep(delay).await;
        }

        let result = self.drain_inner().await;

        match self.lock_store.release(&guard).await {
            Ok(()) => result,
            Err(release_err) => match result {
                Err(drain_err) => {
                    error!(queue = %self.queue, error = %release_err, "Failed to release worker lock");
                    Err(drain_err)
                }
                Ok(_) => Err(release_err),
            },
        }
    }

    async fn drain_inner(&self) -> Result<DrainStats> {
        let mut stats = DrainStats::default();
        let lease = Duration::from_secs(self.config.lease_seconds);

        loop {
            let tasks = self
                .queue_service
                .lease(
                    &self.queue,
                    self.config.lease_size,
                    lease,
                    self.config.tag.as_deref(),
                )
                .await?;
            stats.lease_calls += 1;

            // An empty result is the only termination condition: a full
            // batch is always followed by one more lease to observe drain.
            if tasks.is_empty() {
                break;
            }

            stats.batches += 1;
            stats.leased += tasks.len();

            let mut batch = Vec::with_capacity(tasks.len());
            for task in tasks {
                match CallPayload::decode(&task.payload) {
                    Ok(payload) => batch.push(BatchItem { task, payload }),
                    Err(e) => {
                        // Left un-deleted: re-leased after the visibility
                        // timeout and eventually dead-lettered by the
                        // service's own retry limit.
                        warn!(
                            queue = %self.queue,
                            task_id = %task.id,
                            error = %e,
                            "Undecodable task excluded from batch"
                        );
                        stats.undecoded += 1;
                    }
                }
            }

            let mut completions = Completions::default();
            let result = self.processor.process(&batch, &mut completions).await;

            // Flush acknowledgements before surfacing any processor error,
            // so partial progress is preserved.
            let done = completions.take();
            if !done.is_empty() {
                self.queue_service.delete(&self.queue, &done).await?;
                stats.acknowledged += done.len();
            }
            result?;
        }

        info!(
            queue = %self.queue,
            lease_calls = stats.lease_calls,
            leased = stats.leased,
            acknowledged = stats.acknowledged,
            undecoded = stats.undecoded,
            "Queue drained"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::port::lock_store::memory::MemoryLockStore;
    use crate::port::queue_service::memory::MemoryQueueService;
    use crate::domain::NewTask;
    use serde_json::json;
    use std::sync::Mutex;

    /// Processor completing every task it receives
    struct CompleteAll;

    #[async_trait]
    impl BatchProcessor for CompleteAll {
        async fn process(&self, batch: &[BatchItem], completions: &mut Completions) -> Result<()> {
            completions.complete_all(batch.iter().map(|item| &item.task));
            Ok(())
        }
    }

    /// Completes the first `n` tasks of each batch, leaves the rest leased
    struct CompleteFirst(usize);

    #[async_trait]
    impl BatchProcessor for CompleteFirst {
        async fn process(&self, batch: &[BatchItem], completions: &mut Completions) -> Result<()> {
            completions.complete_all(batch.iter().take(self.0).map(|item| &item.task));
            Ok(())
        }
    }

    /// Completes the first task, then fails
    struct FailAfterFirst;

    #[async_trait]
    impl BatchProcessor for FailAfterFirst {
        async fn process(&self, batch: &[BatchItem], completions: &mut Completions) -> Result<()> {
            if let Some(item) = batch.first() {
                completions.complete(&item.task);
            }
            Err(AppError::Handler("boom".to_string()))
        }
    }

    /// Records the payloads seen by the processor
    struct Recording {
        seen: Mutex<Vec<CallPayload>>,
    }

    #[async_trait]
    impl BatchProcessor for Recording {
        async fn process(&self, batch: &[BatchItem], completions: &mut Completions) -> Result<()> {
            let mut seen = self.seen.lock().unwrap();
            for item in batch {
                seen.push(item.payload.clone());
                completions.complete(&item.task);
            }
            Ok(())
        }
    }

    async fn enqueue_pull_tasks(queue: &MemoryQueueService, name: &str, count: usize) {
        for i in 0..count {
            let payload = CallPayload::positional(vec![json!(i)]).encode().unwrap();
            queue.add(name, NewTask::pull(payload)).await.unwrap();
        }
    }

    fn worker(
        queue: &str,
        lock_store: Arc<MemoryLockStore>,
        queue_service: Arc<MemoryQueueService>,
        processor: Arc<dyn BatchProcessor>,
        lease_size: usize,
    ) -> PullWorker {
        PullWorker::new(queue, lock_store, queue_service, processor).with_config(
            PullWorkerConfig {
                lease_size,
                lease_seconds: 60,
                tag: None,
                max_workers: 1,
            },
        )
    }

    #[tokio::test]
    async fn empty_queue_terminates_after_one_lease() {
        let locks = Arc::new(MemoryLockStore::new());
        let queue = Arc::new(MemoryQueueService::new());
        let w = worker("q", locks, queue.clone(), Arc::new(CompleteAll), 10);

        let outcome = w.drain(None).await.unwrap();
        assert_eq!(
            outcome,
            DrainOutcome::Drained(DrainStats {
                lease_calls: 1,
                ..DrainStats::default()
            })
        );
        assert_eq!(queue.lease_calls(), 1);
    }

    #[tokio::test]
    async fn drain_issues_one_extra_lease_and_acknowledges_everything() {
        // K=5 tasks with lease size L=2: ceil(5/2)+1 = 4 lease calls,
        // 5 acknowledgements spread across 3 delete calls.
        let locks = Arc::new(MemoryLockStore::new());
        let queue = Arc::new(MemoryQueueService::new());
        enqueue_pull_tasks(&queue, "q", 5).await;

        let w = worker("q", locks, queue.clone(), Arc::new(CompleteAll), 2);
        let outcome = w.drain(None).await.unwrap();

        match outcome {
            DrainOutcome::Drained(stats) => {
                assert_eq!(stats.lease_calls, 4);
                assert_eq!(stats.batches, 3);
                assert_eq!(stats.leased, 5);
                assert_eq!(stats.acknowledged, 5);
            }
            DrainOutcome::Locked => panic!("drain unexpectedly locked"),
        }
        assert_eq!(queue.delete_calls(), 3);
        assert_eq!(queue.deleted_total(), 5);
        assert_eq!(queue.depth("q"), 0);
    }

    #[tokio::test]
    async fn held_lock_denies_drain_without_leasing() {
        let locks = Arc::new(MemoryLockStore::new());
        let queue = Arc::new(MemoryQueueService::new());
        enqueue_pull_tasks(&queue, "q", 3).await;

        let held = locks.try_acquire("q", 1).await.unwrap().unwrap();

        let w = worker("q", locks.clone(), queue.clone(), Arc::new(CompleteAll), 10);
        let outcome = w.drain(None).await.unwrap();
        assert_eq!(outcome, DrainOutcome::Locked);
        assert_eq!(queue.lease_calls(), 0);

        locks.release(&held).await.unwrap();
    }

    #[tokio::test]
    async fn partial_completion_leaves_remainder_leasable() {
        let locks = Arc::new(MemoryLockStore::new());
        let queue = Arc::new(MemoryQueueService::new());
        enqueue_pull_tasks(&queue, "q", 4).await;

        // Lease all 4 in one batch, complete only 1. The drain then loops:
        // the 3 uncompleted tasks are still under lease, so the next lease
        // comes back empty and the loop terminates.
        let w = worker("q", locks, queue.clone(), Arc::new(CompleteFirst(1)), 10);
        let outcome = w.drain(None).await.unwrap();

        match outcome {
            DrainOutcome::Drained(stats) => {
                assert_eq!(stats.acknowledged, 1);
                assert_eq!(stats.leased, 4);
            }
            DrainOutcome::Locked => panic!("drain unexpectedly locked"),
        }
        // Not deleted, not lost: still owned by the queue
        assert_eq!(queue.depth("q"), 3);
    }

    #[tokio::test]
    async fn processor_error_flushes_completions_and_releases_lock() {
        let locks = Arc::new(MemoryLockStore::new());
        let queue = Arc::new(MemoryQueueService::new());
        enqueue_pull_tasks(&queue, "q", 3).await;

        let w = worker(
            "q",
            locks.clone(),
            queue.clone(),
            Arc::new(FailAfterFirst),
            10,
        );
        let err = w.drain(None).await.unwrap_err();
        assert!(matches!(err, AppError::Handler(_)));

        // Partial progress was acknowledged before the error surfaced
        assert_eq!(queue.deleted_total(), 1);
        assert_eq!(queue.depth("q"), 2);

        // The lock was released on the error path
        assert_eq!(locks.active_workers("q"), 0);
        assert!(locks.try_acquire("q", 1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn undecodable_task_is_quarantined_not_fatal() {
        let locks = Arc::new(MemoryLockStore::new());
        let queue = Arc::new(MemoryQueueService::new());

        queue
            .add("q", NewTask::pull(b"not a payload".to_vec()))
            .await
            .unwrap();
        let good = CallPayload::positional(vec![json!("ok")]).encode().unwrap();
        queue.add("q", NewTask::pull(good)).await.unwrap();

        let recording = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
        });
        let w = worker("q", locks, queue.clone(), recording.clone(), 10);
        let outcome = w.drain(None).await.unwrap();

        match outcome {
            DrainOutcome::Drained(stats) => {
                assert_eq!(stats.undecoded, 1);
                assert_eq!(stats.acknowledged, 1);
            }
            DrainOutcome::Locked => panic!("drain unexpectedly locked"),
        }

        let seen = recording.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].args, vec![json!("ok")]);

        // The undecodable task stays with the queue service
        assert_eq!(queue.depth("q"), 1);
    }

    /// Holds the batch open until the gate gets a permit
    struct Gated {
        gate: Arc<tokio::sync::Semaphore>,
    }

    #[async_trait]
    impl BatchProcessor for Gated {
        async fn process(&self, batch: &[BatchItem], completions: &mut Completions) -> Result<()> {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| AppError::Internal("gate closed".to_string()))?;
            completions.complete_all(batch.iter().map(|item| &item.task));
            Ok(())
        }
    }

    #[tokio::test]
    async fn try_start_spawns_and_denies_second_trigger_mid_run() {
        let locks = Arc::new(MemoryLockStore::new());
        let queue = Arc::new(MemoryQueueService::new());
        enqueue_pull_tasks(&queue, "q", 2).await;

        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let w = Arc::new(worker(
            "q",
            locks.clone(),
            queue.clone(),
            Arc::new(Gated { gate: gate.clone() }),
            10,
        ));

        let handle = w.try_start(None).await.unwrap().expect("lock acquired");

        // try_start takes the lock before spawning, so a second trigger
        // issued mid-run is deterministically denied
        assert!(w.try_start(None).await.unwrap().is_none());

        gate.add_permits(1);
        let stats = handle.await.unwrap().unwrap();
        assert_eq!(stats.acknowledged, 2);
        assert_eq!(locks.active_workers("q"), 0);

        // After completion the lock is free again
        let again = w.try_start(None).await.unwrap().expect("lock free");
        again.await.unwrap().unwrap();
    }
}
