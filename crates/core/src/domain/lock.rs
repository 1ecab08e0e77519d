// Worker Lock Record
//
// One persisted counter row per queue, guarding how many drain loops may
// run concurrently. All mutation goes through `occupy`/`vacate` so the
// stores only need an atomic read-modify-write around them.

use serde::{Deserialize, Serialize};

use super::task::QueueName;

/// Persisted lock record: queue name plus an active-worker count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerLock {
    pub queue: QueueName,
    /// Non-negative count of drain loops currently holding the lock
    pub active_workers: i64,
    /// Expiry stamp (epoch ms); a record past this point counts as free,
    /// so a crashed worker cannot block its queue forever
    pub expires_at: Option<i64>,
}

impl WorkerLock {
    pub fn new(queue: impl Into<QueueName>) -> Self {
        Self {
            queue: queue.into(),
            active_workers: 0,
            expires_at: None,
        }
    }

    /// True when the record's expiry stamp has passed
    pub fn is_expired(&self, now_millis: i64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now_millis)
    }

    /// Occupy one worker slot if fewer than `max_workers` are active.
    /// An expired record is treated as count 0 before deciding.
    /// Stamps `expires_at` on success.
    pub fn occupy(&mut self, max_workers: u32, now_millis: i64, ttl_millis: i64) -> bool {
        if self.is_expired(now_millis) {
            self.active_workers = 0;
        }
        if self.active_workers >= i64::from(max_workers) {
            return false;
        }
        self.active_workers += 1;
        self.expires_at = Some(now_millis + ttl_millis);
        true
    }

    /// Release one worker slot; the count never goes below zero
    pub fn vacate(&mut self) {
        self.active_workers = (self.active_workers - 1).max(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn occupy_respects_max_workers() {
        let mut lock = WorkerLock::new("default");
        assert!(lock.occupy(1, 1_000, 60_000));
        assert!(!lock.occupy(1, 1_000, 60_000));
        assert_eq!(lock.active_workers, 1);
    }

    #[test]
    fn occupy_allows_multiple_slots() {
        let mut lock = WorkerLock::new("default");
        assert!(lock.occupy(3, 1_000, 60_000));
        assert!(lock.occupy(3, 1_000, 60_000));
        assert!(lock.occupy(3, 1_000, 60_000));
        assert!(!lock.occupy(3, 1_000, 60_000));
    }

    #[test]
    fn vacate_clamps_at_zero() {
        let mut lock = WorkerLock::new("default");
        lock.vacate();
        assert_eq!(lock.active_workers, 0);

        assert!(lock.occupy(1, 1_000, 60_000));
        lock.vacate();
        lock.vacate();
        assert_eq!(lock.active_workers, 0);
    }

    #[test]
    fn expired_record_counts_as_free() {
        let mut lock = WorkerLock::new("default");
        assert!(lock.occupy(1, 1_000, 500));
        // TTL passed without a release: the slot is reclaimable
        assert!(lock.occupy(1, 2_000, 500));
        assert_eq!(lock.active_workers, 1);
        assert_eq!(lock.expires_at, Some(2_500));
    }
}
