// Worker constants (no magic values)

/// Default number of tasks requested per lease call
pub const DEFAULT_LEASE_SIZE: usize = 100;

/// Default lease visibility window (seconds)
pub const DEFAULT_LEASE_SECONDS: u64 = 60;

/// Default maximum concurrent drain loops per queue
pub const DEFAULT_MAX_WORKERS: u32 = 1;

/// Lock record TTL (ms). A worker that dies without releasing frees its
/// slot after this long; a drain outliving the TTL may be joined by a
/// second worker, which at-least-once delivery already tolerates.
pub const DEFAULT_LOCK_TTL_MS: i64 = 60 * 60 * 1000;
