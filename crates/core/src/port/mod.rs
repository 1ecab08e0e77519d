// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod lock_store;
pub mod queue_service;
pub mod time_provider;

// Re-exports
pub use id_provider::IdProvider;
pub use lock_store::{LockGuard, LockStore};
pub use queue_service::QueueService;
pub use time_provider::TimeProvider;
