// Domain Layer

pub mod lock;
pub mod task;

pub use lock::WorkerLock;
pub use task::{DeliveryMethod, LeasedTask, NewTask, QueueName, TaskId};
