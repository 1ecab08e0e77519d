// Queued Task Domain Model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque task identity assigned by the queue service
pub type TaskId = String;

/// Queue identifier
pub type QueueName = String;

/// Delivery method marker for a submitted task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryMethod {
    /// Dispatched by the queue service as an HTTP POST against `url`
    Push { url: String },
    /// Held by the queue service until a worker leases it
    Pull,
}

/// A task submitted to the queue service via `add`
///
/// Ownership passes to the queue service on submission; the task is
/// removed only by an explicit `delete` after successful processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    /// Opaque payload bytes (see `application::codec` for call payloads)
    pub payload: Vec<u8>,
    pub method: DeliveryMethod,
    /// Lease filter tag (pull tasks only)
    pub tag: Option<String>,
    /// Earliest delivery time; `None` means as soon as possible
    pub eta: Option<DateTime<Utc>>,
    /// Caller-chosen task name, for deduplication by the queue service
    pub name: Option<String>,
    /// Target module/version of the service that should execute the task
    pub target: Option<String>,
    /// Submit within the caller's transaction
    pub transactional: bool,
}

impl NewTask {
    /// Push task dispatched against a bound endpoint URL
    pub fn push(url: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            payload,
            method: DeliveryMethod::Push { url: url.into() },
            tag: None,
            eta: None,
            name: None,
            target: None,
            transactional: false,
        }
    }

    /// Pull task held for lease-based consumption
    pub fn pull(payload: Vec<u8>) -> Self {
        Self {
            payload,
            method: DeliveryMethod::Pull,
            tag: None,
            eta: None,
            name: None,
            target: None,
            transactional: false,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_eta(mut self, eta: DateTime<Utc>) -> Self {
        self.eta = Some(eta);
        self
    }
}

/// A task held under a time-bounded lease by one worker
///
/// The lease is temporary ownership: a task not deleted before the lease
/// expires becomes re-leasable (at-least-once delivery).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeasedTask {
    pub id: TaskId,
    pub payload: Vec<u8>,
    pub tag: Option<String>,
}
