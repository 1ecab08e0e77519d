// Push Endpoint Binding & Dispatch
//
// Turns an ordinary async function into an asynchronous job endpoint: the
// managed queue service POSTs encoded call payloads back at the bound
// path, and `enqueue` submits new payloads targeted at it. Binding and
// dispatch are two distinct operations; `bind` returns the stable handle
// up front, so no route is ever resolved by identity search.

use crate::application::codec::CallPayload;
use crate::domain::{NewTask, TaskId};
use crate::error::{AppError, Result};
use crate::port::QueueService;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::error;

/// Fixed response body for a successful dispatch
pub const COMPLETED_BODY: &str = "View completed successfully";
/// Fixed response body when the authenticity header is missing
pub const FORBIDDEN_BODY: &str = "This is a taskqueue endpoint.";
/// Fixed response body signalling the queue service to retry the task
pub const FAILED_BODY: &str = "Task execution failed";

/// What a task handler produced
pub enum HandlerOutcome {
    /// The work finished inside the handler
    Done,
    /// Deferred work the dispatcher blocks on before responding, so a
    /// deferred failure still surfaces as a retryable response
    Deferred(BoxFuture<'static, Result<()>>),
}

/// A function bound as a push-queue endpoint
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn call(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> Result<HandlerOutcome>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> TaskHandler for FnHandler<F>
where
    F: Fn(Vec<Value>, Map<String, Value>) -> BoxFuture<'static, Result<HandlerOutcome>>
        + Send
        + Sync,
{
    async fn call(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> Result<HandlerOutcome> {
        (self.0)(args, kwargs).await
    }
}

/// Wrap a closure returning a boxed future as a task handler
pub fn handler_fn<F>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(Vec<Value>, Map<String, Value>) -> BoxFuture<'static, Result<HandlerOutcome>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnHandler(f))
}

/// Reserved submission controls, typed instead of being smuggled through
/// the call's keyword arguments
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Earliest execution time
    pub eta: Option<DateTime<Utc>>,
    /// Task name, for deduplication by the queue service
    pub name: Option<String>,
    /// Target module/version of the service
    pub target: Option<String>,
    /// Submit within the caller's transaction
    pub transactional: bool,
}

/// One incoming request from the queue dispatch mechanism
#[derive(Debug, Clone, Default)]
pub struct DispatchRequest {
    /// Value of the queue-name authenticity header, when present
    pub queue_header: Option<String>,
    /// Parsed retry-count header; `None` means unknown
    pub retry_count: Option<u32>,
    /// Raw request body (an encoded `CallPayload`)
    pub body: Vec<u8>,
}

/// Outcome of one dispatch, mapped onto HTTP by the API layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStatus {
    /// 200: handler ran to completion
    Completed,
    /// 403: the request did not come through the queue dispatch mechanism
    Forbidden,
    /// 500: decode or handler failure; the queue service retries on its
    /// own backoff policy
    Failed,
}

impl DispatchStatus {
    pub fn body(&self) -> &'static str {
        match self {
            DispatchStatus::Completed => COMPLETED_BODY,
            DispatchStatus::Forbidden => FORBIDDEN_BODY,
            DispatchStatus::Failed => FAILED_BODY,
        }
    }
}

struct EndpointInner {
    path: String,
    queue_name: String,
    handler: Arc<dyn TaskHandler>,
    queue_service: Arc<dyn QueueService>,
}

/// Stable handle for a bound push endpoint
#[derive(Clone)]
pub struct PushEndpoint {
    inner: Arc<EndpointInner>,
}

impl std::fmt::Debug for PushEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushEndpoint")
            .field("path", &self.inner.path)
            .field("queue_name", &self.inner.queue_name)
            .finish()
    }
}

impl PushEndpoint {
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn queue_name(&self) -> &str {
        &self.inner.queue_name
    }

    /// Submit a deferred call against this endpoint
    pub async fn enqueue(
        &self,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        options: EnqueueOptions,
    ) -> Result<TaskId> {
        let payload = CallPayload::new(args, kwargs).encode()?;
        let mut task = NewTask::push(self.inner.path.clone(), payload);
        task.eta = options.eta;
        task.name = options.name;
        task.target = options.target;
        task.transactional = options.transactional;
        self.inner
            .queue_service
            .add(&self.inner.queue_name, task)
            .await
    }

    /// Dispatch one incoming queue request against the bound handler
    pub async fn dispatch(&self, request: DispatchRequest) -> DispatchStatus {
        // Only the trusted queue dispatch mechanism sets this header
        let authentic = matches!(request.queue_header.as_deref(), Some(q) if !q.is_empty());
        if !authentic {
            return DispatchStatus::Forbidden;
        }

        match self.invoke(&request.body).await {
            Ok(()) => DispatchStatus::Completed,
            Err(e) => {
                error!(
                    path = %self.inner.path,
                    attempt = ?request.retry_count,
                    error = %e,
                    "Task execution failed"
                );
                DispatchStatus::Failed
            }
        }
    }

    async fn invoke(&self, body: &[u8]) -> Result<()> {
        let payload = CallPayload::decode(body)?;
        match self
            .inner
            .handler
            .call(payload.args, payload.kwargs)
            .await?
        {
            HandlerOutcome::Done => Ok(()),
            HandlerOutcome::Deferred(deferred) => deferred.await,
        }
    }
}

/// Explicit endpoint registration
///
/// `bind` hands back the endpoint handle at registration time; duplicate
/// paths are a configuration error raised immediately, never retried.
pub struct EndpointRegistry {
    queue_service: Arc<dyn QueueService>,
    endpoints: Mutex<HashMap<String, PushEndpoint>>,
}

impl EndpointRegistry {
    pub fn new(queue_service: Arc<dyn QueueService>) -> Self {
        Self {
            queue_service,
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    /// Bind `handler` as the push endpoint at `path` for `queue_name`
    pub fn bind(
        &self,
        path: &str,
        queue_name: &str,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<PushEndpoint> {
        if !path.starts_with('/') {
            return Err(AppError::Config(format!(
                "endpoint path must be absolute: {:?}",
                path
            )));
        }

        let mut endpoints = self.endpoints.lock().expect("registry poisoned");
        if endpoints.contains_key(path) {
            return Err(AppError::Config(format!(
                "push endpoint already bound at {}",
                path
            )));
        }

        let endpoint = PushEndpoint {
            inner: Arc::new(EndpointInner {
                path: path.to_string(),
                queue_name: queue_name.to_string(),
                handler,
                queue_service: Arc::clone(&self.queue_service),
            }),
        };
        endpoints.insert(path.to_string(), endpoint.clone());
        Ok(endpoint)
    }

    /// Look up the endpoint bound at `path`
    pub fn get(&self, path: &str) -> Option<PushEndpoint> {
        self.endpoints
            .lock()
            .expect("registry poisoned")
            .get(path)
            .cloned()
    }

    /// All bound paths, for router construction
    pub fn paths(&self) -> Vec<String> {
        self.endpoints
            .lock()
            .expect("registry poisoned")
            .keys()
            .cloned()
            .collect()
    }
}
