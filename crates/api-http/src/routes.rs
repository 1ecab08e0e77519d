// Dispatch & Trigger Routes
//
// One POST route per bound push endpoint, plus the pull-worker trigger.
// The trigger responds before the drain finishes (fire-and-forget); the
// lock decision alone determines "Started" vs "locked".

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use siphon_core::application::{DispatchRequest, DispatchStatus, EndpointRegistry, PullWorker};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

use crate::headers::{header_str, task_retry_count, QUEUE_NAME_HEADER};

/// Shared route state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<EndpointRegistry>,
    pub workers: Arc<HashMap<String, Arc<PullWorker>>>,
}

/// Build the router over the bound endpoints and registered workers
pub fn router(state: AppState) -> Router {
    let mut router = Router::new();
    for path in state.registry.paths() {
        router = router.route(&path, post(dispatch_push));
    }
    router
        .route("/_queue/workers/{queue}/start", get(start_worker))
        .with_state(state)
}

fn dispatch_status_code(status: DispatchStatus) -> StatusCode {
    match status {
        DispatchStatus::Completed => StatusCode::OK,
        DispatchStatus::Forbidden => StatusCode::FORBIDDEN,
        DispatchStatus::Failed => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn dispatch_push(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    // Routes are built from the registry, so this lookup only misses if
    // the request path diverges from the bound path
    let endpoint = match state.registry.get(uri.path()) {
        Some(endpoint) => endpoint,
        None => return (StatusCode::NOT_FOUND, "Not Found"),
    };

    let request = DispatchRequest {
        queue_header: header_str(&headers, QUEUE_NAME_HEADER).map(str::to_string),
        retry_count: task_retry_count(&headers),
        body: body.to_vec(),
    };

    let status = endpoint.dispatch(request).await;
    (dispatch_status_code(status), status.body())
}

#[derive(Debug, Default, Deserialize)]
struct StartWorkerQuery {
    /// Seconds to sleep, under the lock, before the first lease
    #[serde(default)]
    delay: Option<u64>,
}

async fn start_worker(
    State(state): State<AppState>,
    Path(queue): Path<String>,
    Query(query): Query<StartWorkerQuery>,
) -> impl IntoResponse {
    let worker = match state.workers.get(&queue) {
        Some(worker) => worker,
        None => return (StatusCode::NOT_FOUND, "Unknown queue"),
    };

    let delay = query.delay.map(Duration::from_secs);
    match worker.try_start(delay).await {
        Ok(Some(_drain)) => (StatusCode::OK, "Started"),
        Ok(None) => (StatusCode::OK, "locked"),
        Err(e) => {
            error!(queue = %queue, error = %e, "Failed to start drain loop");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to start worker")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::RETRY_COUNT_HEADER;
    use futures::FutureExt;
    use http_body_util::BodyExt;
    use serde_json::json;
    use siphon_core::application::codec::CallPayload;
    use siphon_core::application::push::{handler_fn, HandlerOutcome, FORBIDDEN_BODY};
    use siphon_core::application::worker::{BatchItem, BatchProcessor, Completions};
    use siphon_core::error::{AppError, Result as CoreResult};
    use siphon_core::port::lock_store::memory::MemoryLockStore;
    use siphon_core::port::queue_service::memory::MemoryQueueService;
    use siphon_core::port::LockStore;
    use tower::ServiceExt;

    struct CompleteAll;

    #[async_trait::async_trait]
    impl BatchProcessor for CompleteAll {
        async fn process(
            &self,
            batch: &[BatchItem],
            completions: &mut Completions,
        ) -> CoreResult<()> {
            completions.complete_all(batch.iter().map(|item| &item.task));
            Ok(())
        }
    }

    fn test_state() -> (Arc<MemoryQueueService>, Arc<MemoryLockStore>, AppState) {
        let queue = Arc::new(MemoryQueueService::new());
        let locks = Arc::new(MemoryLockStore::new());
        let registry = Arc::new(EndpointRegistry::new(queue.clone()));

        registry
            .bind(
                "/tasks/ok/",
                "default",
                handler_fn(|_args, _kwargs| async { Ok(HandlerOutcome::Done) }.boxed()),
            )
            .unwrap();
        registry
            .bind(
                "/tasks/fail/",
                "default",
                handler_fn(|_args, _kwargs| {
                    async { Err(AppError::Handler("task blew up".to_string())) }.boxed()
                }),
            )
            .unwrap();

        let worker = Arc::new(PullWorker::new(
            "default",
            locks.clone(),
            queue.clone(),
            Arc::new(CompleteAll),
        ));
        let mut workers = HashMap::new();
        workers.insert("default".to_string(), worker);

        let state = AppState {
            registry,
            workers: Arc::new(workers),
        };
        (queue, locks, state)
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn post_request(path: &str, with_header: bool, body: Vec<u8>) -> axum::http::Request<axum::body::Body> {
        let mut builder = axum::http::Request::builder().method("POST").uri(path);
        if with_header {
            builder = builder
                .header(QUEUE_NAME_HEADER, "default")
                .header(RETRY_COUNT_HEADER, "0");
        }
        builder.body(axum::body::Body::from(body)).unwrap()
    }

    #[tokio::test]
    async fn dispatch_without_queue_header_is_forbidden() {
        let (_, _, state) = test_state();
        let app = router(state);

        let payload = CallPayload::default().encode().unwrap();
        let response = app
            .oneshot(post_request("/tasks/ok/", false, payload))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_string(response).await, FORBIDDEN_BODY);
    }

    #[tokio::test]
    async fn dispatch_with_header_completes() {
        let (_, _, state) = test_state();
        let app = router(state);

        let payload = CallPayload::positional(vec![json!(1)]).encode().unwrap();
        let response = app
            .oneshot(post_request("/tasks/ok/", true, payload))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "View completed successfully");
    }

    #[tokio::test]
    async fn dispatch_handler_failure_signals_retry() {
        let (_, _, state) = test_state();
        let app = router(state);

        let payload = CallPayload::default().encode().unwrap();
        let response = app
            .oneshot(post_request("/tasks/fail/", true, payload))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_string(response).await, "Task execution failed");
    }

    #[tokio::test]
    async fn trigger_starts_and_reports_locked() {
        let (_, locks, state) = test_state();
        let app = router(state);

        // Hold the lock: the trigger must answer "locked" immediately
        let held = locks.try_acquire("default", 1).await.unwrap().unwrap();
        let response = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/_queue/workers/default/start")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "locked");

        locks.release(&held).await.unwrap();

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/_queue/workers/default/start")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "Started");
    }

    #[tokio::test]
    async fn trigger_unknown_queue_is_not_found() {
        let (_, _, state) = test_state();
        let app = router(state);

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/_queue/workers/nope/start")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
