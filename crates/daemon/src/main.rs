//! Siphon Daemon - Main Entry Point
//!
//! Dev server wiring: SQLite-backed worker locks, an in-process queue
//! backend, one demo push endpoint, and a pull worker for the default
//! queue, all served over the HTTP surface.

use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use siphon_api_http::{serve, AppState, HttpServerConfig};
use siphon_core::application::push::{handler_fn, EndpointRegistry, HandlerOutcome};
use siphon_core::application::worker::{BatchItem, BatchProcessor, Completions, PullWorker};
use siphon_core::port::queue_service::memory::MemoryQueueService;
use siphon_core::port::time_provider::SystemTimeProvider;
use siphon_infra_sqlite::{create_pool, run_migrations, SqliteLockStore};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_DB_PATH: &str = "~/.siphon/siphon.db";
const DEFAULT_QUEUE: &str = "default";

/// Default batch processor: logs each payload and acknowledges it
struct LoggingProcessor;

#[async_trait]
impl BatchProcessor for LoggingProcessor {
    async fn process(
        &self,
        batch: &[BatchItem],
        completions: &mut Completions,
    ) -> siphon_core::Result<()> {
        for item in batch {
            info!(
                task_id = %item.task.id,
                args = ?item.payload.args,
                "Processing leased task"
            );
            completions.complete(&item.task);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize logging
    let log_format = std::env::var("SIPHON_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("siphon=info"))
        .expect("Failed to create env filter");

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }

    info!("Siphon v{} starting...", VERSION);

    // 2. Load configuration
    let db_path = std::env::var("SIPHON_DB_PATH")
        .unwrap_or_else(|_| shellexpand::tilde(DEFAULT_DB_PATH).into_owned());

    let http_port: u16 = std::env::var("SIPHON_HTTP_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8473);

    info!(db_path = %db_path, "Initializing database...");

    // 3. Initialize database
    let pool = create_pool(&db_path)
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // 4. Setup dependencies (DI wiring)
    let time_provider = Arc::new(SystemTimeProvider);
    let lock_store = Arc::new(SqliteLockStore::new(pool.clone(), time_provider));

    // In-process queue backend; deployment swaps in an adapter for the
    // managed queue service
    let queue_service = Arc::new(MemoryQueueService::new());

    let registry = Arc::new(EndpointRegistry::new(queue_service.clone()));

    // Demo push endpoint: logs whatever it is called with
    registry
        .bind(
            "/tasks/log/",
            DEFAULT_QUEUE,
            handler_fn(|args, kwargs| {
                async move {
                    info!(?args, ?kwargs, "Log task executed");
                    Ok(HandlerOutcome::Done)
                }
                .boxed()
            }),
        )
        .map_err(|e| anyhow::anyhow!("Endpoint binding failed: {}", e))?;

    // Pull worker draining the default queue
    let worker = Arc::new(PullWorker::new(
        DEFAULT_QUEUE,
        lock_store,
        queue_service,
        Arc::new(LoggingProcessor),
    ));

    let mut workers = HashMap::new();
    workers.insert(DEFAULT_QUEUE.to_string(), worker);

    let state = AppState {
        registry,
        workers: Arc::new(workers),
    };

    // 5. Serve until ctrl-c
    serve(
        HttpServerConfig {
            port: http_port,
            ..Default::default()
        },
        state,
        shutdown_signal(),
    )
    .await
    .map_err(|e| anyhow::anyhow!("HTTP server failed: {}", e))?;

    info!("Siphon stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
