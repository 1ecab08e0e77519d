//! HTTP Server
//!
//! Binds the dispatch and trigger routes on localhost by default.

use crate::routes::{router, AppState};
use std::future::Future;
use tokio::net::TcpListener;
use tracing::info;

const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
const DEFAULT_HTTP_PORT: u16 = 8473;

/// HTTP Server Configuration
pub struct HttpServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HTTP_HOST.to_string(),
            port: DEFAULT_HTTP_PORT,
        }
    }
}

/// Serve the routes until `shutdown` resolves
pub async fn serve(
    config: HttpServerConfig,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), String> {
    let addr = format!("{}:{}", config.host, config.port);

    info!(
        host = %config.host,
        port = %config.port,
        "Starting HTTP server"
    );

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("Failed to bind {}: {}", addr, e))?;

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| format!("HTTP server error: {}", e))
}
