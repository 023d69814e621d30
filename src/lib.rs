pub mod config;
pub mod dispatch;
pub mod error;
pub mod graph;
pub mod health;
pub mod kernel;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod publish;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod state;
pub mod tools;

pub use config::{CliArgs, KernelBackend, ServerConfig, TransportKind};
pub use error::{CadError, CadResult, ErrorCode, to_mcp_error};
pub use logging::{LoggingConfig, init_logging};
pub use server::CadServer;
pub use shutdown::{ShutdownConfig, ShutdownCoordinator};

use anyhow::Result;
use axum::Router;
use rmcp::transport::streamable_http_server::{
    StreamableHttpService, session::local::LocalSessionManager,
};
use state::AppState;
use std::{future::IntoFuture, sync::Arc};
use tokio::net::TcpListener;

const HTTP_SERVICE_PATH: &str = "/mcp";

pub async fn run_server(config: ServerConfig) -> Result<()> {
    let config = Arc::new(config);
    let state = Arc::new(AppState::new(config.clone()));

    tracing::info!(
        transport = %config.transport,
        kernel = %config.kernel_backend,
        max_sessions = config.max_sessions,
        "starting CAD MCP server",
    );

    match config.transport {
        TransportKind::Stdio => {
            let server = CadServer::from_state(state);
            server.run_stdio().await
        }
        TransportKind::Http => run_stream_http_transport(config, state).await,
    }
}

/// Prometheus metrics endpoint handler.
async fn metrics_handler() -> (axum::http::StatusCode, String) {
    let metrics_text = metrics::METRICS.encode();
    (axum::http::StatusCode::OK, metrics_text)
}

async fn run_stream_http_transport(config: Arc<ServerConfig>, state: Arc<AppState>) -> Result<()> {
    let coordinator = Arc::new(ShutdownCoordinator::new(ShutdownConfig::default()));

    let service_state = state.clone();
    let service = StreamableHttpService::new(
        move || Ok(CadServer::from_state(service_state.clone())),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let health_checker = Arc::new(health::HealthChecker::new(config.clone(), state.clone()));

    let router = Router::new()
        .nest_service(HTTP_SERVICE_PATH, service)
        .route("/health", axum::routing::get(health::liveness_handler))
        .route("/ready", axum::routing::get(health::readiness_handler))
        .route("/metrics", axum::routing::get(metrics_handler))
        .with_state(health_checker);

    let listener = TcpListener::bind(config.http_bind_address).await?;
    let actual_addr = listener.local_addr()?;
    tracing::info!(transport = "http", bind = %actual_addr, path = HTTP_SERVICE_PATH, "listening");

    let shutdown_coordinator = coordinator.clone();
    let server_future = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_coordinator.wait_for_signal().await;
        })
        .into_future();

    let result = server_future.await;

    tracing::info!(
        active_sessions = state.sessions().active_count(),
        "server stopped"
    );
    result.map_err(anyhow::Error::from)
}
