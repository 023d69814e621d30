//! Liveness and readiness handlers for the HTTP transport.

use crate::config::ServerConfig;
use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub kernel_backend: String,
    pub active_sessions: usize,
    pub operations_total: u64,
    pub timestamp: i64,
}

pub struct HealthChecker {
    config: Arc<ServerConfig>,
    state: Arc<AppState>,
}

impl HealthChecker {
    pub fn new(config: Arc<ServerConfig>, state: Arc<AppState>) -> Self {
        HealthChecker { config, state }
    }

    pub fn report(&self) -> HealthReport {
        HealthReport {
            status: HealthStatus::Healthy,
            service: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            kernel_backend: self.config.kernel_backend.to_string(),
            active_sessions: self.state.sessions().active_count(),
            operations_total: self.state.operation_count(),
            timestamp: crate::model::timestamp_now(),
        }
    }
}

/// `/health`: process is up.
pub async fn liveness_handler(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    let report = checker.report();
    (report.status.status_code(), Json(report))
}

/// `/ready`: serving traffic. Session state is in-memory, so readiness
/// follows liveness; the endpoint exists for orchestrators that probe both.
pub async fn readiness_handler(State(checker): State<Arc<HealthChecker>>) -> impl IntoResponse {
    let report = checker.report();
    (report.status.status_code(), Json(report))
}
