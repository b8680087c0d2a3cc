//! Health check endpoint handlers.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::app::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub exports: ExportsHealth,
    pub database: DatabaseHealth,
}

/// Job store and worker pool state.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ExportsHealth {
    pub enabled: bool,
    pub store: String,
    pub queue_depth: usize,
    pub running: usize,
    pub max_concurrency: usize,
}

/// Database health status. `configured` is false when running without Postgres.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseHealth {
    pub configured: bool,
    pub connected: bool,
    pub latency_ms: Option<u64>,
}

/// Simple status response for liveness probes.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
}

/// Full health check.
///
/// 503 only when a configured database cannot be reached.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = match &state.pool {
        Some(pool) => {
            let latency_ms = persistence::db::ping(pool).await;
            DatabaseHealth {
                configured: true,
                connected: latency_ms.is_some(),
                latency_ms,
            }
        }
        None => DatabaseHealth {
            configured: false,
            connected: false,
            latency_ms: None,
        },
    };

    let workers = state.exports.workers();
    let healthy = !database.configured || database.connected;
    let response = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        exports: ExportsHealth {
            enabled: state.config.exports.enabled,
            store: state.exports.store_mode().to_string(),
            queue_depth: workers.pending_len(),
            running: workers.running(),
            max_concurrency: workers.max_concurrency(),
        },
        database,
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

/// Liveness probe endpoint.
///
/// Returns 200 OK if the process is running.
pub async fn live() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "alive".to_string(),
    })
}
