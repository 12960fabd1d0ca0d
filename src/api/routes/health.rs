//! Health Routes
//!
//! Health check endpoints for monitoring and orchestration.
//!
//! - GET /health/live - Liveness check (process is alive)
//! - GET /health/ready - Readiness check (reading store answers)
//! - GET /health - Full health status

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::{ConnectionCounts, HealthResponse};
use crate::api::state::AppState;

/// GET /health/live
///
/// Returns 200 if the process is alive, no dependency checks.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health/ready
///
/// Returns 200 once the reading store answers a count query.
pub async fn readiness(State(state): State<Arc<AppState>>) -> StatusCode {
    match state.store.count().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// GET /health
///
/// Full health status with component details. The relay keeps serving
/// sockets when the store is down, so that only degrades the status.
pub async fn full_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let readings = state.store.count().await.ok();
    let stats = state.registry.stats().await;

    let (status, store) = match readings {
        Some(_) => ("healthy", "ok"),
        None => ("degraded", "error"),
    };

    Json(HealthResponse {
        status: status.to_string(),
        store: store.to_string(),
        store_backend: state.store.backend().to_string(),
        readings,
        connections: ConnectionCounts {
            open: stats.open,
            devices: stats.devices,
            consumers: stats.consumers,
        },
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
