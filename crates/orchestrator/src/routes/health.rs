//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Whether the broker connection is currently usable.
    pub broker_ready: bool,
}

/// GET /health: Reports liveness and broker readiness.
///
/// The service stays up while the broker reconnects, so a lost broker shows
/// as `degraded` rather than an error status.
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let broker_ready = state.transport.is_ready();
    Json(HealthResponse {
        status: if broker_ready { "ok" } else { "degraded" },
        broker_ready,
    })
}
