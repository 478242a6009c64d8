use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use microsight_shared::types::HealthResponse;

use crate::AppState;

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse::healthy("microsight-auth", env!("CARGO_PKG_VERSION")))
}

/// Prometheus exposition; empty when no recorder is installed.
pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state
        .metrics_handle
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default()
}
