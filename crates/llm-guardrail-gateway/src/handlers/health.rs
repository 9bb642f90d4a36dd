//! Health, version and metrics endpoints.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

/// Basic health check
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

/// Liveness probe
pub async fn live() -> Json<serde_json::Value> {
    Json(json!({ "status": "alive" }))
}

/// Readiness probe: the shared counter store must answer.
pub async fn ready(State(state): State<AppState>) -> Response {
    let classifier = state.core.classifier_state().as_str();
    match state.core.health_check().await {
        Ok(()) => Json(json!({
            "status": "ready",
            "classifier_circuit": classifier,
        }))
        .into_response(),
        Err(e) => {
            warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "not_ready",
                    "classifier_circuit": classifier,
                })),
            )
                .into_response()
        }
    }
}

/// Version information
pub async fn version() -> Json<serde_json::Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Prometheus exposition.
pub async fn metrics(State(state): State<AppState>) -> Result<String, ApiError> {
    state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .ok_or(ApiError::MetricsDisabled)
}
