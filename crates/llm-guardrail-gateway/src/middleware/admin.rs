//! Admin token guard.
//!
//! When no admin token is configured the admin routes answer 404.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

pub async fn admin_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let guard = match &state.admin {
        Some(guard) => guard,
        None => return ApiError::AdminDisabled.into_response(),
    };

    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    if token.is_empty() || !guard.verify(token) {
        return ApiError::AdminUnauthorized.into_response();
    }

    next.run(request).await
}
