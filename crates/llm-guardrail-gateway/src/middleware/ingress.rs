//! Process-local flood guard.
//!
//! Independent of the shared per-tenant limiter: it bounds what one worker
//! accepts before any credential lookup. No-op when disabled.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

pub async fn ingress_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(limiter) = &state.ingress {
        if limiter.check().is_err() {
            return ApiError::IngressLimited.into_response();
        }
    }
    next.run(request).await
}
