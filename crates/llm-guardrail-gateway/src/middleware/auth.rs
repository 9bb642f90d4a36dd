//! Authentication and tenant admission.
//!
//! Runs on every guarded route:
//! - Buffers the body (bounded by the configured limit) to read `user`
//! - Falls back to the `x-end-user-id` header for the end-user identifier
//! - Resolves the bearer key into a [`RequestContext`], checking bans
//! - Counts the request against the tenant's shared rate limit
//! - Adds the context to request extensions
//!
//! Rejections happen before any detection or upstream work.

use crate::error::ApiError;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use llm_guardrail_core::RequestContext;
use serde::Deserialize;
use tracing::debug;

pub const END_USER_HEADER: &str = "x-end-user-id";

#[derive(Deserialize)]
struct EndUserField {
    #[serde(default)]
    user: Option<String>,
}

pub async fn auth_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, state.body_limit).await {
        Ok(bytes) => bytes,
        Err(_) => return ApiError::PayloadTooLarge.into_response(),
    };

    let authorization = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let end_user = serde_json::from_slice::<EndUserField>(&bytes)
        .ok()
        .and_then(|f| f.user)
        .or_else(|| {
            parts
                .headers
                .get(END_USER_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        });

    let ctx: RequestContext = match state
        .core
        .authenticate(authorization, end_user.as_deref())
        .await
    {
        Ok(ctx) => ctx,
        Err(e) => return ApiError::from(e).into_response(),
    };
    if let Err(e) = state.core.admit(&ctx).await {
        return ApiError::from(e).into_response();
    }

    debug!(
        request_id = %ctx.request_id,
        tenant_id = %ctx.tenant_id(),
        config_set_id = %ctx.config_set_id(),
        "Request admitted"
    );

    let mut request = Request::from_parts(parts, Body::from(bytes));
    request.extensions_mut().insert(ctx);
    next.run(request).await
}
