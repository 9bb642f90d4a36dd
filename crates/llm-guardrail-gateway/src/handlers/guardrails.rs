//! Direct API-call mode.

use crate::error::ApiError;
use crate::models::{GuardrailsRequest, GuardrailsResponse};
use crate::state::AppState;
use crate::telemetry;
use axum::body::Bytes;
use axum::extract::State;
use axum::{Extension, Json};
use llm_guardrail_core::{GuardrailError, RequestContext};

/// `POST /v1/guardrails`
///
/// A conversation ending with an `assistant` message screens that answer
/// as output, with earlier messages as context. Anything else screens the
/// last message as input.
pub async fn check_guardrails(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> Result<Json<GuardrailsResponse>, ApiError> {
    let request: GuardrailsRequest = serde_json::from_slice(&body)
        .map_err(|e| GuardrailError::InvalidRequest(format!("Invalid request body: {e}")))?;
    let output = request.is_output_check();
    let (last, context) = request
        .messages
        .split_last()
        .ok_or_else(|| GuardrailError::InvalidRequest("'messages' must not be empty".to_string()))?;

    let result = if output {
        telemetry::observe_detection(state.core.check_output(&ctx, &last.content, context)).await?
    } else {
        telemetry::observe_detection(state.core.check_input(&ctx, &last.content, context)).await?
    };
    Ok(Json(result.into()))
}
