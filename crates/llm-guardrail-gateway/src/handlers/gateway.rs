//! Gateway mode: a screening reverse proxy for chat completions.
//!
//! 1. Screen the last user message. A block answers with the substitution
//!    in the requested shape; DLP matches rewrite the forwarded message.
//! 2. Forward to the upstream resolved from the requested model.
//! 3. Streams go through the [`StreamInterceptor`]; buffered responses are
//!    screened whole before anything is released.

use crate::error::ApiError;
use crate::interceptor::StreamInterceptor;
use crate::models::chat::{new_completion_id, rewrite_message};
use crate::models::{ChatCompletion, ChatCompletionChunk, ChatRequestView};
use crate::provider::ProviderAdapter;
use crate::sse;
use crate::state::AppState;
use crate::telemetry;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use llm_guardrail_core::policy::DEFAULT_ANSWER;
use llm_guardrail_core::{DetectionResult, GuardrailError, RequestContext};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

pub const REQUEST_ID_HEADER: &str = "x-guardrail-request-id";

/// `POST /v1/gateway/chat/completions` and `POST /v1/chat/completions`
pub async fn chat_completions(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let mut body: Value = serde_json::from_slice(&body)
        .map_err(|e| GuardrailError::InvalidRequest(format!("Invalid JSON body: {e}")))?;
    let view = ChatRequestView::parse(&body)?;
    let upstream = ctx
        .snapshot
        .upstream(&view.model)
        .cloned()
        .ok_or_else(|| GuardrailError::ModelNotFound(view.model.clone()))?;

    if let Some((text, context)) = view.input() {
        let verdict =
            telemetry::observe_detection(state.core.check_input(&ctx, text, context)).await?;
        if verdict.is_blocking() && upstream.block_on_input_risk {
            info!(
                request_id = %ctx.request_id,
                detection_id = %verdict.id,
                risk_level = %verdict.overall_risk_level,
                "Input blocked"
            );
            telemetry::record_substitution("input");
            return Ok(substitution(&ctx, &view, &verdict));
        }
        if let (Some(anonymized), Some(index)) = (&verdict.anonymized_text, view.last_user_index()) {
            rewrite_message(&mut body, index, anonymized);
        }
    }

    let resp = state.forwarder.send(&upstream, &body).await?;
    let status = resp.status();
    if !status.is_success() {
        return relay_error(&state, &ctx, resp).await;
    }

    if view.stream {
        let interceptor = StreamInterceptor::new(
            Arc::clone(&state.core),
            ctx.clone(),
            &upstream,
            &view.model,
            view.messages.clone(),
        )
        .with_idle_timeout(state.forwarder.stream_idle_timeout());
        let body = interceptor.spawn(resp.bytes_stream()).into_body();
        return Ok(event_stream(&ctx, body));
    }

    let raw = read_body(&state, resp).await?;
    let payload = String::from_utf8_lossy(&raw);
    let adapter = ProviderAdapter::new(upstream.provider, upstream.enable_reasoning_detection);
    let extracted = adapter.message_text(&payload);
    let text = adapter.detection_text(&extracted);
    if text.is_empty() {
        return Ok(json_bytes(&ctx, status, raw));
    }

    let verdict =
        telemetry::observe_detection(state.core.check_output(&ctx, &text, &view.messages)).await?;
    if verdict.is_blocking() && upstream.block_on_output_risk {
        info!(
            request_id = %ctx.request_id,
            detection_id = %verdict.id,
            risk_level = %verdict.overall_risk_level,
            "Output blocked"
        );
        telemetry::record_substitution("output");
        return Ok(substitution(&ctx, &view, &verdict));
    }

    // Only visible content is rewritten; reasoning stays as returned.
    if let Some(anonymized) = verdict.anonymized_text.as_deref() {
        if text == extracted.content {
            if let Ok(mut response) = serde_json::from_slice::<Value>(&raw) {
                response["choices"][0]["message"]["content"] = Value::String(anonymized.to_string());
                return Ok(with_request_id(&ctx, (status, Json(response)).into_response()));
            }
        }
    }
    Ok(json_bytes(&ctx, status, raw))
}

/// Answer with the substitution in the shape the client asked for.
fn substitution(ctx: &RequestContext, view: &ChatRequestView, verdict: &DetectionResult) -> Response {
    let answer = verdict.suggest_answer.as_deref().unwrap_or(DEFAULT_ANSWER);
    if !view.stream {
        let completion = ChatCompletion::substitution(&view.model, answer);
        return with_request_id(ctx, Json(completion).into_response());
    }

    let chunk = ChatCompletionChunk::substitution(&new_completion_id(), &view.model, answer);
    let mut frames = Vec::new();
    if let Ok(json) = serde_json::to_string(&chunk) {
        frames.extend_from_slice(&sse::data_frame(&json));
    }
    frames.extend_from_slice(&sse::done_frame());
    event_stream(ctx, Body::from(frames))
}

async fn read_body(state: &AppState, resp: reqwest::Response) -> Result<Bytes, GuardrailError> {
    tokio::time::timeout(state.forwarder.response_timeout(), resp.bytes())
        .await
        .map_err(|_| GuardrailError::Upstream("timed out reading upstream body".to_string()))?
        .map_err(|e| GuardrailError::Upstream(format!("failed to read upstream body: {e}")))
}

/// Pass an upstream error through. Credential rejections are replaced so
/// nothing about the upstream key reaches the client.
async fn relay_error(
    state: &AppState,
    ctx: &RequestContext,
    resp: reqwest::Response,
) -> Result<Response, ApiError> {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(GuardrailError::Upstream(format!("upstream rejected credentials ({status})")).into());
    }
    info!(request_id = %ctx.request_id, status = status.as_u16(), "Relaying upstream error");
    let raw = read_body(state, resp).await?;
    Ok(json_bytes(ctx, status, raw))
}

fn json_bytes(ctx: &RequestContext, status: StatusCode, raw: Bytes) -> Response {
    let response = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(raw))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    with_request_id(ctx, response)
}

fn event_stream(ctx: &RequestContext, body: Body) -> Response {
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    with_request_id(ctx, response)
}

fn with_request_id(ctx: &RequestContext, mut response: Response) -> Response {
    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
