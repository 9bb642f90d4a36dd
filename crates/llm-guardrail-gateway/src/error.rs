//! HTTP error envelope.
//!
//! Every failure is rendered as `{"error": {"message", "type", "code"}}`.
//! Server-side faults are logged with their detail and returned with a
//! generic message.

use crate::telemetry;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use llm_guardrail_core::GuardrailError;
use serde_json::json;
use tracing::{error, warn};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Guardrail(#[from] GuardrailError),

    #[error("Admin API is disabled")]
    AdminDisabled,

    #[error("Invalid admin token")]
    AdminUnauthorized,

    #[error("Metrics are disabled")]
    MetricsDisabled,

    #[error("Too many requests")]
    IngressLimited,

    #[error("Request body too large")]
    PayloadTooLarge,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Guardrail(e) => {
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ApiError::AdminDisabled | ApiError::MetricsDisabled => StatusCode::NOT_FOUND,
            ApiError::AdminUnauthorized => StatusCode::UNAUTHORIZED,
            ApiError::IngressLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Guardrail(e) => e.code(),
            ApiError::AdminDisabled | ApiError::MetricsDisabled => "not_found",
            ApiError::AdminUnauthorized => "invalid_admin_token",
            ApiError::IngressLimited => "ingress_rate_limited",
            ApiError::PayloadTooLarge => "payload_too_large",
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::Guardrail(e) => e.error_type(),
            ApiError::AdminDisabled | ApiError::MetricsDisabled | ApiError::PayloadTooLarge => {
                "invalid_request_error"
            }
            ApiError::AdminUnauthorized => "authentication_error",
            ApiError::IngressLimited => "rate_limit_error",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Guardrail(e) => e.public_message(),
            other => other.to_string(),
        }
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ApiError::Guardrail(GuardrailError::RateLimited {
                retry_after_secs, ..
            }) => Some(*retry_after_secs),
            ApiError::IngressLimited => Some(1),
            _ => None,
        }
    }

    /// JSON body of the envelope.
    pub fn body(&self) -> serde_json::Value {
        json!({
            "error": {
                "message": self.message(),
                "type": self.error_type(),
                "code": self.code(),
            }
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::Guardrail(e) if e.is_system_failure() => {
                error!(code = self.code(), error = %e, "Request failed");
            }
            _ => warn!(code = self.code(), status = status.as_u16(), "Request rejected"),
        }
        telemetry::record_rejection(self.code());

        let retry_after = self.retry_after_secs();
        let mut response = (status, Json(self.body())).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
