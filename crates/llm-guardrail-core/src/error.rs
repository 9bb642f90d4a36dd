//! Guardrail error taxonomy.
//!
//! Every variant maps to a fixed HTTP status and a stable machine code so the
//! serving layer can render the chat-completion error envelope without
//! inspecting messages. Policy blocks are not errors; see
//! `StreamTermination` in the gateway crate for the streaming counterpart.

use chrono::{DateTime, Utc};

/// Errors that can occur while enforcing guardrails on a request.
#[derive(Debug, thiserror::Error)]
pub enum GuardrailError {
    /// Missing, malformed or unknown credential.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Inactive tenant or inactive key.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The end user has an active ban.
    #[error("End user banned until {until}: {reason}")]
    Banned {
        until: DateTime<Utc>,
        reason: String,
    },

    /// Tenant exceeded its request budget for the current window.
    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32, retry_after_secs: u64 },

    /// Neither the key nor the tenant yields a protection template.
    /// This is a deployment fault, not a client fault.
    #[error("Configuration resolution failed: {0}")]
    ConfigResolution(String),

    /// The external classifier is unreachable, timed out or its circuit is open.
    #[error("Detection unavailable: {0}")]
    DetectionUnavailable(String),

    /// The target model is unreachable or errored.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// No upstream model is configured under the requested name.
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// The request body could not be interpreted.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Shared store or config store failure.
    #[error("Store error: {0}")]
    Store(String),

    /// Invalid configuration detected while loading or building.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GuardrailError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            GuardrailError::Auth(_) => 401,
            GuardrailError::Forbidden(_) | GuardrailError::Banned { .. } => 403,
            GuardrailError::ModelNotFound(_) => 404,
            GuardrailError::InvalidRequest(_) => 400,
            GuardrailError::RateLimited { .. } => 429,
            GuardrailError::Upstream(_) => 502,
            GuardrailError::DetectionUnavailable(_) => 503,
            GuardrailError::ConfigResolution(_)
            | GuardrailError::Store(_)
            | GuardrailError::Config(_) => 500,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            GuardrailError::Auth(_) => "invalid_api_key",
            GuardrailError::Forbidden(_) => "account_inactive",
            GuardrailError::Banned { .. } => "end_user_banned",
            GuardrailError::RateLimited { .. } => "rate_limit_exceeded",
            GuardrailError::ConfigResolution(_) => "config_resolution_failed",
            GuardrailError::DetectionUnavailable(_) => "detection_unavailable",
            GuardrailError::Upstream(_) => "upstream_error",
            GuardrailError::ModelNotFound(_) => "model_not_found",
            GuardrailError::InvalidRequest(_) => "invalid_request",
            GuardrailError::Store(_) => "store_error",
            GuardrailError::Config(_) => "configuration_error",
        }
    }

    /// Error envelope `type` field.
    pub fn error_type(&self) -> &'static str {
        match self {
            GuardrailError::Auth(_) => "authentication_error",
            GuardrailError::Forbidden(_) | GuardrailError::Banned { .. } => "permission_error",
            GuardrailError::RateLimited { .. } => "rate_limit_error",
            GuardrailError::InvalidRequest(_) | GuardrailError::ModelNotFound(_) => {
                "invalid_request_error"
            }
            GuardrailError::DetectionUnavailable(_) => "detection_unavailable_error",
            GuardrailError::Upstream(_) => "upstream_error",
            GuardrailError::ConfigResolution(_)
            | GuardrailError::Store(_)
            | GuardrailError::Config(_) => "server_error",
        }
    }

    /// Message safe to return to clients.
    ///
    /// Server-side faults collapse to a generic sentence; their detail goes to
    /// the log only.
    pub fn public_message(&self) -> String {
        match self {
            GuardrailError::ConfigResolution(_)
            | GuardrailError::Store(_)
            | GuardrailError::Config(_) => "The guardrail service is misconfigured".to_string(),
            GuardrailError::DetectionUnavailable(_) => {
                "Content detection is temporarily unavailable".to_string()
            }
            GuardrailError::Upstream(_) => "The upstream model request failed".to_string(),
            other => other.to_string(),
        }
    }

    /// Whether this error reflects a system failure rather than a client or
    /// policy outcome.
    pub fn is_system_failure(&self) -> bool {
        self.status_code() >= 500
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for GuardrailError {
    fn from(e: redis::RedisError) -> Self {
        GuardrailError::Store(format!("Redis: {e}"))
    }
}
