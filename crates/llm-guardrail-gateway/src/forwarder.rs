//! Upstream forwarder.
//!
//! Sends the client's request body to the configured model with the target
//! model name and credential substituted. Everything else passes through.
//! A transient failure is retried once, and only before any response has
//! been handed to the caller.

use crate::settings::UpstreamSettings;
use crate::telemetry;
use llm_guardrail_core::{GuardrailError, UpstreamModelConfig};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

pub struct Forwarder {
    client: reqwest::Client,
    response_timeout: Duration,
    stream_idle_timeout: Duration,
    retry_backoff: Duration,
}

impl Forwarder {
    pub fn new(settings: &UpstreamSettings) -> Result<Self, GuardrailError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(settings.connect_timeout_ms))
            .build()
            .map_err(|e| GuardrailError::Config(format!("Failed to build upstream client: {e}")))?;
        Ok(Self {
            client,
            response_timeout: Duration::from_secs(settings.response_timeout_secs),
            stream_idle_timeout: Duration::from_secs(settings.stream_idle_timeout_secs),
            retry_backoff: Duration::from_millis(settings.retry_backoff_ms),
        })
    }

    /// Time allowed for headers, and again for a buffered body.
    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        self.stream_idle_timeout
    }

    /// Forward `body` to `upstream`'s chat-completions endpoint.
    ///
    /// Non-success statuses other than 502/503/504 are returned as-is for the
    /// caller to relay.
    pub async fn send(
        &self,
        upstream: &UpstreamModelConfig,
        body: &Value,
    ) -> Result<reqwest::Response, GuardrailError> {
        let url = endpoint(&upstream.base_url);
        let mut body = body.clone();
        body["model"] = Value::String(upstream.target_model().to_string());

        match self.attempt(&url, upstream, &body).await {
            Ok(resp) => Ok(resp),
            Err(Attempt::Transient(reason)) => {
                warn!(model = %upstream.model_name, %reason, "Transient upstream failure, retrying once");
                telemetry::record_upstream_retry();
                tokio::time::sleep(self.retry_backoff).await;
                match self.attempt(&url, upstream, &body).await {
                    Ok(resp) => Ok(resp),
                    Err(Attempt::Transient(reason)) | Err(Attempt::Fatal(reason)) => {
                        Err(GuardrailError::Upstream(reason))
                    }
                }
            }
            Err(Attempt::Fatal(reason)) => Err(GuardrailError::Upstream(reason)),
        }
    }

    async fn attempt(
        &self,
        url: &str,
        upstream: &UpstreamModelConfig,
        body: &Value,
    ) -> Result<reqwest::Response, Attempt> {
        let mut request = self.client.post(url).json(body);
        if let Some(key) = &upstream.api_key {
            request = request.bearer_auth(key);
        }

        let resp = match tokio::time::timeout(self.response_timeout, request.send()).await {
            Err(_) => return Err(Attempt::Transient("timed out waiting for upstream".into())),
            Ok(Err(e)) if e.is_connect() || e.is_timeout() => {
                return Err(Attempt::Transient(format!("connection failed: {e}")))
            }
            Ok(Err(e)) => return Err(Attempt::Fatal(format!("request failed: {e}"))),
            Ok(Ok(resp)) => resp,
        };

        let status = resp.status();
        if is_transient_status(status) {
            return Err(Attempt::Transient(format!("upstream returned {status}")));
        }
        debug!(model = %upstream.model_name, status = status.as_u16(), "Upstream responded");
        Ok(resp)
    }
}

enum Attempt {
    Transient(String),
    Fatal(String),
}

fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

/// `{base}/chat/completions`, tolerating a trailing slash.
pub fn endpoint(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}
