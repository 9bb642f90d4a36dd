//! Tracing and Prometheus setup plus the gateway's metric names.

use crate::interceptor::StreamTermination;
use crate::settings::{LogFormat, LoggingSettings};
use llm_guardrail_core::{DetectionResult, GuardrailError};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

pub const REQUESTS_REJECTED: &str = "guardrail_requests_rejected_total";
pub const DETECTIONS: &str = "guardrail_detections_total";
pub const DETECTION_FAILURES: &str = "guardrail_detection_failures_total";
pub const DETECTION_DURATION: &str = "guardrail_detection_duration_seconds";
pub const STREAM_TERMINATIONS: &str = "guardrail_stream_terminations_total";
pub const UPSTREAM_RETRIES: &str = "guardrail_upstream_retries_total";
pub const SUBSTITUTIONS: &str = "guardrail_substitutions_total";

/// Install the global subscriber. `RUST_LOG` overrides the configured filter.
pub fn init_tracing(
    settings: &LoggingSettings,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.filter))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match settings.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    }
}

/// Install the global Prometheus recorder.
pub fn install_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

pub fn record_rejection(code: &'static str) {
    metrics::counter!(REQUESTS_REJECTED, "code" => code).increment(1);
}

pub fn record_detection(result: &DetectionResult, elapsed: Duration) {
    metrics::counter!(
        DETECTIONS,
        "direction" => result.direction.to_string(),
        "risk_level" => result.overall_risk_level.to_string(),
        "action" => result.suggest_action.to_string()
    )
    .increment(1);
    metrics::histogram!(DETECTION_DURATION).record(elapsed.as_secs_f64());
}

pub fn record_detection_failure() {
    metrics::counter!(DETECTION_FAILURES).increment(1);
}

/// Await a detection and record its verdict, latency or failure.
pub async fn observe_detection<F>(detection: F) -> Result<DetectionResult, GuardrailError>
where
    F: Future<Output = Result<DetectionResult, GuardrailError>>,
{
    let started = Instant::now();
    let outcome = detection.await;
    match &outcome {
        Ok(result) => record_detection(result, started.elapsed()),
        Err(GuardrailError::DetectionUnavailable(_)) => record_detection_failure(),
        Err(_) => {}
    }
    outcome
}

pub fn record_substitution(stage: &'static str) {
    metrics::counter!(SUBSTITUTIONS, "stage" => stage).increment(1);
}

pub fn record_stream_termination(termination: StreamTermination) {
    metrics::counter!(STREAM_TERMINATIONS, "kind" => termination.as_str()).increment(1);
}

pub fn record_upstream_retry() {
    metrics::counter!(UPSTREAM_RETRIES).increment(1);
}
