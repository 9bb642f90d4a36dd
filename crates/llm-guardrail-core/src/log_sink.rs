//! Fire-and-forget detection log events.
//!
//! Emission never awaits. The default sink pushes onto a bounded channel that
//! a background task drains into structured `tracing` records with target
//! `detection_log`; when the channel is full the event is dropped and counted.

use crate::detection::{DetectionResult, HitSource};
use crate::model::{Action, Direction, RiskLevel};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// One detection, as recorded for audit.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionEvent {
    pub detection_id: String,
    pub request_id: String,
    pub tenant_id: String,
    pub config_set_id: String,
    pub end_user_id: Option<String>,
    pub direction: Direction,
    pub overall_risk_level: RiskLevel,
    pub suggest_action: Action,
    pub hit_source: HitSource,
    pub categories: Vec<String>,
    pub degraded: bool,
    pub at: DateTime<Utc>,
}

impl DetectionEvent {
    pub fn from_result(
        result: &DetectionResult,
        request_id: &str,
        tenant_id: &str,
        config_set_id: &str,
        end_user_id: Option<&str>,
    ) -> Self {
        Self {
            detection_id: result.id.clone(),
            request_id: request_id.to_string(),
            tenant_id: tenant_id.to_string(),
            config_set_id: config_set_id.to_string(),
            end_user_id: end_user_id.map(str::to_string),
            direction: result.direction,
            overall_risk_level: result.overall_risk_level,
            suggest_action: result.suggest_action,
            hit_source: result.hit_source,
            categories: result.all_categories(),
            degraded: result.degraded,
            at: Utc::now(),
        }
    }
}

/// Destination for detection events. Implementations must not block.
pub trait DetectionLogSink: Send + Sync {
    fn emit(&self, event: DetectionEvent);
}

/// Sink that discards everything.
pub struct NullLogSink;

impl DetectionLogSink for NullLogSink {
    fn emit(&self, _event: DetectionEvent) {}
}

/// Bounded channel drained into `tracing`.
pub struct TracingLogSink {
    tx: mpsc::Sender<DetectionEvent>,
    dropped: Arc<AtomicU64>,
}

impl TracingLogSink {
    /// Create the sink and spawn its drain task. Must be called inside a
    /// Tokio runtime.
    pub fn spawn(capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<DetectionEvent>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                info!(
                    target: "detection_log",
                    detection_id = %event.detection_id,
                    request_id = %event.request_id,
                    tenant_id = %event.tenant_id,
                    config_set_id = %event.config_set_id,
                    end_user_id = event.end_user_id.as_deref().unwrap_or(""),
                    direction = %event.direction,
                    risk_level = %event.overall_risk_level,
                    action = %event.suggest_action,
                    hit_source = ?event.hit_source,
                    categories = ?event.categories,
                    degraded = event.degraded,
                    at = %event.at,
                    "detection"
                );
            }
        });
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Events dropped because the channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl DetectionLogSink for TracingLogSink {
    fn emit(&self, event: DetectionEvent) {
        if self.tx.try_send(event).is_err() {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(dropped_total = total, "Detection log channel full, event dropped");
        }
    }
}
