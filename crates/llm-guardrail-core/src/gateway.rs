//! GuardrailCore - the single entry point for request enforcement.
//!
//! Wires the authenticator, rate limiter, detection orchestrator, ban engine
//! and detection log sink around shared config and counter stores. Serving
//! layers call it in request order:
//! [`authenticate`](GuardrailCore::authenticate) →
//! [`admit`](GuardrailCore::admit) →
//! [`check_input`](GuardrailCore::check_input) → upstream →
//! [`check_output`](GuardrailCore::check_output).

use crate::auth::{Authenticator, RequestContext};
use crate::ban::BanEngine;
use crate::circuit_breaker::CircuitState;
use crate::classifier::{ChatTurn, RiskClassifier};
use crate::credential::KeyHasher;
use crate::detection::{DetectionOptions, DetectionOrchestrator, DetectionResult};
use crate::error::GuardrailError;
use crate::knowledge::Embedder;
use crate::log_sink::{DetectionEvent, DetectionLogSink, NullLogSink};
use crate::model::Direction;
use crate::rate_limit::RateLimiter;
use crate::snapshot::SnapshotCache;
use crate::store::{ConfigStore, InMemorySharedStore, SharedStore};
use std::sync::Arc;
use tracing::{error, warn};

/// Enforcement facade shared by every request handler.
///
/// # Example
///
/// ```rust,ignore
/// let core = GuardrailCore::builder()
///     .with_pepper("pepper")
///     .with_config_store(store)
///     .with_classifier(classifier)
///     .build()?;
///
/// let ctx = core.authenticate(Some("Bearer sk-guard-..."), Some("user-1")).await?;
/// core.admit(&ctx).await?;
/// let verdict = core.check_input(&ctx, "hello", &[]).await?;
/// ```
pub struct GuardrailCore {
    authenticator: Authenticator,
    limiter: RateLimiter,
    detector: DetectionOrchestrator,
    bans: Arc<BanEngine>,
    cache: Arc<SnapshotCache>,
    shared: Arc<dyn SharedStore>,
    sink: Arc<dyn DetectionLogSink>,
}

impl GuardrailCore {
    pub fn builder() -> GuardrailCoreBuilder {
        GuardrailCoreBuilder::new()
    }

    /// Resolve the caller. See [`Authenticator::authenticate`].
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
        end_user_id: Option<&str>,
    ) -> Result<RequestContext, GuardrailError> {
        self.authenticator
            .authenticate(authorization, end_user_id)
            .await
    }

    /// Count the request against the tenant's limit.
    pub async fn admit(&self, ctx: &RequestContext) -> Result<(), GuardrailError> {
        self.limiter
            .check(&ctx.tenant.id, ctx.tenant.rate_limit_rps)
            .await
            .into_result()
    }

    /// [`admit`](Self::admit) inside the window of `epoch_second`.
    pub async fn admit_at(&self, ctx: &RequestContext, epoch_second: i64) -> Result<(), GuardrailError> {
        self.limiter
            .check_at(&ctx.tenant.id, ctx.tenant.rate_limit_rps, epoch_second)
            .await
            .into_result()
    }

    /// Screen user input before it is forwarded.
    pub async fn check_input(
        &self,
        ctx: &RequestContext,
        text: &str,
        context: &[ChatTurn],
    ) -> Result<DetectionResult, GuardrailError> {
        self.detect(ctx, Direction::Input, text, context).await
    }

    /// Screen model output. `context` carries the conversation that produced it.
    pub async fn check_output(
        &self,
        ctx: &RequestContext,
        text: &str,
        context: &[ChatTurn],
    ) -> Result<DetectionResult, GuardrailError> {
        self.detect(ctx, Direction::Output, text, context).await
    }

    /// Run detection, emit the log event and feed the ban engine.
    pub async fn detect(
        &self,
        ctx: &RequestContext,
        direction: Direction,
        text: &str,
        context: &[ChatTurn],
    ) -> Result<DetectionResult, GuardrailError> {
        let result = self.screen(ctx, direction, text, context).await?;
        self.record(ctx, &result).await;
        Ok(result)
    }

    /// Detection without side effects. Callers that screen the same output
    /// several times (streaming checkpoints) pass the final verdict to
    /// [`record`](Self::record) once.
    pub async fn screen(
        &self,
        ctx: &RequestContext,
        direction: Direction,
        text: &str,
        context: &[ChatTurn],
    ) -> Result<DetectionResult, GuardrailError> {
        self.detector
            .detect(&ctx.snapshot, direction, text, context)
            .await
    }

    /// Emit the detection log event and count the verdict toward a ban.
    pub async fn record(&self, ctx: &RequestContext, result: &DetectionResult) {
        self.sink.emit(DetectionEvent::from_result(
            result,
            &ctx.request_id,
            ctx.tenant_id(),
            ctx.config_set_id(),
            ctx.end_user_id.as_deref(),
        ));

        if let (Some(user), Some(policy)) = (&ctx.end_user_id, &ctx.snapshot.ban_policy) {
            if let Err(e) = self
                .bans
                .observe(policy, ctx.tenant_id(), user, result.overall_risk_level)
                .await
            {
                error!(tenant_id = %ctx.tenant_id(), end_user_id = %user, error = %e, "Failed to record ban event");
            }
        }
    }

    /// Administrative unban.
    pub async fn unban(&self, tenant_id: &str, end_user_id: &str) -> Result<bool, GuardrailError> {
        self.bans.unban(tenant_id, end_user_id).await
    }

    /// Drop all cached snapshots.
    pub fn invalidate_snapshots(&self) {
        self.cache.invalidate(None);
    }

    /// Readiness of the shared counter store.
    pub async fn health_check(&self) -> Result<(), GuardrailError> {
        self.shared.health_check().await
    }

    pub fn classifier_state(&self) -> CircuitState {
        self.detector.breaker().state()
    }
}

/// Builder for [`GuardrailCore`].
pub struct GuardrailCoreBuilder {
    pepper: String,
    config_store: Option<Arc<dyn ConfigStore>>,
    shared_store: Option<Arc<dyn SharedStore>>,
    classifier: Option<Arc<dyn RiskClassifier>>,
    embedder: Option<Arc<dyn Embedder>>,
    sink: Option<Arc<dyn DetectionLogSink>>,
    options: DetectionOptions,
}

impl GuardrailCoreBuilder {
    fn new() -> Self {
        Self {
            pepper: String::new(),
            config_store: None,
            shared_store: None,
            classifier: None,
            embedder: None,
            sink: None,
            options: DetectionOptions::default(),
        }
    }

    /// Pepper for API key digests (required).
    pub fn with_pepper(mut self, pepper: impl Into<String>) -> Self {
        self.pepper = pepper.into();
        self
    }

    /// Config read store (required).
    pub fn with_config_store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.config_store = Some(store);
        self
    }

    /// Shared counter store. Defaults to the single-process in-memory store.
    pub fn with_shared_store(mut self, store: Arc<dyn SharedStore>) -> Self {
        self.shared_store = Some(store);
        self
    }

    /// External classifier (required).
    pub fn with_classifier(mut self, classifier: Arc<dyn RiskClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Embedder for knowledge answers. Without one, templates are used.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Detection log sink. Defaults to discarding events.
    pub fn with_log_sink(mut self, sink: Arc<dyn DetectionLogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_detection_options(mut self, options: DetectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Build the GuardrailCore instance.
    pub fn build(self) -> Result<GuardrailCore, GuardrailError> {
        let hasher = KeyHasher::new(&self.pepper)?;
        let config_store = self
            .config_store
            .ok_or_else(|| GuardrailError::Config("a config store is required".to_string()))?;
        let classifier = self
            .classifier
            .ok_or_else(|| GuardrailError::Config("a classifier is required".to_string()))?;
        let shared: Arc<dyn SharedStore> = match self.shared_store {
            Some(store) => store,
            None => {
                warn!("Using in-memory counter store; rate limits and bans are per-process only");
                Arc::new(InMemorySharedStore::new())
            }
        };

        let cache = Arc::new(SnapshotCache::new(Arc::clone(&config_store)));
        let bans = Arc::new(BanEngine::new(Arc::clone(&shared)));

        Ok(GuardrailCore {
            authenticator: Authenticator::new(
                hasher,
                config_store,
                Arc::clone(&cache),
                Arc::clone(&bans),
            ),
            limiter: RateLimiter::new(Arc::clone(&shared)),
            detector: DetectionOrchestrator::new(classifier, self.embedder, self.options),
            bans,
            cache,
            shared,
            sink: self.sink.unwrap_or_else(|| Arc::new(NullLogSink)),
        })
    }
}
