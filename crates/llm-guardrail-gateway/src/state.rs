//! Shared application state and startup wiring.

use crate::forwarder::Forwarder;
use crate::settings::{Settings, StoreBackend};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use llm_guardrail_core::detection::DetectionOptions;
use llm_guardrail_core::{
    GuardrailCore, GuardrailError, HttpClassifier, HttpEmbedder, InMemoryConfigStore,
    InMemorySharedStore, KeyHasher, SharedStore, TracingLogSink,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Process-wide ingress limiter.
pub type IngressLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Admin bearer token, kept as a digest.
#[derive(Clone)]
pub struct AdminGuard {
    hasher: KeyHasher,
    digest: String,
}

impl AdminGuard {
    pub fn new(hasher: KeyHasher, token: &str) -> Result<Self, GuardrailError> {
        let digest = hasher.digest(token)?;
        Ok(Self { hasher, digest })
    }

    pub fn verify(&self, token: &str) -> bool {
        self.hasher.verify(token, &self.digest)
    }
}

/// Policy file backing the reloadable in-memory config store.
#[derive(Clone)]
pub struct PolicySource {
    pub store: Arc<InMemoryConfigStore>,
    pub path: Option<PathBuf>,
}

#[derive(Clone)]
pub struct AppState {
    pub core: Arc<GuardrailCore>,
    pub forwarder: Arc<Forwarder>,
    pub policy: Option<PolicySource>,
    pub admin: Option<AdminGuard>,
    pub ingress: Option<Arc<IngressLimiter>>,
    pub metrics: Option<PrometheusHandle>,
    pub body_limit: usize,
}

impl AppState {
    pub fn new(core: Arc<GuardrailCore>, forwarder: Arc<Forwarder>) -> Self {
        Self {
            core,
            forwarder,
            policy: None,
            admin: None,
            ingress: None,
            metrics: None,
            body_limit: 10 * 1024 * 1024,
        }
    }

    pub fn with_policy(mut self, policy: PolicySource) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_admin(mut self, admin: AdminGuard) -> Self {
        self.admin = Some(admin);
        self
    }

    /// Enable the ingress guard. `rps == 0` leaves it disabled.
    pub fn with_ingress(mut self, rps: u32, burst: u32) -> Self {
        self.ingress = NonZeroU32::new(rps).map(|rps| {
            let burst = NonZeroU32::new(burst).unwrap_or(rps);
            Arc::new(RateLimiter::direct(Quota::per_second(rps).allow_burst(burst)))
        });
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    /// Build the full state from settings. Must run inside a Tokio runtime.
    pub async fn from_settings(settings: &Settings) -> Result<Self, GuardrailError> {
        let hasher = KeyHasher::new(&settings.credentials.pepper)?;

        let document = settings
            .policy
            .load()
            .map_err(|e| GuardrailError::Config(format!("Failed to load policy: {e}")))?;
        if settings.policy.path.is_none() {
            warn!("No policy file configured; every API key will be rejected");
        }
        let config_store = Arc::new(InMemoryConfigStore::new(document, hasher.clone())?);

        let classifier = HttpClassifier::new(
            &settings.classifier.base_url,
            settings.classifier.api_key.clone(),
            settings.classifier.timeout(),
        )?;

        let mut builder = GuardrailCore::builder()
            .with_pepper(settings.credentials.pepper.clone())
            .with_config_store(config_store.clone())
            .with_classifier(Arc::new(classifier))
            .with_shared_store(shared_store(settings).await?)
            .with_log_sink(Arc::new(TracingLogSink::spawn(
                settings.logging.detection_log_capacity,
            )))
            .with_detection_options(DetectionOptions {
                classifier_timeout: settings.classifier.timeout(),
                breaker_failure_threshold: settings.classifier.breaker_failure_threshold,
                breaker_cool_down: Duration::from_secs(settings.classifier.breaker_cool_down_secs),
            });
        if let Some(embedder) = &settings.embedder {
            builder = builder.with_embedder(Arc::new(HttpEmbedder::new(
                &embedder.base_url,
                embedder.model.clone(),
                embedder.api_key.clone(),
                Duration::from_millis(embedder.timeout_ms),
            )?));
        }

        let mut state = AppState::new(
            Arc::new(builder.build()?),
            Arc::new(Forwarder::new(&settings.upstream)?),
        )
        .with_policy(PolicySource {
            store: config_store,
            path: settings.policy.path.clone(),
        })
        .with_ingress(settings.server.ingress_rps, settings.server.ingress_burst)
        .with_body_limit(settings.server.body_limit_bytes);

        match settings.credentials.admin_token.as_deref() {
            Some(token) if !token.is_empty() => {
                state = state.with_admin(AdminGuard::new(hasher, token)?);
            }
            _ => info!("No admin token configured; admin routes disabled"),
        }
        Ok(state)
    }
}

async fn shared_store(settings: &Settings) -> Result<Arc<dyn SharedStore>, GuardrailError> {
    match settings.store.backend {
        StoreBackend::Memory => {
            warn!("Using in-memory counter store; rate limits and bans are per-process only");
            let store = Arc::new(InMemorySharedStore::new());
            let purge = Arc::clone(&store);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(PURGE_INTERVAL);
                loop {
                    ticker.tick().await;
                    purge.purge_expired();
                }
            });
            Ok(store)
        }
        #[cfg(feature = "redis")]
        StoreBackend::Redis => {
            let store = llm_guardrail_core::RedisSharedStore::connect(&settings.store.redis_url).await?;
            info!("Connected to Redis counter store");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        StoreBackend::Redis => Err(GuardrailError::Config(
            "built without the `redis` feature".to_string(),
        )),
    }
}
