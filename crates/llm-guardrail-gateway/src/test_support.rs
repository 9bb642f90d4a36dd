//! Shared fixtures for unit tests.

use async_trait::async_trait;
use llm_guardrail_core::classifier::ClassifyRequest;
use llm_guardrail_core::{
    ClassifierVerdict, DimensionScore, GuardrailCore, GuardrailError, InMemoryConfigStore,
    KeyHasher, PolicyDocument, RequestContext, RiskClassifier, RiskLevel,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const KEY: &str = "sk-guard-0123456789abcdef0123";
pub const PEPPER: &str = "test-pepper";
/// Word that makes [`TriggerClassifier`] report a violent-crime hit.
pub const TRIGGER: &str = "danger";

/// Flags any text containing [`TRIGGER`] as high-risk S5.
#[derive(Default)]
pub struct TriggerClassifier {
    calls: AtomicUsize,
}

impl TriggerClassifier {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RiskClassifier for TriggerClassifier {
    async fn classify(&self, request: &ClassifyRequest) -> Result<ClassifierVerdict, GuardrailError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut verdict = ClassifierVerdict::default();
        if request.text.contains(TRIGGER) {
            verdict.compliance = DimensionScore {
                risk_level: RiskLevel::HighRisk,
                categories: vec!["S5".to_string()],
                confidence: 0.99,
            };
        }
        Ok(verdict)
    }
}

/// Always unreachable.
pub struct DownClassifier;

#[async_trait]
impl RiskClassifier for DownClassifier {
    async fn classify(&self, _request: &ClassifyRequest) -> Result<ClassifierVerdict, GuardrailError> {
        Err(GuardrailError::DetectionUnavailable("connection refused".to_string()))
    }
}

/// One tenant with a default template, a blacklist, a whitelist, a ban
/// policy after three high-risk verdicts and one upstream model per provider
/// flavour.
pub fn document(upstream_base: &str) -> PolicyDocument {
    serde_json::from_value(serde_json::json!({
        "tenants": [{"id": "t1", "rate_limit_rps": 0}],
        "config_sets": [{"id": "cs1", "tenant_id": "t1", "is_default": true}],
        "api_keys": [{"id": "k1", "tenant_id": "t1", "key": KEY}],
        "blacklists": [{"id": "bl1", "tenant_id": "t1", "name": "weapons",
                        "keywords": ["bomb-making"]}],
        "whitelists": [{"id": "wl1", "tenant_id": "t1", "name": "research",
                        "keywords": ["approved research"]}],
        "response_templates": [{"id": "rt1", "config_set_id": "cs1",
                                "content": "I can't discuss that."}],
        "ban_policies": [{"config_set_id": "cs1", "enabled": true, "trigger_count": 3,
                          "time_window_minutes": 10, "ban_duration_minutes": 60}],
        "upstream_models": [
            {"id": "m1", "tenant_id": "t1", "model_name": "gpt-test",
             "base_url": upstream_base, "stream_chunk_size": 50},
            {"id": "m2", "tenant_id": "t1", "model_name": "passive",
             "base_url": upstream_base, "stream_chunk_size": 50,
             "block_on_input_risk": false, "block_on_output_risk": false},
            {"id": "m3", "tenant_id": "t1", "model_name": "reasoner",
             "base_url": upstream_base, "provider": "deepseek", "stream_chunk_size": 50},
            {"id": "m4", "tenant_id": "t1", "model_name": "reasoner-unscanned",
             "base_url": upstream_base, "provider": "deepseek", "stream_chunk_size": 50,
             "enable_reasoning_detection": false}
        ]
    }))
    .unwrap()
}

pub fn core_with(classifier: Arc<dyn RiskClassifier>, upstream_base: &str) -> Arc<GuardrailCore> {
    let store = InMemoryConfigStore::new(
        document(upstream_base),
        KeyHasher::new(PEPPER).unwrap(),
    )
    .unwrap();
    Arc::new(
        GuardrailCore::builder()
            .with_pepper(PEPPER)
            .with_config_store(Arc::new(store))
            .with_classifier(classifier)
            .build()
            .unwrap(),
    )
}

pub async fn context(core: &GuardrailCore) -> RequestContext {
    core.authenticate(Some(&format!("Bearer {KEY}")), None)
        .await
        .unwrap()
}

pub async fn user_context(core: &GuardrailCore, end_user_id: &str) -> Result<RequestContext, GuardrailError> {
    core.authenticate(Some(&format!("Bearer {KEY}")), Some(end_user_id))
        .await
}
