//! Detection orchestrator.
//!
//! One call screens one piece of content in one direction:
//!
//! 1. keyword pre-filter (whitelist, then blacklist) may settle the verdict
//!    without calling the classifier
//! 2. otherwise the external classifier scores three dimensions, behind a
//!    circuit breaker and a per-call timeout
//! 3. each dimension is gated by category toggles and the active tier's
//!    confidence threshold
//! 4. the DLP scan is merged into the data dimension
//! 5. the overall level is the maximum over dimensions, and the template's
//!    action policy turns it into pass, replace or reject with an answer

use crate::circuit_breaker::CircuitBreaker;
use crate::classifier::{ChatTurn, ClassifierVerdict, ClassifyRequest, DimensionScore, RiskClassifier};
use crate::error::GuardrailError;
use crate::keywords::PrefilterOutcome;
use crate::knowledge::{best_match, Embedder};
use crate::model::{Action, ConfigSet, DetectionFailurePolicy, Direction, RiskCategory, RiskLevel};
use crate::policy::{derive_action, select_template, AnswerSource};
use crate::snapshot::ConfigSnapshot;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Gated result of one dimension.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DimensionResult {
    pub risk_level: RiskLevel,
    pub categories: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl DimensionResult {
    fn no_risk() -> Self {
        Self::default()
    }
}

/// What settled the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HitSource {
    None,
    Whitelist,
    Blacklist,
    Classifier,
    DataScan,
}

/// Verdict for one piece of content.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    pub id: String,
    pub direction: Direction,
    pub overall_risk_level: RiskLevel,
    pub suggest_action: Action,
    pub suggest_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_source: Option<AnswerSource>,
    pub security: DimensionResult,
    pub compliance: DimensionResult,
    pub data: DimensionResult,
    pub hit_source: HitSource,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hit_lists: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anonymized_text: Option<String>,
    /// Set when the classifier failed and the template fails open.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

impl DetectionResult {
    /// Whether the content should be blocked or substituted.
    pub fn is_blocking(&self) -> bool {
        self.suggest_action != Action::Pass
    }

    /// Hit categories across all dimensions.
    pub fn all_categories(&self) -> Vec<String> {
        self.security
            .categories
            .iter()
            .chain(&self.compliance.categories)
            .chain(&self.data.categories)
            .cloned()
            .collect()
    }
}

/// Tunables for the orchestrator.
#[derive(Debug, Clone)]
pub struct DetectionOptions {
    pub classifier_timeout: Duration,
    pub breaker_failure_threshold: u32,
    pub breaker_cool_down: Duration,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            classifier_timeout: Duration::from_secs(5),
            breaker_failure_threshold: 5,
            breaker_cool_down: Duration::from_secs(30),
        }
    }
}

/// Runs the detection pipeline against a config snapshot.
pub struct DetectionOrchestrator {
    classifier: Arc<dyn RiskClassifier>,
    embedder: Option<Arc<dyn Embedder>>,
    breaker: CircuitBreaker,
    timeout: Duration,
}

impl DetectionOrchestrator {
    pub fn new(
        classifier: Arc<dyn RiskClassifier>,
        embedder: Option<Arc<dyn Embedder>>,
        options: DetectionOptions,
    ) -> Self {
        Self {
            classifier,
            embedder,
            breaker: CircuitBreaker::new(
                options.breaker_failure_threshold,
                options.breaker_cool_down,
                1,
            ),
            timeout: options.classifier_timeout,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Screen `text`.
    ///
    /// # Errors
    ///
    /// [`GuardrailError::DetectionUnavailable`] when the classifier fails and
    /// the template is `fail_closed`.
    pub async fn detect(
        &self,
        snapshot: &ConfigSnapshot,
        direction: Direction,
        text: &str,
        context: &[ChatTurn],
    ) -> Result<DetectionResult, GuardrailError> {
        let cs = &snapshot.config_set;
        let id = format!("guardrails-{}", uuid::Uuid::new_v4().simple());

        match snapshot.keywords.evaluate(text) {
            PrefilterOutcome::Whitelisted { lists } => {
                debug!(config_set_id = %cs.id, %direction, ?lists, "Whitelist hit");
                return Ok(DetectionResult {
                    id,
                    direction,
                    overall_risk_level: RiskLevel::NoRisk,
                    suggest_action: Action::Pass,
                    suggest_answer: None,
                    answer_source: None,
                    security: DimensionResult::no_risk(),
                    compliance: DimensionResult::no_risk(),
                    data: DimensionResult::no_risk(),
                    hit_source: HitSource::Whitelist,
                    hit_lists: lists,
                    anonymized_text: None,
                    degraded: false,
                });
            }
            PrefilterOutcome::Blacklisted { lists, severity } => {
                debug!(config_set_id = %cs.id, %direction, ?lists, %severity, "Blacklist hit");
                let action = derive_action(cs, severity);
                let (answer, source) = if action == Action::Pass {
                    (None, None)
                } else {
                    let (a, s) = select_template(&snapshot.templates, &[], severity);
                    (Some(a), Some(s))
                };
                return Ok(DetectionResult {
                    id,
                    direction,
                    overall_risk_level: severity,
                    suggest_action: action,
                    suggest_answer: answer,
                    answer_source: source,
                    security: DimensionResult::no_risk(),
                    compliance: DimensionResult {
                        risk_level: severity,
                        categories: lists.clone(),
                        confidence: None,
                    },
                    data: DimensionResult::no_risk(),
                    hit_source: HitSource::Blacklist,
                    hit_lists: lists,
                    anonymized_text: None,
                    degraded: false,
                });
            }
            PrefilterOutcome::Unresolved => {}
        }

        let request = ClassifyRequest {
            direction,
            text: text.to_string(),
            context: context.to_vec(),
        };
        let (verdict, degraded) = match self.call_classifier(&request).await {
            Ok(v) => (v, false),
            Err(e) => match cs.on_detection_unavailable {
                DetectionFailurePolicy::FailClosed => return Err(e),
                DetectionFailurePolicy::FailOpen => {
                    warn!(config_set_id = %cs.id, error = %e, "Classifier unavailable, failing open");
                    (ClassifierVerdict::default(), true)
                }
            },
        };

        let threshold = cs.active_threshold();
        let security = gate_toggled(cs, &verdict.security, threshold);
        let compliance = gate_toggled(cs, &verdict.compliance, threshold);
        let mut data = gate(&verdict.data, threshold);
        let classifier_hit = security.risk_level > RiskLevel::NoRisk
            || compliance.risk_level > RiskLevel::NoRisk
            || data.risk_level > RiskLevel::NoRisk;

        let dlp = snapshot.dlp.scan(text, direction);
        if dlp.is_hit() {
            data.risk_level = data.risk_level.max(dlp.risk_level);
            for code in &dlp.categories {
                if !data.categories.contains(code) {
                    data.categories.push(code.clone());
                }
            }
        }

        let overall = security
            .risk_level
            .max(compliance.risk_level)
            .max(data.risk_level);
        let action = derive_action(cs, overall);

        let hit_source = if classifier_hit {
            HitSource::Classifier
        } else if dlp.is_hit() {
            HitSource::DataScan
        } else {
            HitSource::None
        };

        let (suggest_answer, answer_source) = if action == Action::Pass {
            (None, None)
        } else {
            let categories: Vec<RiskCategory> = security
                .categories
                .iter()
                .chain(&compliance.categories)
                .filter_map(|c| RiskCategory::parse(c))
                .collect();
            let (answer, source) = self.answer(snapshot, text, &categories, overall).await;
            (Some(answer), Some(source))
        };

        debug!(
            config_set_id = %cs.id,
            %direction,
            overall = %overall,
            action = %action,
            degraded,
            "Detection complete"
        );

        Ok(DetectionResult {
            id,
            direction,
            overall_risk_level: overall,
            suggest_action: action,
            suggest_answer,
            answer_source,
            security,
            compliance,
            data,
            hit_source,
            hit_lists: Vec::new(),
            anonymized_text: dlp.anonymized_text,
            degraded,
        })
    }

    async fn call_classifier(
        &self,
        request: &ClassifyRequest,
    ) -> Result<ClassifierVerdict, GuardrailError> {
        if !self.breaker.try_acquire() {
            return Err(GuardrailError::DetectionUnavailable(
                "classifier circuit open".to_string(),
            ));
        }
        let outcome = match tokio::time::timeout(self.timeout, self.classifier.classify(request)).await {
            Ok(result) => result,
            Err(_) => Err(GuardrailError::DetectionUnavailable(format!(
                "classifier timed out after {}ms",
                self.timeout.as_millis()
            ))),
        };
        match &outcome {
            Ok(_) => self.breaker.record_success(),
            Err(e) => {
                warn!(error = %e, "Classifier call failed");
                self.breaker.record_failure();
            }
        }
        outcome
    }

    /// Knowledge answer first, then the template chain.
    async fn answer(
        &self,
        snapshot: &ConfigSnapshot,
        text: &str,
        categories: &[RiskCategory],
        level: RiskLevel,
    ) -> (String, AnswerSource) {
        if let Some(embedder) = &self.embedder {
            if !snapshot.knowledge.is_empty() {
                match embedder.embed(text).await {
                    Ok(query) => {
                        if let Some((entry, score)) = best_match(
                            &snapshot.knowledge,
                            &query,
                            snapshot.config_set.knowledge_similarity_floor,
                            categories,
                        ) {
                            debug!(knowledge_id = %entry.id, score, "Knowledge answer selected");
                            return (entry.answer.clone(), AnswerSource::Knowledge);
                        }
                    }
                    Err(e) => warn!(error = %e, "Embedding failed, using templates"),
                }
            }
        }
        select_template(&snapshot.templates, categories, level)
    }
}

/// Confidence gate.
fn gate(score: &DimensionScore, threshold: f64) -> DimensionResult {
    if score.risk_level == RiskLevel::NoRisk || score.confidence < threshold {
        return DimensionResult {
            confidence: Some(score.confidence),
            ..DimensionResult::no_risk()
        };
    }
    DimensionResult {
        risk_level: score.risk_level,
        categories: score.categories.clone(),
        confidence: Some(score.confidence),
    }
}

/// Category toggles, then the confidence gate. A dimension whose reported
/// categories are all disabled degrades to `no_risk`.
fn gate_toggled(cs: &ConfigSet, score: &DimensionScore, threshold: f64) -> DimensionResult {
    let enabled: Vec<String> = score
        .categories
        .iter()
        .filter(|c| RiskCategory::parse(c).map_or(true, |cat| cs.is_enabled(cat)))
        .cloned()
        .collect();
    if !score.categories.is_empty() && enabled.is_empty() {
        return DimensionResult {
            confidence: Some(score.confidence),
            ..DimensionResult::no_risk()
        };
    }
    let filtered = DimensionScore {
        risk_level: score.risk_level,
        categories: enabled,
        confidence: score.confidence,
    };
    gate(&filtered, threshold)
}
