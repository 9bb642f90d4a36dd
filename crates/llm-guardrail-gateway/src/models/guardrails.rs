//! Direct API-call mode request and response.

use llm_guardrail_core::{
    Action, ChatTurn, DetectionResult, DimensionResult, HitSource, RiskLevel,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct GuardrailsRequest {
    pub messages: Vec<ChatTurn>,
    #[serde(default)]
    pub user: Option<String>,
}

impl GuardrailsRequest {
    /// Whether the conversation ends with a model answer to screen.
    pub fn is_output_check(&self) -> bool {
        self.messages
            .last()
            .map(|m| m.role == "assistant")
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DimensionResults {
    pub security: DimensionResult,
    pub compliance: DimensionResult,
    pub data: DimensionResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct GuardrailsResponse {
    pub id: String,
    pub overall_risk_level: RiskLevel,
    pub suggest_action: Action,
    pub suggest_answer: Option<String>,
    pub result: DimensionResults,
    pub hit_source: HitSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anonymized_text: Option<String>,
}

impl From<DetectionResult> for GuardrailsResponse {
    fn from(r: DetectionResult) -> Self {
        Self {
            id: r.id,
            overall_risk_level: r.overall_risk_level,
            suggest_action: r.suggest_action,
            suggest_answer: r.suggest_answer,
            result: DimensionResults {
                security: r.security,
                compliance: r.compliance,
                data: r.data,
            },
            hit_source: r.hit_source,
            anonymized_text: r.anonymized_text,
        }
    }
}
