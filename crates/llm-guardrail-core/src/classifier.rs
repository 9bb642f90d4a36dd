//! External risk classifier client.
//!
//! The classifier is an opaque scoring service: text in, per-dimension risk
//! level, categories and confidence out. Any transport failure, timeout or
//! malformed reply surfaces as [`GuardrailError::DetectionUnavailable`].

use crate::error::GuardrailError;
use crate::model::{Direction, RiskLevel};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One prior turn sent as classification context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// Body of a classification call.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifyRequest {
    pub direction: Direction,
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<ChatTurn>,
}

/// Raw score for one dimension, before gating.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    #[serde(default)]
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
}

/// Raw classifier reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifierVerdict {
    #[serde(default)]
    pub security: DimensionScore,
    #[serde(default)]
    pub compliance: DimensionScore,
    #[serde(default)]
    pub data: DimensionScore,
}

/// Scoring capability consumed by the detection orchestrator.
#[async_trait]
pub trait RiskClassifier: Send + Sync {
    async fn classify(&self, request: &ClassifyRequest) -> Result<ClassifierVerdict, GuardrailError>;
}

/// Classifier reached over HTTP at `{base_url}/v1/classify`.
pub struct HttpClassifier {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpClassifier {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, GuardrailError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GuardrailError::Config(format!("classifier client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/classify", base_url.trim_end_matches('/')),
            api_key,
        })
    }
}

#[async_trait]
impl RiskClassifier for HttpClassifier {
    async fn classify(&self, request: &ClassifyRequest) -> Result<ClassifierVerdict, GuardrailError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                GuardrailError::DetectionUnavailable("classifier timed out".to_string())
            } else {
                GuardrailError::DetectionUnavailable(format!("classifier unreachable: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GuardrailError::DetectionUnavailable(format!(
                "classifier returned HTTP {status}"
            )));
        }

        response
            .json::<ClassifierVerdict>()
            .await
            .map_err(|e| GuardrailError::DetectionUnavailable(format!("classifier reply: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let req = ClassifyRequest {
            direction: Direction::Output,
            text: "hi".into(),
            context: vec![ChatTurn {
                role: "user".into(),
                content: "q".into(),
            }],
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["direction"], "output");
        assert_eq!(v["context"][0]["role"], "user");
    }

    #[test]
    fn test_verdict_tolerates_missing_fields() {
        let v: ClassifierVerdict = serde_json::from_str(
            r#"{"compliance":{"risk_level":"high_risk","categories":["S5"],"confidence":0.9}}"#,
        )
        .unwrap();
        assert_eq!(v.compliance.risk_level, RiskLevel::HighRisk);
        assert_eq!(v.security, DimensionScore::default());
    }

    #[tokio::test]
    async fn test_unreachable_classifier_is_detection_unavailable() {
        let classifier =
            HttpClassifier::new("http://127.0.0.1:1", None, Duration::from_millis(200)).unwrap();
        let req = ClassifyRequest {
            direction: Direction::Input,
            text: "x".into(),
            context: Vec::new(),
        };
        let err = classifier.classify(&req).await.unwrap_err();
        assert!(matches!(err, GuardrailError::DetectionUnavailable(_)));
    }
}
