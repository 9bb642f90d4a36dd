//! Knowledge-base answer lookup by embedding similarity.

use crate::error::GuardrailError;
use crate::model::{KnowledgeEntry, RiskCategory};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Text embedding capability.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, GuardrailError>;
}

/// OpenAI-compatible `/v1/embeddings` client.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpEmbedder {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, GuardrailError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GuardrailError::Config(format!("embedder client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/embeddings", base_url.trim_end_matches('/')),
            model: model.into(),
            api_key,
        })
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, GuardrailError> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "model": self.model, "input": text }));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| GuardrailError::Upstream(format!("embedder: {e}")))?
            .error_for_status()
            .map_err(|e| GuardrailError::Upstream(format!("embedder: {e}")))?;
        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| GuardrailError::Upstream(format!("embedder reply: {e}")))?;
        body.data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .ok_or_else(|| GuardrailError::Upstream("embedder returned no vectors".to_string()))
    }
}

/// Cosine similarity. Mismatched or zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Most similar entry at or above `floor`.
///
/// Entries tagged with a category only compete when that category is among
/// the hit categories; untagged entries always compete.
pub fn best_match<'a>(
    entries: &'a [KnowledgeEntry],
    query: &[f32],
    floor: f32,
    categories: &[RiskCategory],
) -> Option<(&'a KnowledgeEntry, f32)> {
    entries
        .iter()
        .filter(|e| e.category.map_or(true, |c| categories.contains(&c)))
        .map(|e| (e, cosine_similarity(&e.embedding, query)))
        .filter(|(_, score)| *score >= floor)
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, embedding: Vec<f32>, category: Option<RiskCategory>) -> KnowledgeEntry {
        KnowledgeEntry {
            id: id.into(),
            tenant_id: "t".into(),
            config_set_id: None,
            is_global: true,
            category,
            question: format!("q-{id}"),
            answer: format!("a-{id}"),
            embedding,
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_best_match_respects_floor() {
        let entries = vec![
            entry("close", vec![1.0, 0.1], None),
            entry("far", vec![0.0, 1.0], None),
        ];
        let (hit, score) = best_match(&entries, &[1.0, 0.0], 0.7, &[]).unwrap();
        assert_eq!(hit.id, "close");
        assert!(score > 0.9);
        assert!(best_match(&entries, &[-1.0, 0.0], 0.7, &[]).is_none());
    }

    #[test]
    fn test_best_match_filters_by_category() {
        let entries = vec![entry("crime", vec![1.0, 0.0], Some(RiskCategory::ViolentCrime))];
        assert!(best_match(&entries, &[1.0, 0.0], 0.5, &[RiskCategory::Profanity]).is_none());
        assert!(best_match(&entries, &[1.0, 0.0], 0.5, &[RiskCategory::ViolentCrime]).is_some());
    }
}
