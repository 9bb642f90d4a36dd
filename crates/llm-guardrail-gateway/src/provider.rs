//! Per-provider text extraction.
//!
//! Providers disagree on where hidden reasoning lives. The adapter maps a
//! [`ProviderKind`] to the field names it reads so the interceptor and
//! handlers never branch on provider.

use crate::models::chat::content_text;
use llm_guardrail_core::ProviderKind;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Default, Deserialize)]
struct Payload {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Default, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Option<TextFields>,
    #[serde(default)]
    message: Option<TextFields>,
}

#[derive(Debug, Default, Deserialize)]
struct TextFields {
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Visible and hidden text of a chunk or message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub content: String,
    pub reasoning: String,
}

impl ExtractedText {
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.reasoning.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProviderAdapter {
    kind: ProviderKind,
    scan_reasoning: bool,
}

impl ProviderAdapter {
    pub fn new(kind: ProviderKind, scan_reasoning: bool) -> Self {
        Self {
            kind,
            scan_reasoning,
        }
    }

    pub fn scans_reasoning(&self) -> bool {
        self.scan_reasoning
    }

    /// Text of a streaming chunk (`choices[].delta`).
    pub fn chunk_text(&self, payload: &str) -> ExtractedText {
        self.extract(payload, |c| c.delta.as_ref())
    }

    /// Text of a complete response (`choices[].message`).
    pub fn message_text(&self, payload: &str) -> ExtractedText {
        self.extract(payload, |c| c.message.as_ref())
    }

    /// Text submitted for detection: reasoning first, when scanned.
    pub fn detection_text(&self, text: &ExtractedText) -> String {
        if self.scan_reasoning && !text.reasoning.is_empty() {
            if text.content.is_empty() {
                return text.reasoning.clone();
            }
            return format!("{}\n{}", text.reasoning, text.content);
        }
        text.content.clone()
    }

    fn extract<F>(&self, payload: &str, fields: F) -> ExtractedText
    where
        F: Fn(&Choice) -> Option<&TextFields>,
    {
        let parsed: Payload = match serde_json::from_str(payload) {
            Ok(p) => p,
            Err(_) => return ExtractedText::default(),
        };
        let mut out = ExtractedText::default();
        for f in parsed.choices.iter().filter_map(|c| fields(c)) {
            if let Some(content) = &f.content {
                out.content.push_str(&content_text(content));
            }
            if self.scan_reasoning {
                if let Some(r) = self.reasoning_of(f) {
                    out.reasoning.push_str(r);
                }
            }
        }
        out
    }

    fn reasoning_of<'a>(&self, f: &'a TextFields) -> Option<&'a str> {
        match self.kind {
            ProviderKind::DeepSeek => f.reasoning_content.as_deref(),
            ProviderKind::OpenRouter => f.reasoning.as_deref(),
            ProviderKind::OpenAi => f
                .reasoning_content
                .as_deref()
                .or(f.reasoning.as_deref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_content() {
        let adapter = ProviderAdapter::new(ProviderKind::OpenAi, true);
        let text = adapter.chunk_text(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#);
        assert_eq!(text.content, "Hel");
        assert!(text.reasoning.is_empty());
    }

    #[test]
    fn test_reasoning_field_per_provider() {
        let payload = r#"{"choices":[{"delta":{"reasoning_content":"think-a","reasoning":"think-b"}}]}"#;
        let deepseek = ProviderAdapter::new(ProviderKind::DeepSeek, true);
        let openrouter = ProviderAdapter::new(ProviderKind::OpenRouter, true);
        let openai = ProviderAdapter::new(ProviderKind::OpenAi, true);
        assert_eq!(deepseek.chunk_text(payload).reasoning, "think-a");
        assert_eq!(openrouter.chunk_text(payload).reasoning, "think-b");
        assert_eq!(openai.chunk_text(payload).reasoning, "think-a");
    }

    #[test]
    fn test_reasoning_ignored_when_disabled() {
        let adapter = ProviderAdapter::new(ProviderKind::DeepSeek, false);
        let text = adapter.message_text(
            r#"{"choices":[{"message":{"content":"answer","reasoning_content":"secret"}}]}"#,
        );
        assert_eq!(text.content, "answer");
        assert!(text.reasoning.is_empty());
        assert_eq!(adapter.detection_text(&text), "answer");
    }

    #[test]
    fn test_detection_text_joins_reasoning_first() {
        let adapter = ProviderAdapter::new(ProviderKind::DeepSeek, true);
        let text = ExtractedText {
            content: "answer".into(),
            reasoning: "plan".into(),
        };
        assert_eq!(adapter.detection_text(&text), "plan\nanswer");
    }

    #[test]
    fn test_non_json_payload_yields_nothing() {
        let adapter = ProviderAdapter::new(ProviderKind::OpenAi, true);
        assert!(adapter.chunk_text("not json").is_empty());
        assert!(adapter.chunk_text(r#"{"usage":{"total_tokens":3}}"#).is_empty());
    }
}
