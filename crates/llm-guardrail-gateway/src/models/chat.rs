//! Chat-completion wire shapes.
//!
//! Inbound requests stay as raw JSON so every parameter passes through to the
//! upstream untouched; [`ChatRequestView`] only extracts what detection needs.

use chrono::Utc;
use llm_guardrail_core::{ChatTurn, GuardrailError};
use serde::Serialize;
use serde_json::Value;

/// Fields of an inbound chat-completion request used by the gateway.
#[derive(Debug, Clone)]
pub struct ChatRequestView {
    pub model: String,
    pub stream: bool,
    pub user: Option<String>,
    pub messages: Vec<ChatTurn>,
}

impl ChatRequestView {
    pub fn parse(body: &Value) -> Result<Self, GuardrailError> {
        let model = body
            .get("model")
            .and_then(Value::as_str)
            .ok_or_else(|| GuardrailError::InvalidRequest("'model' is required".to_string()))?
            .to_string();
        let messages = body
            .get("messages")
            .and_then(Value::as_array)
            .ok_or_else(|| GuardrailError::InvalidRequest("'messages' must be an array".to_string()))?
            .iter()
            .map(|m| ChatTurn {
                role: m
                    .get("role")
                    .and_then(Value::as_str)
                    .unwrap_or("user")
                    .to_string(),
                content: m.get("content").map(content_text).unwrap_or_default(),
            })
            .collect();

        Ok(Self {
            model,
            stream: body.get("stream").and_then(Value::as_bool).unwrap_or(false),
            user: body.get("user").and_then(Value::as_str).map(str::to_string),
            messages,
        })
    }

    /// Index of the last user message, the one screened on input.
    pub fn last_user_index(&self) -> Option<usize> {
        self.messages.iter().rposition(|m| m.role == "user")
    }

    /// Text to screen on input and the turns before it.
    pub fn input(&self) -> Option<(&str, &[ChatTurn])> {
        let idx = self.last_user_index()?;
        Some((self.messages[idx].content.as_str(), &self.messages[..idx]))
    }
}

/// Flatten message content: a plain string or an array of typed parts.
pub fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Replace the text of message `index`.
///
/// Multi-part content keeps its non-text parts in place. The first text part
/// carries `text` and the other text parts are dropped, mirroring how
/// [`content_text`] joined them for screening.
pub fn rewrite_message(body: &mut Value, index: usize, text: &str) {
    let Some(message) = body
        .get_mut("messages")
        .and_then(Value::as_array_mut)
        .and_then(|messages| messages.get_mut(index))
    else {
        return;
    };

    if let Some(Value::Array(parts)) = message.get_mut("content") {
        if parts.iter().any(is_text_part) {
            let mut written = false;
            parts.retain_mut(|part| {
                if !is_text_part(part) {
                    return true;
                }
                if written {
                    return false;
                }
                part["text"] = Value::String(text.to_string());
                written = true;
                true
            });
            return;
        }
    }
    message["content"] = Value::String(text.to_string());
}

fn is_text_part(part: &Value) -> bool {
    part.get("text").map_or(false, Value::is_string)
}

pub fn new_completion_id() -> String {
    format!("chatcmpl-guardrail-{}", uuid::Uuid::new_v4().simple())
}

/// Non-streaming completion carrying a substitution answer.
#[derive(Debug, Serialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Serialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Serialize)]
pub struct AssistantMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatCompletion {
    pub fn substitution(model: &str, answer: &str) -> Self {
        Self {
            id: new_completion_id(),
            object: "chat.completion",
            created: Utc::now().timestamp(),
            model: model.to_string(),
            choices: vec![CompletionChoice {
                index: 0,
                message: AssistantMessage {
                    role: "assistant",
                    content: answer.to_string(),
                },
                finish_reason: "content_filter",
            }],
        }
    }
}

/// Streaming chunk carrying a substitution answer.
#[derive(Debug, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Serialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    pub finish_reason: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    pub content: String,
}

impl ChatCompletionChunk {
    pub fn substitution(id: &str, model: &str, answer: &str) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk",
            created: Utc::now().timestamp(),
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: Some("assistant"),
                    content: answer.to_string(),
                },
                finish_reason: Some("content_filter"),
            }],
        }
    }
}
