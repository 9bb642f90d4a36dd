//! Request and response types.

pub mod chat;
pub mod guardrails;

pub use chat::{ChatCompletion, ChatCompletionChunk, ChatRequestView};
pub use guardrails::{GuardrailsRequest, GuardrailsResponse};
