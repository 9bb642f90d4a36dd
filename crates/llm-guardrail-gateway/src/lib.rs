//! # LLM-Guardrail-Gateway
//!
//! HTTP surface for [`llm_guardrail_core`].
//!
//! Two modes share one authentication and admission pipeline:
//!
//! - **Direct API-call mode**: `POST /v1/guardrails` returns a verdict for a
//!   conversation.
//! - **Gateway mode**: `POST /v1/gateway/chat/completions` (and the
//!   `/v1/chat/completions` alias) screens the prompt, forwards it to the
//!   configured upstream model and screens the answer, including inside a
//!   live event stream.

pub mod error;
pub mod forwarder;
pub mod handlers;
pub mod interceptor;
pub mod middleware;
pub mod models;
pub mod provider;
pub mod router;
pub mod settings;
pub mod sse;
pub mod state;
pub mod telemetry;

#[cfg(test)]
mod test_support;

pub use error::ApiError;
pub use router::create_router;
pub use settings::Settings;
pub use state::AppState;
