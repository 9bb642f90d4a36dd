//! HTTP request handlers

pub mod admin;
pub mod gateway;
pub mod guardrails;
pub mod health;

pub use admin::{reload, unban};
pub use gateway::chat_completions;
pub use guardrails::check_guardrails;
pub use health::{health, live, metrics, ready, version};
