//! # LLM-Guardrail-Core
//!
//! Request enforcement for AI model traffic.
//!
//! ## Overview
//!
//! Every request passes through the same pipeline:
//!
//! - **Authentication**: API key digest lookup, tenant checks, protection
//!   template resolution (key template, then tenant default)
//! - **Admission**: per-tenant requests-per-second on a shared counter store
//! - **Pre-filter**: whitelist then blacklist keywords, Aho–Corasick matched
//! - **Detection**: external classifier scores gated by the active sensitivity
//!   tier, merged with a deterministic DLP scan
//! - **Policy**: pass / replace / reject with a knowledge or template answer
//! - **Bans**: sliding-window end-user bans fed by every verdict
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use llm_guardrail_core::{GuardrailCore, HttpClassifier, InMemoryConfigStore, KeyHasher, PolicyDocument};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = InMemoryConfigStore::new(PolicyDocument::default(), KeyHasher::new("pepper")?)?;
//!     let core = GuardrailCore::builder()
//!         .with_pepper("pepper")
//!         .with_config_store(Arc::new(store))
//!         .with_classifier(Arc::new(HttpClassifier::new(
//!             "http://classifier:8000",
//!             None,
//!             Duration::from_secs(5),
//!         )?))
//!         .build()?;
//!
//!     let ctx = core.authenticate(Some("Bearer sk-guard-..."), None).await?;
//!     core.admit(&ctx).await?;
//!     let verdict = core.check_input(&ctx, "Hello world", &[]).await?;
//!     println!("{} -> {}", verdict.overall_risk_level, verdict.suggest_action);
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod ban;
pub mod circuit_breaker;
pub mod classifier;
pub mod credential;
pub mod detection;
pub mod dlp;
pub mod error;
pub mod gateway;
pub mod keywords;
pub mod knowledge;
pub mod log_sink;
pub mod model;
pub mod policy;
pub mod rate_limit;
pub mod snapshot;
pub mod store;

// Primary exports
pub use auth::RequestContext;
pub use classifier::{ChatTurn, ClassifierVerdict, DimensionScore, HttpClassifier, RiskClassifier};
pub use credential::KeyHasher;
pub use detection::{DetectionOptions, DetectionResult, DimensionResult, HitSource};
pub use error::GuardrailError;
pub use gateway::{GuardrailCore, GuardrailCoreBuilder};
pub use knowledge::{Embedder, HttpEmbedder};
pub use log_sink::{DetectionEvent, DetectionLogSink, TracingLogSink};
pub use model::{Action, Direction, ProviderKind, RiskLevel, UpstreamModelConfig};
pub use policy::AnswerSource;
pub use snapshot::ConfigSnapshot;
pub use store::{ConfigStore, InMemoryConfigStore, InMemorySharedStore, PolicyDocument, SharedStore};

#[cfg(feature = "redis")]
pub use store::RedisSharedStore;
