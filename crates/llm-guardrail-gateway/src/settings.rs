//! Gateway settings.
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables prefixed `GUARDRAIL_` with `__` between nested keys, e.g.
//! `GUARDRAIL_SERVER__PORT=9000` or `GUARDRAIL_STORE__BACKEND=redis`.

use config::{Config, ConfigError, Environment, File};
use llm_guardrail_core::PolicyDocument;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the settings file.
pub const CONFIG_PATH_ENV: &str = "GUARDRAIL_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub store: StoreSettings,
    pub policy: PolicySettings,
    pub credentials: CredentialSettings,
    pub classifier: ClassifierSettings,
    pub embedder: Option<EmbedderSettings>,
    pub upstream: UpstreamSettings,
    pub logging: LoggingSettings,
    pub metrics: MetricsSettings,
}

impl Settings {
    /// Load settings from `path` (if any) and the environment.
    ///
    /// `PORT` is honoured for container platforms unless
    /// `GUARDRAIL_SERVER__PORT` is also set.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_override_option("server.port", std::env::var("PORT").ok())?;
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder
            .add_source(
                Environment::with_prefix("GUARDRAIL")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Settings file path: first CLI argument, else `GUARDRAIL_CONFIG`.
    pub fn path_from_env() -> Option<PathBuf> {
        std::env::args()
            .nth(1)
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Largest accepted request body.
    pub body_limit_bytes: usize,
    /// Process-local flood guard across all routes. 0 disables it.
    pub ingress_rps: u32,
    pub ingress_burst: u32,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            body_limit_bytes: 10 * 1024 * 1024,
            ingress_rps: 0,
            ingress_burst: 0,
        }
    }
}

impl ServerSettings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Single-process counters. Rate limits and bans are not shared
    /// between workers.
    #[default]
    Memory,
    Redis,
}

/// Shared counter store for rate limits and bans.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub redis_url: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    /// TOML policy document seeding the config store.
    pub path: Option<PathBuf>,
}

impl PolicySettings {
    /// Read and validate the policy document. Without a path the document is
    /// empty and every key is rejected.
    pub fn load(&self) -> Result<PolicyDocument, ConfigError> {
        match &self.path {
            Some(path) => load_policy(path),
            None => Ok(PolicyDocument::default()),
        }
    }
}

/// Parse a policy document file.
pub fn load_policy(path: &Path) -> Result<PolicyDocument, ConfigError> {
    let document: PolicyDocument = Config::builder()
        .add_source(File::from(path).required(true))
        .build()?
        .try_deserialize()?;
    document
        .validate()
        .map_err(|e| ConfigError::Message(e.to_string()))?;
    Ok(document)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CredentialSettings {
    /// Pepper for API key digests.
    pub pepper: String,
    /// Bearer token for `/admin` routes. Admin routes are disabled when unset.
    pub admin_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub breaker_failure_threshold: u32,
    pub breaker_cool_down_secs: u64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            api_key: None,
            timeout_ms: 5_000,
            breaker_failure_threshold: 5,
            breaker_cool_down_secs: 30,
        }
    }
}

impl ClassifierSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// OpenAI-compatible embeddings endpoint for knowledge answers.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbedderSettings {
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_embedder_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_embedder_timeout_ms() -> u64 {
    2_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamSettings {
    pub connect_timeout_ms: u64,
    /// Time allowed until response headers arrive.
    pub response_timeout_secs: u64,
    /// Longest silence tolerated between streamed body chunks.
    pub stream_idle_timeout_secs: u64,
    /// Pause before the single retry on a transient failure.
    pub retry_backoff_ms: u64,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            response_timeout_secs: 120,
            stream_idle_timeout_secs: 60,
            retry_backoff_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub format: LogFormat,
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub filter: String,
    /// Detection log channel capacity.
    pub detection_log_capacity: usize,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Compact,
            filter: "info".to_string(),
            detection_log_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}
