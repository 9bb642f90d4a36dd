//! Store contracts consumed by the guardrail core.
//!
//! Two collaborators sit behind these traits:
//!
//! - [`ConfigStore`]: read API over the admin-owned configuration. Every
//!   protection template exposes a version token; the snapshot cache rebuilds
//!   compiled state when the token changes.
//! - [`SharedStore`]: atomic counters and small records shared by every
//!   worker process. Rate-limit windows, ban events and ban records live here.
//!   Per-process state would weaken enforcement by the number of processes,
//!   so production deployments use the Redis implementation.

mod document;
mod memory;
#[cfg(feature = "redis")]
mod redis_store;

pub use document::{ApiKeySeed, PolicyDocument};
pub use memory::{InMemoryConfigStore, InMemorySharedStore};
#[cfg(feature = "redis")]
pub use redis_store::RedisSharedStore;

use crate::error::GuardrailError;
use crate::model::{
    ApiKey, BanPolicy, BlacklistEntry, ConfigSet, DataSecurityEntityType, KnowledgeEntry,
    ResponseTemplate, Tenant, UpstreamModelConfig, WhitelistEntry,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Resources attached to one protection template, including tenant-global
/// entries. Inactive entries are already filtered out.
#[derive(Debug, Clone, Default)]
pub struct ConfigResources {
    pub whitelists: Vec<WhitelistEntry>,
    pub blacklists: Vec<BlacklistEntry>,
    pub templates: Vec<ResponseTemplate>,
    pub knowledge: Vec<KnowledgeEntry>,
    pub entity_types: Vec<DataSecurityEntityType>,
    pub ban_policy: Option<BanPolicy>,
    pub upstream_models: Vec<UpstreamModelConfig>,
}

/// Raw inputs of one config snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotSource {
    pub version: u64,
    pub config_set: ConfigSet,
    pub resources: ConfigResources,
}

/// Read access to tenant configuration.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Look up a key by its digest.
    async fn find_api_key(&self, key_digest: &str) -> Result<Option<ApiKey>, GuardrailError>;

    async fn tenant(&self, tenant_id: &str) -> Result<Option<Tenant>, GuardrailError>;

    async fn config_set(&self, config_set_id: &str) -> Result<Option<ConfigSet>, GuardrailError>;

    /// The tenant's `is_default` template, if any.
    async fn default_config_set(
        &self,
        tenant_id: &str,
    ) -> Result<Option<ConfigSet>, GuardrailError>;

    /// Version token for a template. Changes whenever the template or any
    /// attached resource changes.
    async fn version(&self, config_set_id: &str) -> Result<u64, GuardrailError>;

    /// A template with its attached resources and version token, all read
    /// from the same generation. `None` when the template does not exist.
    async fn load_snapshot(
        &self,
        config_set_id: &str,
    ) -> Result<Option<SnapshotSource>, GuardrailError>;

    /// Record key usage. Called off the request path.
    async fn touch_api_key(&self, key_id: &str, at: DateTime<Utc>) -> Result<(), GuardrailError>;
}

/// Shared counter and record store.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Atomically increment `key`, setting `ttl` on first write. Returns the
    /// new count.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, GuardrailError>;

    /// Add an event at `at_ms` to the time-ordered set `key`, drop events at
    /// or before `at_ms - window`, and return the remaining count. All three
    /// steps happen atomically.
    async fn record_event(
        &self,
        key: &str,
        at_ms: i64,
        window: Duration,
    ) -> Result<u64, GuardrailError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, GuardrailError>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), GuardrailError>;

    /// Remove `key`. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, GuardrailError>;

    async fn health_check(&self) -> Result<(), GuardrailError>;
}
