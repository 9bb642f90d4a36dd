//! Versioned, copy-on-write config snapshots.
//!
//! A [`ConfigSnapshot`] bundles one protection template with its compiled
//! keyword automata, DLP patterns and attached resources. Snapshots are
//! immutable and shared as `Arc`s: a request keeps the snapshot it resolved
//! even if a newer version is published mid-flight.
//!
//! [`SnapshotCache`] rebuilds a snapshot when the store's version token for
//! its template changes.

use crate::dlp::DlpScanner;
use crate::error::GuardrailError;
use crate::keywords::KeywordEngine;
use crate::model::{BanPolicy, ConfigSet, KnowledgeEntry, ResponseTemplate, UpstreamModelConfig};
use crate::store::{ConfigResources, ConfigStore};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Immutable view of one protection template.
#[derive(Debug)]
pub struct ConfigSnapshot {
    pub version: u64,
    pub config_set: ConfigSet,
    pub keywords: KeywordEngine,
    pub dlp: DlpScanner,
    pub templates: Vec<ResponseTemplate>,
    pub knowledge: Vec<KnowledgeEntry>,
    pub ban_policy: Option<BanPolicy>,
    upstream_models: HashMap<String, UpstreamModelConfig>,
}

impl ConfigSnapshot {
    /// Compile a snapshot from raw resources.
    pub fn build(
        version: u64,
        config_set: ConfigSet,
        resources: ConfigResources,
    ) -> Result<Self, GuardrailError> {
        let keywords = KeywordEngine::compile(&resources.whitelists, &resources.blacklists)?;
        let dlp = DlpScanner::compile(&resources.entity_types)?;
        let upstream_models = resources
            .upstream_models
            .into_iter()
            .map(|m| (m.model_name.clone(), m))
            .collect();

        Ok(Self {
            version,
            config_set,
            keywords,
            dlp,
            templates: resources.templates,
            knowledge: resources.knowledge,
            ban_policy: resources.ban_policy.filter(|p| p.enabled),
            upstream_models,
        })
    }

    /// Upstream model configured under the client-facing `model` name.
    pub fn upstream(&self, model: &str) -> Option<&UpstreamModelConfig> {
        self.upstream_models.get(model)
    }

    pub fn upstream_names(&self) -> impl Iterator<Item = &str> {
        self.upstream_models.keys().map(String::as_str)
    }
}

/// Snapshot cache keyed by config set id.
pub struct SnapshotCache {
    store: Arc<dyn ConfigStore>,
    entries: DashMap<String, Arc<ConfigSnapshot>>,
}

impl SnapshotCache {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self {
            store,
            entries: DashMap::new(),
        }
    }

    /// Current snapshot for `config_set_id`, rebuilding it if the version
    /// token moved.
    pub async fn get(&self, config_set_id: &str) -> Result<Arc<ConfigSnapshot>, GuardrailError> {
        let version = self.store.version(config_set_id).await?;
        if let Some(cached) = self.entries.get(config_set_id) {
            if cached.version == version {
                return Ok(Arc::clone(&cached));
            }
        }

        // The version check above is only a cache hint. The snapshot takes its
        // version from the same read as its contents.
        let source = self.store.load_snapshot(config_set_id).await?.ok_or_else(|| {
            GuardrailError::ConfigResolution(format!("config set '{config_set_id}' not found"))
        })?;
        let version = source.version;
        let snapshot = Arc::new(ConfigSnapshot::build(version, source.config_set, source.resources)?);

        debug!(config_set_id, version, "Rebuilt config snapshot");
        self.entries
            .insert(config_set_id.to_string(), Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Drop one cached snapshot, or all of them.
    pub fn invalidate(&self, config_set_id: Option<&str>) {
        match config_set_id {
            Some(id) => {
                self.entries.remove(id);
            }
            None => self.entries.clear(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
