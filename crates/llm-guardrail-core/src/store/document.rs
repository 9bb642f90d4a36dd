//! Declarative policy document used to seed the in-memory config store.

use crate::credential::KeyHasher;
use crate::error::GuardrailError;
use crate::model::{
    ApiKey, BanPolicy, BlacklistEntry, ConfigSet, DataSecurityEntityType, KnowledgeEntry,
    ResponseTemplate, Tenant, UpstreamModelConfig, WhitelistEntry,
};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

/// API key as written in a policy file: either a plaintext key, hashed at
/// load time, or a precomputed digest.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeySeed {
    pub id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub key_digest: Option<String>,
    #[serde(default)]
    pub config_set_id: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// Every record the config store serves.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PolicyDocument {
    pub tenants: Vec<Tenant>,
    pub api_keys: Vec<ApiKeySeed>,
    pub config_sets: Vec<ConfigSet>,
    pub whitelists: Vec<WhitelistEntry>,
    pub blacklists: Vec<BlacklistEntry>,
    pub response_templates: Vec<ResponseTemplate>,
    pub knowledge: Vec<KnowledgeEntry>,
    pub entity_types: Vec<DataSecurityEntityType>,
    pub ban_policies: Vec<BanPolicy>,
    pub upstream_models: Vec<UpstreamModelConfig>,
}

impl PolicyDocument {
    /// Check cross-record invariants.
    ///
    /// - thresholds ordered and in range for every template
    /// - exactly one default template per tenant that owns templates
    /// - references point at existing tenants and templates
    /// - `stream_chunk_size > 0` and patterns compile
    pub fn validate(&self) -> Result<(), GuardrailError> {
        let tenants: HashSet<&str> = self.tenants.iter().map(|t| t.id.as_str()).collect();
        let sets: HashMap<&str, &ConfigSet> = self
            .config_sets
            .iter()
            .map(|c| (c.id.as_str(), c))
            .collect();

        let mut defaults: HashMap<&str, usize> = HashMap::new();
        for cs in &self.config_sets {
            if !tenants.contains(cs.tenant_id.as_str()) {
                return Err(GuardrailError::Config(format!(
                    "config set '{}' references unknown tenant '{}'",
                    cs.id, cs.tenant_id
                )));
            }
            cs.thresholds.validate().map_err(|e| {
                GuardrailError::Config(format!("config set '{}': {e}", cs.id))
            })?;
            if !(0.0..=1.0).contains(&cs.knowledge_similarity_floor) {
                return Err(GuardrailError::Config(format!(
                    "config set '{}': knowledge_similarity_floor outside [0, 1]",
                    cs.id
                )));
            }
            let entry = defaults.entry(cs.tenant_id.as_str()).or_insert(0);
            if cs.is_default {
                *entry += 1;
            }
        }
        for (tenant, count) in defaults {
            if count != 1 {
                return Err(GuardrailError::Config(format!(
                    "tenant '{tenant}' must have exactly one default config set (found {count})"
                )));
            }
        }

        for key in &self.api_keys {
            if !tenants.contains(key.tenant_id.as_str()) {
                return Err(GuardrailError::Config(format!(
                    "api key '{}' references unknown tenant '{}'",
                    key.id, key.tenant_id
                )));
            }
            if key.key.is_none() && key.key_digest.is_none() {
                return Err(GuardrailError::Config(format!(
                    "api key '{}' needs either key or key_digest",
                    key.id
                )));
            }
            if let Some(cs_id) = &key.config_set_id {
                if let Some(cs) = sets.get(cs_id.as_str()) {
                    if cs.tenant_id != key.tenant_id {
                        return Err(GuardrailError::Config(format!(
                            "api key '{}' references config set '{}' of another tenant",
                            key.id, cs_id
                        )));
                    }
                }
            }
        }

        for policy in &self.ban_policies {
            if !sets.contains_key(policy.config_set_id.as_str()) {
                return Err(GuardrailError::Config(format!(
                    "ban policy references unknown config set '{}'",
                    policy.config_set_id
                )));
            }
            if policy.enabled && (policy.trigger_count == 0 || policy.time_window_minutes == 0) {
                return Err(GuardrailError::Config(format!(
                    "ban policy for '{}' needs trigger_count and time_window_minutes > 0",
                    policy.config_set_id
                )));
            }
        }

        for model in &self.upstream_models {
            if model.stream_chunk_size == 0 {
                return Err(GuardrailError::Config(format!(
                    "upstream model '{}': stream_chunk_size must be > 0",
                    model.model_name
                )));
            }
        }

        for entity in &self.entity_types {
            regex::Regex::new(&entity.pattern).map_err(|e| {
                GuardrailError::Config(format!("entity type '{}': bad pattern: {e}", entity.code))
            })?;
        }

        Ok(())
    }

    /// Resolve key seeds into stored records.
    pub fn api_key_records(&self, hasher: &KeyHasher) -> Result<Vec<ApiKey>, GuardrailError> {
        self.api_keys
            .iter()
            .map(|seed| {
                let key_digest = match (&seed.key_digest, &seed.key) {
                    (Some(digest), _) => digest.to_ascii_lowercase(),
                    (None, Some(key)) => hasher.digest(key)?,
                    (None, None) => {
                        return Err(GuardrailError::Config(format!(
                            "api key '{}' needs either key or key_digest",
                            seed.id
                        )))
                    }
                };
                Ok(ApiKey {
                    id: seed.id.clone(),
                    tenant_id: seed.tenant_id.clone(),
                    key_digest,
                    config_set_id: seed.config_set_id.clone(),
                    active: seed.active,
                    last_used_at: None,
                })
            })
            .collect()
    }
}

fn default_true() -> bool {
    true
}
