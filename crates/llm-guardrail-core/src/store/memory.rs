//! In-memory store implementations.
//!
//! [`InMemoryConfigStore`] serves a validated [`PolicyDocument`] and swaps it
//! atomically on reload. [`InMemorySharedStore`] keeps counters in a
//! [`DashMap`] with lazy TTL eviction; it is only correct for a single
//! process.

use super::{ConfigResources, ConfigStore, PolicyDocument, SharedStore, SnapshotSource};
use crate::credential::KeyHasher;
use crate::error::GuardrailError;
use crate::model::{ApiKey, ConfigSet, Tenant};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Config store
// ---------------------------------------------------------------------------

struct PolicyState {
    generation: u64,
    document: PolicyDocument,
    keys_by_digest: HashMap<String, ApiKey>,
}

/// Config store backed by a policy document held in memory.
pub struct InMemoryConfigStore {
    hasher: KeyHasher,
    state: RwLock<Arc<PolicyState>>,
    generation: AtomicU64,
    last_used: DashMap<String, DateTime<Utc>>,
}

impl InMemoryConfigStore {
    /// Validate and load `document`.
    pub fn new(document: PolicyDocument, hasher: KeyHasher) -> Result<Self, GuardrailError> {
        let state = build_state(document, &hasher, 1)?;
        Ok(Self {
            hasher,
            state: RwLock::new(Arc::new(state)),
            generation: AtomicU64::new(1),
            last_used: DashMap::new(),
        })
    }

    /// Replace the served document. All version tokens change, so cached
    /// snapshots rebuild on next use. In-flight requests keep the snapshot
    /// they already hold.
    pub fn replace(&self, document: PolicyDocument) -> Result<u64, GuardrailError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let state = build_state(document, &self.hasher, generation)?;
        let mut guard = self
            .state
            .write()
            .map_err(|_| GuardrailError::Store("policy state lock poisoned".to_string()))?;
        *guard = Arc::new(state);
        Ok(generation)
    }

    /// Last recorded use of a key.
    pub fn last_used(&self, key_id: &str) -> Option<DateTime<Utc>> {
        self.last_used.get(key_id).map(|v| *v)
    }

    fn current(&self) -> Result<Arc<PolicyState>, GuardrailError> {
        self.state
            .read()
            .map(|s| Arc::clone(&s))
            .map_err(|_| GuardrailError::Store("policy state lock poisoned".to_string()))
    }
}

fn build_state(
    document: PolicyDocument,
    hasher: &KeyHasher,
    generation: u64,
) -> Result<PolicyState, GuardrailError> {
    document.validate()?;
    let keys_by_digest = document
        .api_key_records(hasher)?
        .into_iter()
        .map(|k| (k.key_digest.clone(), k))
        .collect();
    Ok(PolicyState {
        generation,
        document,
        keys_by_digest,
    })
}

fn attached(owner_tenant: &str, entry_tenant: &str, entry_set: Option<&str>, set_id: &str) -> bool {
    owner_tenant == entry_tenant && entry_set.map_or(true, |id| id == set_id)
}

fn attached_resources(doc: &PolicyDocument, cs: &ConfigSet) -> ConfigResources {
    let tenant = cs.tenant_id.as_str();

    ConfigResources {
        whitelists: doc
            .whitelists
            .iter()
            .filter(|w| w.active && attached(tenant, &w.tenant_id, w.config_set_id.as_deref(), &cs.id))
            .cloned()
            .collect(),
        blacklists: doc
            .blacklists
            .iter()
            .filter(|b| b.active && attached(tenant, &b.tenant_id, b.config_set_id.as_deref(), &cs.id))
            .cloned()
            .collect(),
        templates: doc
            .response_templates
            .iter()
            .filter(|t| t.config_set_id == cs.id)
            .cloned()
            .collect(),
        knowledge: doc
            .knowledge
            .iter()
            .filter(|k| {
                k.tenant_id == tenant
                    && (k.is_global || k.config_set_id.as_deref() == Some(cs.id.as_str()))
            })
            .cloned()
            .collect(),
        entity_types: doc
            .entity_types
            .iter()
            .filter(|e| {
                e.active
                    && e.tenant_id == tenant
                    && (e.is_global || e.config_set_id.as_deref() == Some(cs.id.as_str()))
            })
            .cloned()
            .collect(),
        ban_policy: doc
            .ban_policies
            .iter()
            .find(|p| p.config_set_id == cs.id)
            .cloned(),
        upstream_models: doc
            .upstream_models
            .iter()
            .filter(|m| m.tenant_id == tenant)
            .cloned()
            .collect(),
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn find_api_key(&self, key_digest: &str) -> Result<Option<ApiKey>, GuardrailError> {
        let state = self.current()?;
        Ok(state.keys_by_digest.get(key_digest).map(|k| {
            let mut key = k.clone();
            key.last_used_at = self.last_used(&key.id);
            key
        }))
    }

    async fn tenant(&self, tenant_id: &str) -> Result<Option<Tenant>, GuardrailError> {
        let state = self.current()?;
        Ok(state
            .document
            .tenants
            .iter()
            .find(|t| t.id == tenant_id)
            .cloned())
    }

    async fn config_set(&self, config_set_id: &str) -> Result<Option<ConfigSet>, GuardrailError> {
        let state = self.current()?;
        Ok(state
            .document
            .config_sets
            .iter()
            .find(|c| c.id == config_set_id)
            .cloned())
    }

    async fn default_config_set(
        &self,
        tenant_id: &str,
    ) -> Result<Option<ConfigSet>, GuardrailError> {
        let state = self.current()?;
        Ok(state
            .document
            .config_sets
            .iter()
            .find(|c| c.tenant_id == tenant_id && c.is_default)
            .cloned())
    }

    async fn version(&self, _config_set_id: &str) -> Result<u64, GuardrailError> {
        Ok(self.current()?.generation)
    }

    async fn load_snapshot(
        &self,
        config_set_id: &str,
    ) -> Result<Option<SnapshotSource>, GuardrailError> {
        let state = self.current()?;
        Ok(state
            .document
            .config_sets
            .iter()
            .find(|c| c.id == config_set_id)
            .map(|cs| SnapshotSource {
                version: state.generation,
                config_set: cs.clone(),
                resources: attached_resources(&state.document, cs),
            }))
    }

    async fn touch_api_key(&self, key_id: &str, at: DateTime<Utc>) -> Result<(), GuardrailError> {
        self.last_used.insert(key_id.to_string(), at);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Shared store
// ---------------------------------------------------------------------------

enum Slot {
    Counter(u64),
    Events(VecDeque<i64>),
    Bytes(Vec<u8>),
}

struct Entry {
    slot: Slot,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Single-process counter store.
///
/// Each operation runs under the DashMap shard lock for its key, which gives
/// the same atomicity the Redis implementation gets from MULTI.
pub struct InMemorySharedStore {
    map: DashMap<String, Entry>,
}

impl InMemorySharedStore {
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }

    /// Drop expired entries. Optional; reads already ignore them.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.map.retain(|_, e| e.is_live(now));
    }
}

impl Default for InMemorySharedStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedStore for InMemorySharedStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, GuardrailError> {
        let now = Instant::now();
        let mut entry = self.map.entry(key.to_string()).or_insert_with(|| Entry {
            slot: Slot::Counter(0),
            expires_at: now + ttl,
        });
        if !entry.is_live(now) || !matches!(entry.slot, Slot::Counter(_)) {
            *entry = Entry {
                slot: Slot::Counter(0),
                expires_at: now + ttl,
            };
        }
        match &mut entry.slot {
            Slot::Counter(n) => {
                *n += 1;
                Ok(*n)
            }
            _ => Err(GuardrailError::Store(format!("key '{key}' is not a counter"))),
        }
    }

    async fn record_event(
        &self,
        key: &str,
        at_ms: i64,
        window: Duration,
    ) -> Result<u64, GuardrailError> {
        let now = Instant::now();
        let cutoff = at_ms - window.as_millis() as i64;
        let mut entry = self.map.entry(key.to_string()).or_insert_with(|| Entry {
            slot: Slot::Events(VecDeque::new()),
            expires_at: now + window,
        });
        if !entry.is_live(now) || !matches!(entry.slot, Slot::Events(_)) {
            entry.slot = Slot::Events(VecDeque::new());
        }
        entry.expires_at = now + window;
        match &mut entry.slot {
            Slot::Events(events) => {
                let pos = events.partition_point(|&t| t <= at_ms);
                events.insert(pos, at_ms);
                events.retain(|&t| t > cutoff);
                Ok(events.len() as u64)
            }
            _ => Err(GuardrailError::Store(format!("key '{key}' is not an event set"))),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, GuardrailError> {
        let now = Instant::now();
        if let Some(entry) = self.map.get(key) {
            if entry.is_live(now) {
                if let Slot::Bytes(data) = &entry.slot {
                    return Ok(Some(data.clone()));
                }
                return Ok(None);
            }
            drop(entry);
            self.map.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), GuardrailError> {
        self.map.insert(
            key.to_string(),
            Entry {
                slot: Slot::Bytes(value.to_vec()),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, GuardrailError> {
        let now = Instant::now();
        Ok(self
            .map
            .remove(key)
            .map(|(_, e)| e.is_live(now))
            .unwrap_or(false))
    }

    async fn health_check(&self) -> Result<(), GuardrailError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ApiKeySeed;

    fn document() -> PolicyDocument {
        serde_json::from_value(serde_json::json!({
            "tenants": [{"id": "t1", "name": "Acme"}],
            "config_sets": [
                {"id": "cs-default", "tenant_id": "t1", "is_default": true},
                {"id": "cs-strict", "tenant_id": "t1"}
            ],
            "whitelists": [
                {"id": "w1", "tenant_id": "t1", "name": "global", "keywords": ["hello"]},
                {"id": "w2", "tenant_id": "t1", "config_set_id": "cs-strict", "name": "strict", "keywords": ["x"]},
                {"id": "w3", "tenant_id": "t1", "name": "off", "keywords": ["y"], "active": false}
            ]
        }))
        .unwrap()
    }

    fn store() -> InMemoryConfigStore {
        let mut doc = document();
        doc.api_keys.push(ApiKeySeed {
            id: "k1".into(),
            tenant_id: "t1".into(),
            key: Some("sk-guard-0123456789abcdef".into()),
            key_digest: None,
            config_set_id: None,
            active: true,
        });
        InMemoryConfigStore::new(doc, KeyHasher::new("pepper").unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_find_key_by_digest() {
        let store = store();
        let digest = KeyHasher::new("pepper")
            .unwrap()
            .digest("sk-guard-0123456789abcdef")
            .unwrap();
        let key = store.find_api_key(&digest).await.unwrap().unwrap();
        assert_eq!(key.id, "k1");
        assert!(store.find_api_key("deadbeef").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resources_include_tenant_global_entries() {
        let store = store();
        let default = store.default_config_set("t1").await.unwrap().unwrap();
        assert_eq!(default.id, "cs-default");

        let source = store.load_snapshot("cs-default").await.unwrap().unwrap();
        let names: Vec<_> = source.resources.whitelists.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["global"]);

        let strict = store.load_snapshot("cs-strict").await.unwrap().unwrap();
        assert_eq!(strict.config_set.id, "cs-strict");
        assert_eq!(strict.resources.whitelists.len(), 2);
        assert!(store.load_snapshot("cs-missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_snapshot_version_matches_contents() {
        let store = store();
        let generation = store.replace(document()).unwrap();
        let source = store.load_snapshot("cs-default").await.unwrap().unwrap();
        assert_eq!(source.version, generation);
    }

    #[tokio::test]
    async fn test_replace_bumps_version() {
        let store = store();
        let before = store.version("cs-default").await.unwrap();
        store.replace(document()).unwrap();
        let after = store.version("cs-default").await.unwrap();
        assert!(after > before);
    }

    #[tokio::test]
    async fn test_replace_rejects_invalid_document_and_keeps_old() {
        let store = store();
        let mut bad = document();
        bad.config_sets[1].is_default = true;
        assert!(store.replace(bad).is_err());
        assert!(store.default_config_set("t1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_touch_records_last_used() {
        let store = store();
        let now = Utc::now();
        store.touch_api_key("k1", now).await.unwrap();
        assert_eq!(store.last_used("k1"), Some(now));
    }

    #[tokio::test]
    async fn test_increment_counts_and_expires() {
        let store = InMemorySharedStore::new();
        assert_eq!(store.increment("c", Duration::from_millis(20)).await.unwrap(), 1);
        assert_eq!(store.increment("c", Duration::from_millis(20)).await.unwrap(), 2);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.increment("c", Duration::from_millis(20)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_record_event_trims_window() {
        let store = InMemorySharedStore::new();
        let window = Duration::from_secs(600);
        assert_eq!(store.record_event("e", 0, window).await.unwrap(), 1);
        assert_eq!(store.record_event("e", 300_000, window).await.unwrap(), 2);
        // 0 falls out of the window ending at 600_000.
        assert_eq!(store.record_event("e", 600_000, window).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = InMemorySharedStore::new();
        store.set("k", b"v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_expired_value() {
        let store = InMemorySharedStore::new();
        store.set("k", b"v", Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.get("k").await.unwrap().is_none());
    }
}
