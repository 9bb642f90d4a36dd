//! Credential validation and protection template resolution.

use crate::ban::BanEngine;
use crate::credential::{parse_bearer, KeyHasher};
use crate::error::GuardrailError;
use crate::model::{ApiKey, Tenant};
use crate::snapshot::{ConfigSnapshot, SnapshotCache};
use crate::store::ConfigStore;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, warn};

/// Immutable per-request identity and configuration.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub tenant: Tenant,
    pub api_key_id: String,
    pub end_user_id: Option<String>,
    pub snapshot: Arc<ConfigSnapshot>,
}

impl RequestContext {
    pub fn tenant_id(&self) -> &str {
        &self.tenant.id
    }

    pub fn config_set_id(&self) -> &str {
        &self.snapshot.config_set.id
    }
}

/// Resolves a bearer credential into a [`RequestContext`].
pub struct Authenticator {
    hasher: KeyHasher,
    store: Arc<dyn ConfigStore>,
    cache: Arc<SnapshotCache>,
    bans: Arc<BanEngine>,
}

impl Authenticator {
    pub fn new(
        hasher: KeyHasher,
        store: Arc<dyn ConfigStore>,
        cache: Arc<SnapshotCache>,
        bans: Arc<BanEngine>,
    ) -> Self {
        Self {
            hasher,
            store,
            cache,
            bans,
        }
    }

    /// Validate the credential, resolve the template and check bans.
    ///
    /// # Arguments
    ///
    /// * `authorization` - Raw `Authorization` header value
    /// * `end_user_id` - Optional end-user identifier supplied by the caller
    ///
    /// # Errors
    ///
    /// - `Auth` for a missing, malformed or unknown key
    /// - `Forbidden` for an inactive key or tenant
    /// - `Banned` for an end user with an active ban
    /// - `ConfigResolution` when no template can be resolved
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
        end_user_id: Option<&str>,
    ) -> Result<RequestContext, GuardrailError> {
        let key = parse_bearer(authorization)?;
        let digest = self.hasher.digest(key)?;
        let api_key = self
            .store
            .find_api_key(&digest)
            .await?
            .ok_or_else(|| GuardrailError::Auth("unknown API key".to_string()))?;

        if !api_key.active {
            return Err(GuardrailError::Forbidden("API key is inactive".to_string()));
        }

        let tenant = self
            .store
            .tenant(&api_key.tenant_id)
            .await?
            .ok_or_else(|| GuardrailError::Auth("API key has no tenant".to_string()))?;
        if !tenant.active {
            return Err(GuardrailError::Forbidden("account is inactive".to_string()));
        }
        if !tenant.verified {
            return Err(GuardrailError::Forbidden("account is not verified".to_string()));
        }

        let config_set_id = self.resolve_config_set(&api_key, &tenant).await?;
        let snapshot = self.cache.get(&config_set_id).await?;

        let end_user_id = end_user_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        if let Some(user) = &end_user_id {
            match self.bans.check(&tenant.id, user).await {
                Ok(Some(ban)) => {
                    return Err(GuardrailError::Banned {
                        until: ban.banned_until,
                        reason: ban.reason,
                    })
                }
                Ok(None) => {}
                Err(e) => {
                    error!(tenant_id = %tenant.id, end_user_id = %user, error = %e, "Ban lookup failed, admitting request");
                }
            }
        }

        self.touch_in_background(&api_key.id);

        Ok(RequestContext {
            request_id: uuid::Uuid::new_v4().to_string(),
            tenant,
            api_key_id: api_key.id,
            end_user_id,
            snapshot,
        })
    }

    /// Key template → tenant default → resolution failure.
    async fn resolve_config_set(
        &self,
        api_key: &ApiKey,
        tenant: &Tenant,
    ) -> Result<String, GuardrailError> {
        if let Some(id) = &api_key.config_set_id {
            match self.store.config_set(id).await? {
                Some(cs) if cs.tenant_id == tenant.id => return Ok(cs.id),
                Some(_) => warn!(
                    api_key_id = %api_key.id,
                    config_set_id = %id,
                    "Key references another tenant's config set, using tenant default"
                ),
                None => warn!(
                    api_key_id = %api_key.id,
                    config_set_id = %id,
                    "Key references a missing config set, using tenant default"
                ),
            }
        }

        self.store
            .default_config_set(&tenant.id)
            .await?
            .map(|cs| cs.id)
            .ok_or_else(|| {
                GuardrailError::ConfigResolution(format!(
                    "tenant '{}' has no default config set",
                    tenant.id
                ))
            })
    }

    fn touch_in_background(&self, key_id: &str) {
        let store = Arc::clone(&self.store);
        let key_id = key_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = store.touch_api_key(&key_id, Utc::now()).await {
                warn!(api_key_id = %key_id, error = %e, "Failed to record key usage");
            }
        });
    }
}
