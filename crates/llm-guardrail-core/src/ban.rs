//! Sliding-window end-user ban engine.
//!
//! Qualifying detection events are recorded per `(config set, end user)` in a
//! time-ordered set in the shared store. When the count inside the rolling
//! window reaches the trigger, a ban record is written for `(tenant, end user)`
//! with a TTL equal to the ban duration and the event set is cleared.
//!
//! Ban checks are a single read. Records past `banned_until` are ignored, so
//! expiry needs no sweeper.

use crate::error::GuardrailError;
use crate::model::{BanPolicy, BannedUser, RiskLevel};
use crate::store::SharedStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

fn events_key(config_set_id: &str, end_user_id: &str) -> String {
    format!("ban:events:{config_set_id}:{end_user_id}")
}

fn ban_key(tenant_id: &str, end_user_id: &str) -> String {
    format!("ban:user:{tenant_id}:{end_user_id}")
}

/// Ban state reader and writer.
pub struct BanEngine {
    store: Arc<dyn SharedStore>,
}

impl BanEngine {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Active ban of `end_user_id`, if any.
    pub async fn check(
        &self,
        tenant_id: &str,
        end_user_id: &str,
    ) -> Result<Option<BannedUser>, GuardrailError> {
        self.check_at(tenant_id, end_user_id, Utc::now()).await
    }

    pub async fn check_at(
        &self,
        tenant_id: &str,
        end_user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<BannedUser>, GuardrailError> {
        let Some(raw) = self.store.get(&ban_key(tenant_id, end_user_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_slice::<BannedUser>(&raw) {
            Ok(ban) if ban.is_active_at(now) => Ok(Some(ban)),
            Ok(_) => Ok(None),
            Err(e) => {
                warn!(tenant_id, end_user_id, error = %e, "Discarding unreadable ban record");
                Ok(None)
            }
        }
    }

    /// Feed one verdict. Returns the ban if this event triggered one.
    pub async fn observe(
        &self,
        policy: &BanPolicy,
        tenant_id: &str,
        end_user_id: &str,
        level: RiskLevel,
    ) -> Result<Option<BannedUser>, GuardrailError> {
        self.observe_at(policy, tenant_id, end_user_id, level, Utc::now())
            .await
    }

    pub async fn observe_at(
        &self,
        policy: &BanPolicy,
        tenant_id: &str,
        end_user_id: &str,
        level: RiskLevel,
        at: DateTime<Utc>,
    ) -> Result<Option<BannedUser>, GuardrailError> {
        if !policy.enabled || level == RiskLevel::NoRisk || level < policy.trigger_risk_level {
            return Ok(None);
        }

        let window = Duration::from_secs(u64::from(policy.time_window_minutes) * 60);
        let events_key = events_key(&policy.config_set_id, end_user_id);
        let count = self
            .store
            .record_event(&events_key, at.timestamp_millis(), window)
            .await?;

        if count < u64::from(policy.trigger_count) {
            return Ok(None);
        }

        let duration = ChronoDuration::minutes(i64::from(policy.ban_duration_minutes));
        let ban = BannedUser {
            tenant_id: tenant_id.to_string(),
            end_user_id: end_user_id.to_string(),
            banned_until: at + duration,
            reason: format!(
                "{count} events at or above {} within {} minutes",
                policy.trigger_risk_level, policy.time_window_minutes
            ),
        };
        let payload = serde_json::to_vec(&ban)
            .map_err(|e| GuardrailError::Store(format!("ban record: {e}")))?;
        let ttl = Duration::from_secs(u64::from(policy.ban_duration_minutes).max(1) * 60);
        self.store
            .set(&ban_key(tenant_id, end_user_id), &payload, ttl)
            .await?;
        self.store.delete(&events_key).await?;

        info!(
            tenant_id,
            end_user_id,
            banned_until = %ban.banned_until,
            "End user banned"
        );
        Ok(Some(ban))
    }

    /// Administrative unban. Returns whether a record existed.
    pub async fn unban(&self, tenant_id: &str, end_user_id: &str) -> Result<bool, GuardrailError> {
        let removed = self.store.delete(&ban_key(tenant_id, end_user_id)).await?;
        if removed {
            info!(tenant_id, end_user_id, "End user unbanned");
        }
        Ok(removed)
    }
}
