//! Per-tenant request admission.
//!
//! Fixed one-second windows counted in the shared store under
//! `ratelimit:{tenant_id}:{epoch_second}`. The count is aggregated across all
//! of a tenant's keys and all worker processes.

use crate::error::GuardrailError;
use crate::store::SharedStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

const WINDOW_TTL: Duration = Duration::from_secs(2);

/// Result of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Exceeded { limit: u32, retry_after_secs: u64 },
}

impl RateLimitDecision {
    pub fn into_result(self) -> Result<(), GuardrailError> {
        match self {
            RateLimitDecision::Allowed => Ok(()),
            RateLimitDecision::Exceeded {
                limit,
                retry_after_secs,
            } => Err(GuardrailError::RateLimited {
                limit,
                retry_after_secs,
            }),
        }
    }
}

/// Tenant rate limiter over a [`SharedStore`].
pub struct RateLimiter {
    store: Arc<dyn SharedStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Count one request for `tenant_id` against `limit_rps`. A limit of 0
    /// means unlimited.
    pub async fn check(&self, tenant_id: &str, limit_rps: u32) -> RateLimitDecision {
        self.check_at(tenant_id, limit_rps, Utc::now().timestamp())
            .await
    }

    pub async fn check_at(
        &self,
        tenant_id: &str,
        limit_rps: u32,
        epoch_second: i64,
    ) -> RateLimitDecision {
        if limit_rps == 0 {
            return RateLimitDecision::Allowed;
        }

        let key = format!("ratelimit:{tenant_id}:{epoch_second}");
        match self.store.increment(&key, WINDOW_TTL).await {
            Ok(count) if count > u64::from(limit_rps) => {
                debug!(tenant_id, count, limit = limit_rps, "Rate limit exceeded");
                RateLimitDecision::Exceeded {
                    limit: limit_rps,
                    retry_after_secs: 1,
                }
            }
            Ok(_) => RateLimitDecision::Allowed,
            Err(e) => {
                // Fails open on counter store outage.
                error!(tenant_id, error = %e, "Rate limit counter unavailable, admitting request");
                RateLimitDecision::Allowed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemorySharedStore;
    use async_trait::async_trait;

    #[tokio::test]
    async fn test_two_per_second_admits_two_of_five() {
        let limiter = RateLimiter::new(Arc::new(InMemorySharedStore::new()));
        let now = 1_700_000_000;
        let mut allowed = 0;
        for _ in 0..5 {
            if limiter.check_at("t1", 2, now).await == RateLimitDecision::Allowed {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 2);
    }

    #[tokio::test]
    async fn test_new_window_resets() {
        let limiter = RateLimiter::new(Arc::new(InMemorySharedStore::new()));
        assert_eq!(limiter.check_at("t1", 1, 100).await, RateLimitDecision::Allowed);
        assert!(matches!(
            limiter.check_at("t1", 1, 100).await,
            RateLimitDecision::Exceeded { retry_after_secs: 1, .. }
        ));
        assert_eq!(limiter.check_at("t1", 1, 101).await, RateLimitDecision::Allowed);
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() {
        let limiter = RateLimiter::new(Arc::new(InMemorySharedStore::new()));
        assert_eq!(limiter.check_at("a", 1, 5).await, RateLimitDecision::Allowed);
        assert_eq!(limiter.check_at("b", 1, 5).await, RateLimitDecision::Allowed);
    }

    #[tokio::test]
    async fn test_zero_is_unlimited() {
        let limiter = RateLimiter::new(Arc::new(InMemorySharedStore::new()));
        for _ in 0..100 {
            assert_eq!(limiter.check("t1", 0).await, RateLimitDecision::Allowed);
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl SharedStore for BrokenStore {
        async fn increment(&self, _: &str, _: Duration) -> Result<u64, GuardrailError> {
            Err(GuardrailError::Store("down".into()))
        }
        async fn record_event(&self, _: &str, _: i64, _: Duration) -> Result<u64, GuardrailError> {
            Err(GuardrailError::Store("down".into()))
        }
        async fn get(&self, _: &str) -> Result<Option<Vec<u8>>, GuardrailError> {
            Err(GuardrailError::Store("down".into()))
        }
        async fn set(&self, _: &str, _: &[u8], _: Duration) -> Result<(), GuardrailError> {
            Err(GuardrailError::Store("down".into()))
        }
        async fn delete(&self, _: &str) -> Result<bool, GuardrailError> {
            Err(GuardrailError::Store("down".into()))
        }
        async fn health_check(&self) -> Result<(), GuardrailError> {
            Err(GuardrailError::Store("down".into()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_admits() {
        let limiter = RateLimiter::new(Arc::new(BrokenStore));
        assert_eq!(limiter.check("t1", 1).await, RateLimitDecision::Allowed);
    }

    #[test]
    fn test_into_result() {
        let err = RateLimitDecision::Exceeded {
            limit: 2,
            retry_after_secs: 1,
        }
        .into_result()
        .unwrap_err();
        assert_eq!(err.status_code(), 429);
    }
}
