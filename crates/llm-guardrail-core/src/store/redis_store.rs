//! Redis-backed shared store.
//!
//! Uses [`redis::aio::ConnectionManager`] for automatic reconnection. Counter
//! and event-set updates run inside `MULTI`/`EXEC`, so every worker process
//! observes one consistent count.

use super::SharedStore;
use crate::error::GuardrailError;
use async_trait::async_trait;
use std::time::Duration;

/// Shared store on a Redis instance.
pub struct RedisSharedStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisSharedStore {
    /// Connect to `url`, e.g. `redis://127.0.0.1:6379/0`.
    pub async fn connect(url: &str) -> Result<Self, GuardrailError> {
        let client = redis::Client::open(url)
            .map_err(|e| GuardrailError::Store(format!("Invalid Redis URL: {e}")))?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| GuardrailError::Store(format!("Failed to connect to Redis: {e}")))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl SharedStore for RedisSharedStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, GuardrailError> {
        let mut conn = self.conn.clone();
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn record_event(
        &self,
        key: &str,
        at_ms: i64,
        window: Duration,
    ) -> Result<u64, GuardrailError> {
        let mut conn = self.conn.clone();
        let window_ms = window.as_millis() as i64;
        let member = format!("{at_ms}-{}", uuid::Uuid::new_v4().simple());
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(key)
            .arg(at_ms)
            .arg(member)
            .ignore()
            .cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(at_ms - window_ms)
            .ignore()
            .cmd("ZCARD")
            .arg(key)
            .cmd("PEXPIRE")
            .arg(key)
            .arg(window_ms.max(1))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, GuardrailError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), GuardrailError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg((ttl.as_millis() as u64).max(1))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, GuardrailError> {
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn health_check(&self) -> Result<(), GuardrailError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
