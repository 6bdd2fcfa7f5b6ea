//! Redis cache for served display sets.
//!
//! Keys follow the pattern `nova:suggested:display:{owner_id}` and hold the
//! JSON `CachedDisplaySet`. Entries are short-lived (TTL) and deleted
//! explicitly whenever the owner's persisted set is replaced.

use redis::aio::ConnectionManager;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::RedisConfig;
use crate::domain::CachedDisplaySet;
use crate::error::Result;
use crate::metrics;

#[derive(Clone)]
pub struct SuggestionCache {
    client: Arc<ConnectionManager>,
    key_prefix: String,
    ttl_sec: u64,
}

impl SuggestionCache {
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let manager = ConnectionManager::new(client).await?;

        Ok(Self {
            client: Arc::new(manager),
            key_prefix: config.display_key_prefix.clone(),
            ttl_sec: config.display_ttl_sec,
        })
    }

    /// Ping Redis to check connection health
    pub async fn ping(&self) -> Result<()> {
        // Cloning the ConnectionManager yields a handle onto the same
        // underlying multiplexed connection.
        let mut conn = self.client.as_ref().clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }

    fn display_key(&self, owner_id: Uuid) -> String {
        format!("{}:{}", self.key_prefix, owner_id)
    }

    /// Cached display set for an owner; None on miss.
    pub async fn get_display_set(&self, owner_id: Uuid) -> Result<Option<CachedDisplaySet>> {
        let key = self.display_key(owner_id);
        let mut conn = self.client.as_ref().clone();

        let value: Option<String> = redis::cmd("GET")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                warn!("Redis GET failed for {}: {}", key, e);
                e
            })?;

        match value {
            Some(json) => match serde_json::from_str::<CachedDisplaySet>(&json) {
                Ok(cached) => {
                    metrics::record_cache_request(true);
                    debug!("Cache hit for {}", key);
                    Ok(Some(cached))
                }
                Err(e) => {
                    // A stale payload shape is a miss, not a failure.
                    warn!("Cache deserialization failed for {}: {}", key, e);
                    metrics::record_cache_request(false);
                    Ok(None)
                }
            },
            None => {
                metrics::record_cache_request(false);
                debug!("Cache miss for {}", key);
                Ok(None)
            }
        }
    }

    pub async fn set_display_set(&self, owner_id: Uuid, set: &CachedDisplaySet) -> Result<()> {
        let key = self.display_key(owner_id);
        let json = serde_json::to_string(set)
            .map_err(|e| crate::error::AppError::Internal(format!("Cache serialization failed: {}", e)))?;
        let mut conn = self.client.as_ref().clone();

        redis::cmd("SETEX")
            .arg(&key)
            .arg(self.ttl_sec)
            .arg(&json)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| {
                warn!("Redis SETEX failed for {}: {}", key, e);
                e
            })?;

        debug!("Cached display set for {} with TTL={}s", key, self.ttl_sec);
        Ok(())
    }

    /// Drop the owner's cached display set (after every persisted replace).
    pub async fn invalidate(&self, owner_id: Uuid) -> Result<()> {
        let key = self.display_key(owner_id);
        let mut conn = self.client.as_ref().clone();

        redis::cmd("DEL")
            .arg(&key)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| {
                warn!("Redis DEL failed for {}: {}", key, e);
                e
            })?;

        debug!("Invalidated display cache for {}", key);
        Ok(())
    }
}
