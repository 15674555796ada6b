//! Redis cache backend shared by every collector instance.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use super::{CacheBackend, CacheError, CacheResult};

#[derive(Clone)]
pub struct RedisCacheBackend {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisCacheBackend {
    /// Connect and PING so an unreachable server fails here.
    pub async fn connect(redis_url: &str, key_prefix: &str) -> CacheResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CacheError::Unavailable(format!("Redis connection error: {}", e)))?;

        let mut conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        info!("Connected to Redis cache");
        Ok(Self {
            conn,
            key_prefix: key_prefix.to_string(),
        })
    }

    fn build_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn.clone();
        let full_key = self.build_key(key);
        let value: Option<String> = redis::cmd("GET")
            .arg(&full_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        debug!(
            "Cache {}: {}",
            if value.is_some() { "HIT" } else { "MISS" },
            full_key
        );
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        // PSETEX rejects zero
        let ttl_ms = ttl.as_millis().max(1) as u64;
        redis::cmd("PSETEX")
            .arg(self.build_key(key))
            .arg(ttl_ms)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(self.build_key(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(removed > 0)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
