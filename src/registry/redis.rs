//! Redis registry backend: one `SET EX` key per instance.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::debug;

use super::{RegistryBackend, RegistryError, RegistryResult};
use crate::models::InstanceRecord;

pub const KEY_PREFIX: &str = "rosterwatch:instance:";

#[derive(Clone)]
pub struct RedisRegistryBackend {
    conn: ConnectionManager,
}

impl RedisRegistryBackend {
    pub async fn new(redis_url: &str) -> RegistryResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| RegistryError::Unavailable(format!("Redis connection error: {}", e)))?;

        let conn = ConnectionManager::new(client).await.map_err(|e| {
            RegistryError::Unavailable(format!("Redis connection manager error: {}", e))
        })?;

        Ok(Self { conn })
    }
}

fn instance_key(id: &str) -> String {
    format!("{}{}", KEY_PREFIX, id)
}

#[async_trait]
impl RegistryBackend for RedisRegistryBackend {
    async fn write(&self, record: &InstanceRecord, ttl: Duration) -> RegistryResult<()> {
        let mut conn = self.conn.clone();
        let payload =
            serde_json::to_string(record).map_err(|e| RegistryError::Backend(e.to_string()))?;

        redis::cmd("SET")
            .arg(instance_key(&record.id))
            .arg(payload)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| RegistryError::Unavailable(e.to_string()))
    }

    async fn remove(&self, id: &str) -> RegistryResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(instance_key(id))
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| RegistryError::Unavailable(e.to_string()))
    }

    async fn list(&self) -> RegistryResult<Vec<InstanceRecord>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", KEY_PREFIX);
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(&pattern)
            .query_async(&mut conn)
            .await
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;

        if keys.is_empty() {
            return Ok(Vec::new());
        }

        // Keys may expire between KEYS and MGET
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| RegistryError::Unavailable(e.to_string()))?;

        let mut records = Vec::with_capacity(values.len());
        for (key, value) in keys.iter().zip(values) {
            let Some(raw) = value else { continue };
            match serde_json::from_str::<InstanceRecord>(&raw) {
                Ok(record) => records.push(record),
                Err(e) => debug!("Skipping malformed instance record {}: {}", key, e),
            }
        }
        Ok(records)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
