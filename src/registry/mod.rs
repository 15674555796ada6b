//! Shared heartbeat registry of running collector instances.
//!
//! Each process writes a TTL-expiring record and refreshes it periodically.
//! The sorted set of live records decides which page range each process owns.

mod heartbeat;
mod memory;
mod partition;

#[cfg(feature = "redis-backend")]
mod redis;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::models::{InstanceRecord, InstanceStatus};

pub use heartbeat::Heartbeat;
pub use memory::InMemoryRegistryBackend;
pub use partition::{partition, partition_pages, PageRange};

#[cfg(feature = "redis-backend")]
pub use redis::RedisRegistryBackend;

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Registry unavailable: {0}")]
    Unavailable(String),
    #[error("Registry backend error: {0}")]
    Backend(String),
    #[error("Instance {0} is not registered by this process")]
    NotRegistered(String),
    #[error("Instance {0} is not in the active set")]
    NotActive(String),
}

/// Heartbeat timing and where records live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Shared registry URL; local-only when unset.
    pub redis_url: Option<String>,
    pub heartbeat_ttl_secs: u64,
    /// Must stay below the TTL.
    pub heartbeat_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            heartbeat_ttl_secs: 30,
            heartbeat_interval_secs: 10,
        }
    }
}

impl RegistryConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.heartbeat_ttl_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

/// Storage for instance records; entries vanish once their TTL passes.
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    async fn write(&self, record: &InstanceRecord, ttl: Duration) -> RegistryResult<()>;

    async fn remove(&self, id: &str) -> RegistryResult<()>;

    /// Every unexpired record, in no particular order.
    async fn list(&self) -> RegistryResult<Vec<InstanceRecord>>;

    fn name(&self) -> &'static str;
}

pub struct InstanceRegistry {
    backend: Arc<dyn RegistryBackend>,
    ttl: Duration,
    owned: Mutex<HashMap<String, InstanceRecord>>,
}

impl InstanceRegistry {
    pub fn new(backend: Arc<dyn RegistryBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            owned: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(InMemoryRegistryBackend::new()), ttl)
    }

    /// Registry from config; an unreachable shared store is an error, not a
    /// silent switch to local-only partitioning.
    pub async fn connect(config: &RegistryConfig) -> RegistryResult<Self> {
        match config.redis_url.as_deref() {
            Some(url) => {
                let backend = connect_remote(url).await?;
                Ok(Self::new(backend, config.ttl()))
            }
            None => Ok(Self::in_memory(config.ttl())),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Write a fresh heartbeat record for `id`.
    pub async fn register(&self, id: &str) -> RegistryResult<InstanceRecord> {
        let record = InstanceRecord::new(id);
        self.backend.write(&record, self.ttl).await?;
        self.owned
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string(), record.clone());
        info!("Registered instance {} ({})", id, self.backend.name());
        Ok(record)
    }

    /// Re-write the heartbeat before the TTL runs out.
    pub async fn refresh(&self, id: &str) -> RegistryResult<()> {
        let record = {
            let mut owned = self.owned.lock().unwrap_or_else(|e| e.into_inner());
            let record = owned
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotRegistered(id.to_string()))?;
            record.touch();
            record.clone()
        };
        self.backend.write(&record, self.ttl).await?;
        debug!("Heartbeat refreshed for {}", id);
        Ok(())
    }

    pub async fn deregister(&self, id: &str) -> RegistryResult<()> {
        self.owned
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        self.backend.remove(id).await?;
        info!("Deregistered instance {}", id);
        Ok(())
    }

    /// Every stored record sorted by id, with `status` marked from the
    /// heartbeat age.
    pub async fn list_instances(&self) -> RegistryResult<Vec<InstanceRecord>> {
        let mut records = self.backend.list().await?;
        for record in &mut records {
            record.mark_liveness(self.ttl);
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    /// Live instances sorted by id, so every process derives the same order.
    pub async fn list_active(&self) -> RegistryResult<Vec<InstanceRecord>> {
        Ok(self
            .list_instances()
            .await?
            .into_iter()
            .filter(|r| r.status == InstanceStatus::Active)
            .collect())
    }

    /// Page range owned by `self_id` right now.
    pub async fn own_range(&self, total_pages: u32, self_id: &str) -> RegistryResult<PageRange> {
        let active = self.list_active().await?;
        let range = partition(total_pages, &active, self_id)?;
        debug!(
            "Instance {} owns pages {} of {} ({} active)",
            self_id,
            range,
            total_pages,
            active.len()
        );
        Ok(range)
    }
}

#[cfg(feature = "redis-backend")]
async fn connect_remote(url: &str) -> RegistryResult<Arc<dyn RegistryBackend>> {
    Ok(Arc::new(RedisRegistryBackend::new(url).await?))
}

#[cfg(not(feature = "redis-backend"))]
async fn connect_remote(_url: &str) -> RegistryResult<Arc<dyn RegistryBackend>> {
    Err(RegistryError::Unavailable(
        "built without redis-backend feature".to_string(),
    ))
}
