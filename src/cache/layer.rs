//! Cache facade with silent degradation to the in-process backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::memory::MemoryCacheBackend;
use super::{CacheBackend, CacheConfig, CacheError, CacheResult, CacheTier};

/// Holds one active backend, swapped to memory on the first remote failure.
///
/// Callers see the same contract either way; only durability and sharing
/// across instances change.
pub struct CacheLayer {
    active: RwLock<Arc<dyn CacheBackend>>,
    fallback: Arc<MemoryCacheBackend>,
    degraded: AtomicBool,
    config: CacheConfig,
}

impl CacheLayer {
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        Self {
            active: RwLock::new(backend),
            fallback: Arc::new(MemoryCacheBackend::new()),
            degraded: AtomicBool::new(false),
            config,
        }
    }

    pub fn in_memory(config: CacheConfig) -> Self {
        Self::new(Arc::new(MemoryCacheBackend::new()), config)
    }

    /// Use Redis when configured and reachable, memory otherwise.
    pub async fn connect(config: CacheConfig) -> Self {
        if let Some(url) = config.redis_url.as_deref() {
            match connect_remote(url, &config.key_prefix).await {
                Ok(backend) => return Self::new(backend, config),
                Err(e) => warn!("Redis cache unavailable ({}); using in-memory cache", e),
            }
        }
        Self::in_memory(config)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend().name()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn backend(&self) -> Arc<dyn CacheBackend> {
        self.active
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Swap to the in-process backend for good.
    fn degrade(&self, err: &CacheError) -> Arc<dyn CacheBackend> {
        let fallback: Arc<dyn CacheBackend> = self.fallback.clone();
        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!(
                "Cache backend '{}' failed ({}); falling back to in-memory cache",
                self.backend().name(),
                err
            );
            *self.active.write().unwrap_or_else(|e| e.into_inner()) = fallback.clone();
        }
        fallback
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let backend = self.backend();
        let result = match backend.get(key).await {
            Ok(value) => Ok(value),
            Err(e) => self.degrade(&e).get(key).await,
        };
        // The memory backend does not fail
        result.unwrap_or_default()
    }

    pub async fn set(&self, key: &str, value: String, tier: CacheTier) {
        let ttl = self.config.ttl(tier);
        let backend = self.backend();
        if let Err(e) = backend.set(key, value.clone(), ttl).await {
            let _ = self.degrade(&e).set(key, value, ttl).await;
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        let backend = self.backend();
        match backend.delete(key).await {
            Ok(existed) => existed,
            Err(e) => self.degrade(&e).delete(key).await.unwrap_or(false),
        }
    }

    /// Read and decode a JSON value; undecodable entries count as a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("Discarding undecodable cache entry {}: {}", key, e);
                None
            }
        }
    }

    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        tier: CacheTier,
    ) -> CacheResult<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, raw, tier).await;
        Ok(())
    }
}

#[cfg(feature = "redis-backend")]
async fn connect_remote(url: &str, key_prefix: &str) -> CacheResult<Arc<dyn CacheBackend>> {
    let backend = super::RedisCacheBackend::connect(url, key_prefix).await?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "redis-backend"))]
async fn connect_remote(_url: &str, _key_prefix: &str) -> CacheResult<Arc<dyn CacheBackend>> {
    Err(CacheError::Unavailable(
        "built without redis-backend feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    struct UnreachableBackend;

    #[async_trait]
    impl CacheBackend for UnreachableBackend {
        async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
            Err(CacheError::Unavailable("connection refused".into()))
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> CacheResult<()> {
            Err(CacheError::Unavailable("connection refused".into()))
        }

        async fn delete(&self, _key: &str) -> CacheResult<bool> {
            Err(CacheError::Unavailable("connection refused".into()))
        }

        fn name(&self) -> &'static str {
            "unreachable"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_trip_before_and_after_ttl() {
        let cache = CacheLayer::in_memory(CacheConfig::default());
        cache.set("stats:search:faker", "v".into(), CacheTier::Short).await;
        assert_eq!(cache.get("stats:search:faker").await.as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(5 * 60)).await;
        assert_eq!(cache.get("stats:search:faker").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_backend_degrades_silently() {
        let cache = CacheLayer::new(Arc::new(UnreachableBackend), CacheConfig::default());
        assert_eq!(cache.backend_name(), "unreachable");

        cache.set("k", "v".into(), CacheTier::Medium).await;
        assert!(cache.is_degraded());
        assert_eq!(cache.backend_name(), "memory");
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(3_600)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_failed_read_on_remote_is_a_miss() {
        let cache = CacheLayer::new(Arc::new(UnreachableBackend), CacheConfig::default());
        assert_eq!(cache.get("k").await, None);
        assert!(!cache.delete("k").await);
        assert!(cache.is_degraded());
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let cache = CacheLayer::in_memory(CacheConfig::default());
        cache
            .set_json("k", &vec![1, 2, 3], CacheTier::Long)
            .await
            .unwrap();
        assert_eq!(cache.get_json::<Vec<i32>>("k").await, Some(vec![1, 2, 3]));

        cache.set("bad", "not json".into(), CacheTier::Long).await;
        assert_eq!(cache.get_json::<Vec<i32>>("bad").await, None);
    }

    #[tokio::test]
    async fn test_connect_without_url_uses_memory() {
        let cache = CacheLayer::connect(CacheConfig::default()).await;
        assert_eq!(cache.backend_name(), "memory");
        assert!(!cache.is_degraded());
    }
}
