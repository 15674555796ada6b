//! In-process cache backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::{CacheBackend, CacheResult};

/// Prune expired entries once the map grows past this.
const PRUNE_THRESHOLD: usize = 1_000;

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Clone, Default)]
pub struct MemoryCacheBackend {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );
        if entries.len() > PRUNE_THRESHOLD {
            entries.retain(|_, entry| !entry.is_expired(now));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let now = Instant::now();
        let removed = self.entries.write().await.remove(key);
        Ok(removed.is_some_and(|e| !e.is_expired(now)))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = MemoryCacheBackend::new();
        cache
            .set("stats:search:faker", "{}".into(), Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(
            cache.get("stats:search:faker").await.unwrap(),
            Some("{}".to_string())
        );

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("stats:search:faker").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete() {
        let cache = MemoryCacheBackend::new();
        cache
            .set("k", "v".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(cache.delete("k").await.unwrap());
        assert!(!cache.delete("k").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entries_pruned_when_large() {
        let cache = MemoryCacheBackend::new();
        for i in 0..PRUNE_THRESHOLD {
            cache
                .set(&format!("old:{i}"), "v".into(), Duration::from_secs(1))
                .await
                .unwrap();
        }
        tokio::time::advance(Duration::from_secs(2)).await;
        cache
            .set("fresh", "v".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.len().await, 1);
    }
}
