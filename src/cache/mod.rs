//! Tiered response cache fronting both sources.
//!
//! Values are JSON strings keyed `source:category:identifier`. The active
//! backend is Redis when reachable, otherwise an in-process map with the
//! same TTL semantics.

mod layer;
mod memory;

#[cfg(feature = "redis-backend")]
mod redis;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::Source;

pub use layer::CacheLayer;
pub use memory::MemoryCacheBackend;

#[cfg(feature = "redis-backend")]
pub use redis::RedisCacheBackend;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("Cache backend error: {0}")]
    Backend(String),
    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Volatility class of cached data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    /// Minutes: search results, list pages mid-refresh.
    Short,
    /// About an hour.
    Medium,
    /// About a day.
    Long,
    /// About a week: detailed profiles.
    ExtraLong,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Medium => "medium",
            Self::Long => "long",
            Self::ExtraLong => "extra_long",
        }
    }
}

/// Cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Redis URL; memory-only when unset.
    pub redis_url: Option<String>,
    pub key_prefix: String,
    pub short_ttl_secs: u64,
    pub medium_ttl_secs: u64,
    pub long_ttl_secs: u64,
    pub extra_long_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: "rosterwatch:cache:".to_string(),
            short_ttl_secs: 5 * 60,
            medium_ttl_secs: 60 * 60,
            long_ttl_secs: 24 * 60 * 60,
            extra_long_ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self, tier: CacheTier) -> Duration {
        let secs = match tier {
            CacheTier::Short => self.short_ttl_secs,
            CacheTier::Medium => self.medium_ttl_secs,
            CacheTier::Long => self.long_ttl_secs,
            CacheTier::ExtraLong => self.extra_long_ttl_secs,
        };
        Duration::from_secs(secs)
    }
}

/// Key/value storage with per-entry expiry.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Returns `None` on miss or after the entry expired.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    fn name(&self) -> &'static str;
}

/// Build a namespaced key, normalizing the identifier.
pub fn cache_key(source: Source, category: &str, identifier: &str) -> String {
    format!(
        "{}:{}:{}",
        source.as_str(),
        category,
        identifier.trim().to_lowercase()
    )
}
