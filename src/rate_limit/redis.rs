//! Redis-backed window budgets shared by every collector instance.
//!
//! One counter key per tier; the key's TTL is the window. Check-and-count
//! runs in a single Lua script so concurrent instances cannot overshoot.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;

use super::backend::{RateLimitError, RateLimitResult, WindowBackend};
use super::config::WindowBudget;

/// Key prefix for window counters.
pub const KEY_PREFIX: &str = "rosterwatch:ratelimit:";

// KEYS: one counter per tier. ARGV: limit_1, period_ms_1, limit_2, ...
// Returns 0 when admitted, otherwise the wait in milliseconds.
const ACQUIRE_SCRIPT: &str = r#"
    local wait = 0
    for i, key in ipairs(KEYS) do
        local limit = tonumber(ARGV[i * 2 - 1])
        local period = tonumber(ARGV[i * 2])
        local count = tonumber(redis.call('GET', key)) or 0
        if count >= limit then
            local ttl = redis.call('PTTL', key)
            if ttl < 0 then
                -- Counter lost its expiry; restore it so the window can end
                redis.call('PEXPIRE', key, period)
                ttl = period
            end
            if ttl > wait then
                wait = ttl
            end
        end
    end
    if wait > 0 then
        return wait
    end
    for i, key in ipairs(KEYS) do
        local period = tonumber(ARGV[i * 2])
        local count = redis.call('INCR', key)
        if count == 1 then
            redis.call('PEXPIRE', key, period)
        end
    end
    return 0
"#;

/// Redis window storage.
#[derive(Clone)]
pub struct RedisWindowBackend {
    conn: ConnectionManager,
}

impl RedisWindowBackend {
    /// Connect to Redis.
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    pub async fn new(redis_url: &str) -> RateLimitResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| RateLimitError::Unavailable(format!("Redis connection error: {}", e)))?;

        let conn = ConnectionManager::new(client).await.map_err(|e| {
            RateLimitError::Unavailable(format!("Redis connection manager error: {}", e))
        })?;

        Ok(Self { conn })
    }
}

fn tier_key(key: &str, tier: usize) -> String {
    format!("{}window:{}:{}", KEY_PREFIX, key, tier)
}

#[async_trait]
impl WindowBackend for RedisWindowBackend {
    async fn try_acquire(
        &self,
        key: &str,
        tiers: &[WindowBudget],
    ) -> RateLimitResult<Option<Duration>> {
        let mut conn = self.conn.clone();
        let script = Script::new(ACQUIRE_SCRIPT);
        let mut invocation = script.prepare_invoke();
        for i in 0..tiers.len() {
            invocation.key(tier_key(key, i));
        }
        for tier in tiers {
            invocation.arg(tier.requests).arg(tier.period_ms);
        }

        let wait_ms: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| RateLimitError::Backend(e.to_string()))?;

        if wait_ms > 0 {
            Ok(Some(Duration::from_millis(wait_ms as u64)))
        } else {
            Ok(None)
        }
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
