//! Rate limiting for outbound source requests.
//!
//! Two gate shapes, chosen per source:
//! - Fixed spacing (minimum gap, longer gap for parse requests)
//! - Dual window (every budget tier must have room)
//!
//! Window counters live in a pluggable backend:
//! - In-memory (default, per process)
//! - Redis (shared by every instance)
//!
//! `BackoffController` handles rejections once a request is out.

mod backend;
mod backoff;
mod config;
mod limiter;
mod memory;
mod spacing;
mod window;

#[cfg(feature = "redis-backend")]
mod redis;

pub use backend::{RateLimitError, RateLimitResult, RateLimitWindow, WindowBackend};
pub use backoff::{BackoffController, Backoffable, RetryHint};
pub use config::{BackoffConfig, GateStats, LimitConfig, WindowBudget};
pub use limiter::RateLimiter;
pub use memory::InMemoryWindowBackend;
pub use spacing::SpacingLimiter;
pub use window::WindowLimiter;

#[cfg(feature = "redis-backend")]
pub use redis::RedisWindowBackend;

/// Parse Retry-After header value (seconds).
/// Returns duration to wait, or None if header is missing/invalid.
pub fn parse_retry_after(header_value: Option<&str>) -> Option<std::time::Duration> {
    let value = header_value?;
    value
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| std::time::Duration::from_secs(secs.min(60)))
}
