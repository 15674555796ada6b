//! Pluggable storage for request-budget windows.
//!
//! Allows swapping between in-memory (single process) and Redis
//! (budget shared by every instance hitting the same source).

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

use super::config::WindowBudget;

/// Result type for rate limit operations.
pub type RateLimitResult<T> = Result<T, RateLimitError>;

/// Errors from rate limit backend operations.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Request counter for one budget tier.
///
/// The counter never exceeds the tier's budget within a window.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitWindow {
    pub count: u32,
    pub reset_at: Instant,
}

impl RateLimitWindow {
    pub fn open(now: Instant, period: Duration) -> Self {
        Self {
            count: 0,
            reset_at: now + period,
        }
    }

    /// Start a fresh window if this one has elapsed.
    pub fn roll(&mut self, now: Instant, period: Duration) {
        if now >= self.reset_at {
            self.count = 0;
            self.reset_at = now + period;
        }
    }

    pub fn time_until_reset(&self, now: Instant) -> Duration {
        self.reset_at.saturating_duration_since(now)
    }
}

/// Trait for window storage backends.
///
/// Implementations must make check-and-count atomic per key.
#[async_trait]
pub trait WindowBackend: Send + Sync {
    /// Take one request slot in every tier.
    ///
    /// Returns `None` when admitted (all tiers counted), or the time to wait
    /// when any tier is exhausted (nothing counted). The wait is the largest
    /// time-until-reset among exhausted tiers.
    async fn try_acquire(
        &self,
        key: &str,
        tiers: &[WindowBudget],
    ) -> RateLimitResult<Option<Duration>>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}
