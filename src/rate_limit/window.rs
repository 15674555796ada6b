//! Dual-window gate: every budget tier must have room before a request goes out.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use super::backend::WindowBackend;
use super::config::WindowBudget;
use super::memory::InMemoryWindowBackend;

/// Token-bucket-like limiter over one or more fixed windows.
pub struct WindowLimiter {
    key: String,
    tiers: Vec<WindowBudget>,
    backend: Arc<dyn WindowBackend>,
    fallback: InMemoryWindowBackend,
}

impl WindowLimiter {
    pub fn new(key: impl Into<String>, tiers: Vec<WindowBudget>, backend: Arc<dyn WindowBackend>) -> Self {
        Self {
            key: key.into(),
            tiers,
            backend,
            fallback: InMemoryWindowBackend::new(),
        }
    }

    pub fn in_memory(key: impl Into<String>, tiers: Vec<WindowBudget>) -> Self {
        Self::new(key, tiers, Arc::new(InMemoryWindowBackend::new()))
    }

    pub fn tiers(&self) -> &[WindowBudget] {
        &self.tiers
    }

    /// Block until every tier admits the request.
    ///
    /// When a tier is exhausted the caller sleeps for the largest
    /// time-until-reset and checks again; it never proceeds early.
    /// Returns how long the caller waited.
    pub async fn wait(&self) -> Duration {
        let start = Instant::now();
        loop {
            let verdict = match self.backend.try_acquire(&self.key, &self.tiers).await {
                Ok(verdict) => verdict,
                Err(e) => {
                    warn!(
                        "Window backend '{}' failed for {}: {}; using local budget",
                        self.backend.name(),
                        self.key,
                        e
                    );
                    self.fallback.acquire_local(&self.key, &self.tiers).await
                }
            };

            match verdict {
                None => return start.elapsed(),
                Some(wait) => {
                    debug!("Budget exhausted for {}: waiting {:?}", self.key, wait);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::backend::{RateLimitError, RateLimitResult};
    use async_trait::async_trait;

    fn stats_tiers() -> Vec<WindowBudget> {
        vec![
            WindowBudget::new(20, Duration::from_secs(1)),
            WindowBudget::new(100, Duration::from_secs(120)),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_over_short_budget_blocks_until_reset() {
        let limiter = WindowLimiter::in_memory("stats", stats_tiers());
        let start = Instant::now();

        for _ in 0..20 {
            assert_eq!(limiter.wait().await, Duration::ZERO);
        }
        assert_eq!(Instant::now(), start);

        limiter.wait().await;
        assert!(Instant::now() - start >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_budget_blocks_for_long_window() {
        let limiter = WindowLimiter::in_memory("stats", stats_tiers());
        let start = Instant::now();

        for _ in 0..100 {
            limiter.wait().await;
        }
        // 100 requests at 20/s take at least 4 full short windows
        assert!(Instant::now() - start >= Duration::from_secs(4));

        limiter.wait().await;
        assert!(Instant::now() - start >= Duration::from_secs(120));
    }

    struct BrokenBackend;

    #[async_trait]
    impl WindowBackend for BrokenBackend {
        async fn try_acquire(
            &self,
            _key: &str,
            _tiers: &[WindowBudget],
        ) -> RateLimitResult<Option<Duration>> {
            Err(RateLimitError::Unavailable("connection refused".into()))
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_failure_falls_back_to_local_budget() {
        let tiers = vec![WindowBudget::new(2, Duration::from_secs(1))];
        let limiter = WindowLimiter::new("stats", tiers, Arc::new(BrokenBackend));
        let start = Instant::now();

        limiter.wait().await;
        limiter.wait().await;
        assert_eq!(Instant::now(), start);

        limiter.wait().await;
        assert!(Instant::now() - start >= Duration::from_secs(1));
    }
}
