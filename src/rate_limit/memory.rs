//! In-memory window backend for single-process operation.
//!
//! State is not shared with other instances nor persisted across restarts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::backend::{RateLimitResult, RateLimitWindow, WindowBackend};
use super::config::WindowBudget;

/// In-memory window backend.
#[derive(Clone, Default)]
pub struct InMemoryWindowBackend {
    windows: Arc<Mutex<HashMap<String, Vec<RateLimitWindow>>>>,
}

impl InMemoryWindowBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Infallible acquire, also used as the fallback path of remote backends.
    pub async fn acquire_local(&self, key: &str, tiers: &[WindowBudget]) -> Option<Duration> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let entry = windows.entry(key.to_string()).or_default();
        if entry.len() != tiers.len() {
            *entry = tiers
                .iter()
                .map(|t| RateLimitWindow::open(now, t.period()))
                .collect();
        }

        let mut wait = Duration::ZERO;
        for (window, tier) in entry.iter_mut().zip(tiers) {
            window.roll(now, tier.period());
            if window.count >= tier.requests {
                wait = wait.max(window.time_until_reset(now));
            }
        }
        if wait > Duration::ZERO {
            return Some(wait);
        }

        for (window, tier) in entry.iter_mut().zip(tiers) {
            window.count += 1;
            debug_assert!(window.count <= tier.requests);
        }
        None
    }

    /// Current counters for a key (for stats and tests).
    pub async fn counts(&self, key: &str) -> Vec<u32> {
        let windows = self.windows.lock().await;
        windows
            .get(key)
            .map(|w| w.iter().map(|w| w.count).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl WindowBackend for InMemoryWindowBackend {
    async fn try_acquire(
        &self,
        key: &str,
        tiers: &[WindowBudget],
    ) -> RateLimitResult<Option<Duration>> {
        Ok(self.acquire_local(key, tiers).await)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiers() -> Vec<WindowBudget> {
        vec![
            WindowBudget::new(2, Duration::from_secs(1)),
            WindowBudget::new(3, Duration::from_secs(10)),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn test_admits_until_short_budget_exhausted() {
        let backend = InMemoryWindowBackend::new();
        assert_eq!(backend.acquire_local("stats", &tiers()).await, None);
        assert_eq!(backend.acquire_local("stats", &tiers()).await, None);

        let wait = backend.acquire_local("stats", &tiers()).await.unwrap();
        assert!(wait > Duration::ZERO && wait <= Duration::from_secs(1));
        // Refused requests are not counted
        assert_eq!(backend.counts("stats").await, vec![2, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_window_wait_dominates() {
        let backend = InMemoryWindowBackend::new();
        backend.acquire_local("stats", &tiers()).await;
        backend.acquire_local("stats", &tiers()).await;
        tokio::time::advance(Duration::from_millis(1_100)).await;
        backend.acquire_local("stats", &tiers()).await;

        // Short tier has room (1/2) but long tier is at 3/3.
        let wait = backend.acquire_local("stats", &tiers()).await.unwrap();
        assert!(wait > Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_period() {
        let backend = InMemoryWindowBackend::new();
        backend.acquire_local("stats", &tiers()).await;
        backend.acquire_local("stats", &tiers()).await;
        assert!(backend.acquire_local("stats", &tiers()).await.is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(backend.acquire_local("stats", &tiers()).await, None);
        assert_eq!(backend.counts("stats").await, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let backend = InMemoryWindowBackend::new();
        backend.acquire_local("a", &tiers()).await;
        backend.acquire_local("a", &tiers()).await;
        assert_eq!(backend.acquire_local("b", &tiers()).await, None);
    }
}
