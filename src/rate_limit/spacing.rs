//! Fixed-spacing gate: minimum delay between consecutive requests.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::models::OpClass;

#[derive(Debug, Default)]
struct SpacingState {
    last_any: Option<Instant>,
    last_by_class: HashMap<OpClass, Instant>,
}

/// Enforces `min_spacing` between any two requests and an additional
/// per-class spacing (e.g. 30s between parse requests).
///
/// Callers are serialized: the lock is held while sleeping, so the gap
/// between consecutive permitted requests is never below the spacing.
#[derive(Debug)]
pub struct SpacingLimiter {
    min_spacing: Duration,
    class_spacing: HashMap<OpClass, Duration>,
    state: Mutex<SpacingState>,
}

impl SpacingLimiter {
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            min_spacing,
            class_spacing: HashMap::new(),
            state: Mutex::new(SpacingState::default()),
        }
    }

    /// Require `spacing` between two requests of `class`.
    pub fn with_class_spacing(mut self, class: OpClass, spacing: Duration) -> Self {
        self.class_spacing.insert(class, spacing);
        self
    }

    /// Block until the spacing for `op` is satisfied, then record the request.
    ///
    /// Returns how long the caller waited.
    pub async fn wait(&self, op: OpClass) -> Duration {
        let mut state = self.state.lock().await;
        let start = Instant::now();

        let mut ready_at = state.last_any.map(|last| last + self.min_spacing);
        if let (Some(spacing), Some(last)) =
            (self.class_spacing.get(&op), state.last_by_class.get(&op))
        {
            let class_ready = *last + *spacing;
            ready_at = Some(ready_at.map_or(class_ready, |r| r.max(class_ready)));
        }

        if let Some(ready_at) = ready_at {
            if ready_at > start {
                debug!(
                    "Spacing {} request: waiting {:?}",
                    op.as_str(),
                    ready_at - start
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }

        let now = Instant::now();
        state.last_any = Some(now);
        state.last_by_class.insert(op, now);
        now - start
    }

    /// Time until a request of class `op` would be admitted.
    pub async fn time_until_ready(&self, op: OpClass) -> Duration {
        let state = self.state.lock().await;
        let now = Instant::now();
        let any = state
            .last_any
            .map(|last| (last + self.min_spacing).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO);
        let class = match (self.class_spacing.get(&op), state.last_by_class.get(&op)) {
            (Some(spacing), Some(last)) => (*last + *spacing).saturating_duration_since(now),
            _ => Duration::ZERO,
        };
        any.max(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_requests_keep_spacing() {
        let limiter = SpacingLimiter::new(Duration::from_secs(2));
        let mut stamps = Vec::new();
        for _ in 0..5 {
            limiter.wait(OpClass::Query).await;
            stamps.push(Instant::now());
        }

        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(2));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_request_is_immediate() {
        let limiter = SpacingLimiter::new(Duration::from_secs(2));
        assert_eq!(limiter.wait(OpClass::Query).await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parse_class_has_longer_spacing() {
        let limiter = SpacingLimiter::new(Duration::from_secs(2))
            .with_class_spacing(OpClass::Parse, Duration::from_secs(30));

        limiter.wait(OpClass::Parse).await;
        let parse_at = Instant::now();

        // A query only needs the base spacing
        limiter.wait(OpClass::Query).await;
        assert!(Instant::now() - parse_at >= Duration::from_secs(2));
        assert!(Instant::now() - parse_at < Duration::from_secs(30));

        // The next parse waits out the 30s class spacing
        limiter.wait(OpClass::Parse).await;
        assert!(Instant::now() - parse_at >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_are_serialized() {
        let limiter = std::sync::Arc::new(SpacingLimiter::new(Duration::from_secs(1)));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.wait(OpClass::Query).await;
                Instant::now()
            }));
        }

        let mut stamps = Vec::new();
        for handle in handles {
            stamps.push(handle.await.unwrap());
        }
        stamps.sort();
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_until_ready() {
        let limiter = SpacingLimiter::new(Duration::from_secs(2));
        assert_eq!(limiter.time_until_ready(OpClass::Query).await, Duration::ZERO);
        limiter.wait(OpClass::Query).await;
        assert_eq!(
            limiter.time_until_ready(OpClass::Query).await,
            Duration::from_secs(2)
        );
    }
}
