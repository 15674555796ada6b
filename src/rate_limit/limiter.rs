//! Per-source rate limiter facade.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::backend::WindowBackend;
use super::config::{GateStats, LimitConfig};
use super::memory::InMemoryWindowBackend;
use super::spacing::SpacingLimiter;
use super::window::WindowLimiter;
use crate::models::{OpClass, Source};

enum Gate {
    Spacing(SpacingLimiter),
    Window(WindowLimiter),
}

struct SourceGate {
    gate: Gate,
    total_requests: AtomicU64,
    throttled: AtomicU64,
}

impl SourceGate {
    fn new(gate: Gate) -> Self {
        Self {
            gate,
            total_requests: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
        }
    }
}

/// Gates every outbound request by source.
///
/// Each source has its own independent policy. A source with no
/// configured gate is not limited.
#[derive(Clone)]
pub struct RateLimiter {
    gates: Arc<HashMap<Source, SourceGate>>,
}

impl RateLimiter {
    /// Build gates from per-source configs. Window gates count against
    /// `backend`, so instances sharing a backend share one budget.
    pub fn new(configs: &HashMap<Source, LimitConfig>, backend: Arc<dyn WindowBackend>) -> Self {
        let gates = configs
            .iter()
            .map(|(source, config)| {
                let gate = match config {
                    LimitConfig::Spacing {
                        min_spacing_ms,
                        parse_spacing_ms,
                    } => Gate::Spacing(
                        SpacingLimiter::new(Duration::from_millis(*min_spacing_ms))
                            .with_class_spacing(
                                OpClass::Parse,
                                Duration::from_millis(*parse_spacing_ms),
                            ),
                    ),
                    LimitConfig::Window { tiers } => Gate::Window(WindowLimiter::new(
                        source.as_str(),
                        tiers.clone(),
                        backend.clone(),
                    )),
                };
                (*source, SourceGate::new(gate))
            })
            .collect();

        Self {
            gates: Arc::new(gates),
        }
    }

    pub fn in_memory(configs: &HashMap<Source, LimitConfig>) -> Self {
        Self::new(configs, Arc::new(InMemoryWindowBackend::new()))
    }

    /// Limiter with the default policy for every source.
    pub fn with_defaults() -> Self {
        let configs = Source::ALL
            .iter()
            .map(|s| (*s, LimitConfig::default_for(*s)))
            .collect();
        Self::in_memory(&configs)
    }

    /// Block until a request of class `op` to `source` may proceed.
    ///
    /// Returns how long the caller waited.
    pub async fn wait(&self, source: Source, op: OpClass) -> Duration {
        let Some(entry) = self.gates.get(&source) else {
            return Duration::ZERO;
        };

        let waited = match &entry.gate {
            Gate::Spacing(limiter) => limiter.wait(op).await,
            Gate::Window(limiter) => limiter.wait().await,
        };

        entry.total_requests.fetch_add(1, Ordering::Relaxed);
        if waited > Duration::ZERO {
            entry.throttled.fetch_add(1, Ordering::Relaxed);
            debug!("{} {} request waited {:?}", source, op.as_str(), waited);
        }
        waited
    }

    pub fn is_limited(&self, source: Source) -> bool {
        self.gates.contains_key(&source)
    }

    pub fn stats(&self) -> HashMap<Source, GateStats> {
        self.gates
            .iter()
            .map(|(source, entry)| {
                (
                    *source,
                    GateStats {
                        total_requests: entry.total_requests.load(Ordering::Relaxed),
                        throttled: entry.throttled.load(Ordering::Relaxed),
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_sources_are_independent() {
        let limiter = RateLimiter::with_defaults();
        let start = Instant::now();

        limiter.wait(Source::Wiki, OpClass::Query).await;
        // Stats requests do not wait behind wiki spacing
        for _ in 0..20 {
            limiter.wait(Source::Stats, OpClass::Query).await;
        }
        assert_eq!(Instant::now(), start);

        limiter.wait(Source::Wiki, OpClass::Query).await;
        assert!(Instant::now() - start >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfigured_source_is_not_limited() {
        let mut configs = HashMap::new();
        configs.insert(Source::Stats, LimitConfig::default_for(Source::Stats));
        let limiter = RateLimiter::in_memory(&configs);

        assert!(!limiter.is_limited(Source::Wiki));
        for _ in 0..10 {
            assert_eq!(
                limiter.wait(Source::Wiki, OpClass::Parse).await,
                Duration::ZERO
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_count_throttled_requests() {
        let limiter = RateLimiter::with_defaults();
        limiter.wait(Source::Wiki, OpClass::Query).await;
        limiter.wait(Source::Wiki, OpClass::Query).await;

        let stats = limiter.stats();
        let wiki = &stats[&Source::Wiki];
        assert_eq!(wiki.total_requests, 2);
        assert_eq!(wiki.throttled, 1);
        assert_eq!(stats[&Source::Stats].total_requests, 0);
    }
}
