//! Rate limiter configuration and types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::Source;

/// One budget tier: at most `requests` within `period_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowBudget {
    pub requests: u32,
    pub period_ms: u64,
}

impl WindowBudget {
    pub fn new(requests: u32, period: Duration) -> Self {
        Self {
            requests,
            period_ms: period.as_millis() as u64,
        }
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// Limiting shape for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LimitConfig {
    /// Minimum gap between any two requests, plus a longer gap between
    /// parse-class requests.
    Spacing {
        min_spacing_ms: u64,
        parse_spacing_ms: u64,
    },
    /// Every tier must have budget left before a request proceeds.
    Window { tiers: Vec<WindowBudget> },
}

impl LimitConfig {
    /// Defaults: 20 req/1s + 100 req/2min for the stats site, 2s/30s spacing
    /// for the wiki API.
    pub fn default_for(source: Source) -> Self {
        match source {
            Source::Stats => Self::Window {
                tiers: vec![
                    WindowBudget::new(20, Duration::from_secs(1)),
                    WindowBudget::new(100, Duration::from_secs(120)),
                ],
            },
            Source::Wiki => Self::Spacing {
                min_spacing_ms: 2_000,
                parse_spacing_ms: 30_000,
            },
        }
    }

    /// Check the configuration can ever admit a request.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Spacing { .. } => Ok(()),
            Self::Window { tiers } => {
                if tiers.is_empty() {
                    return Err("window limit needs at least one tier".to_string());
                }
                for tier in tiers {
                    if tier.requests == 0 || tier.period_ms == 0 {
                        return Err(format!(
                            "window tier {}/{}ms must have non-zero requests and period",
                            tier.requests, tier.period_ms
                        ));
                    }
                }
                Ok(())
            }
        }
    }
}

/// Configuration for rate-limit backoff behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry; doubles on each further attempt.
    pub base_delay_ms: u64,
    /// Ceiling for computed delays.
    pub max_delay_ms: u64,
    /// Retries after the first attempt before failing terminally.
    pub max_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            max_retries: 4,
        }
    }
}

/// Counters for one source gate.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GateStats {
    pub total_requests: u64,
    /// Requests that had to wait before being admitted.
    pub throttled: u64,
}
