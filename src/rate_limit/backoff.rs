//! Bounded exponential backoff for a single request.
//!
//! This is the inner retry layer. A task execution may retry here several
//! times before the task-level retry counter is touched.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use super::config::BackoffConfig;

/// How an error should be treated by the backoff loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryHint {
    /// Retrying cannot succeed.
    Fatal,
    /// Network hiccup or 5xx; retry after the computed delay.
    Transient,
    /// Remote asked us to slow down, optionally saying for how long.
    RateLimited(Option<Duration>),
}

/// Errors the backoff loop can classify and wrap.
pub trait Backoffable: Sized + std::fmt::Display {
    fn retry_hint(&self) -> RetryHint;

    /// Wrap the last error once `attempts` tries have all failed.
    fn exhausted(self, attempts: u32) -> Self;
}

#[derive(Debug, Clone)]
pub struct BackoffController {
    base_delay: Duration,
    max_delay: Duration,
    max_retries: u32,
}

impl Default for BackoffController {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}

impl BackoffController {
    pub fn new(base_delay: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_retries,
        }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.max_retries,
        )
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// `base * 2^attempt`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails fatally, or retries run out.
    ///
    /// A rate-limit rejection carrying `Retry-After` never retries sooner
    /// than the server asked.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        E: Backoffable,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let floor = match err.retry_hint() {
                RetryHint::Fatal => return Err(err),
                RetryHint::Transient => None,
                RetryHint::RateLimited(retry_after) => retry_after,
            };

            if attempt >= self.max_retries {
                debug!("{}: giving up after {} attempts", label, attempt + 1);
                return Err(err.exhausted(attempt + 1));
            }

            let mut delay = self.delay_for(attempt);
            if let Some(floor) = floor {
                delay = delay.max(floor);
            }
            warn!(
                "{}: attempt {} failed ({}), retrying in {:?}",
                label,
                attempt + 1,
                err,
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
