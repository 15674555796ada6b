//! Task-level retry policy: the outer retry layer, separate from request backoff.

use serde::{Deserialize, Serialize};

use crate::work_queue::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt; a task failing with this many
    /// retries already behind it is dropped.
    pub max_retries: u32,
    /// Priority lost per retry.
    pub decay_step: i32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            decay_step: 1,
        }
    }
}

impl RetryPolicy {
    /// Next attempt for a failed task, or `None` once the cap is reached.
    pub fn next_attempt(&self, failed: &Task) -> Option<Task> {
        if failed.retry_count >= self.max_retries {
            None
        } else {
            Some(failed.retried(self.decay_step))
        }
    }
}
