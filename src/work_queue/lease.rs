//! Producer run guards.
//!
//! A producer holds an `Arc<RunLease>` while it builds its candidate set and
//! every task it enqueues carries a clone. The guard flips back to idle when
//! the last clone is dropped, whichever way that happens.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

/// Exclusive claim on a named producer.
#[derive(Debug)]
pub struct RunLease {
    name: String,
    flag: Arc<AtomicBool>,
}

impl RunLease {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        debug!("Producer '{}' released its run guard", self.name);
    }
}

/// Registry of per-producer "already running" flags.
#[derive(Debug, Default)]
pub struct RunGuards {
    flags: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl RunGuards {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self, name: &str) -> Arc<AtomicBool> {
        let mut flags = self.flags.lock().unwrap_or_else(|e| e.into_inner());
        flags
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    /// Claim the guard for `name`, or `None` if a previous run is in flight.
    pub fn try_acquire(&self, name: &str) -> Option<Arc<RunLease>> {
        let flag = self.flag(name);
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(Arc::new(RunLease {
            name: name.to_string(),
            flag,
        }))
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.flag(name).load(Ordering::Acquire)
    }
}
