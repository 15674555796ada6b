//! Periodic heartbeat refresh for one registered instance.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use super::InstanceRegistry;

/// Keeps an instance record alive until shut down, then removes it.
pub struct Heartbeat {
    registry: Arc<InstanceRegistry>,
    id: String,
    interval: Duration,
    shutdown_tx: watch::Sender<bool>,
}

impl Heartbeat {
    pub fn new(registry: Arc<InstanceRegistry>, id: impl Into<String>, interval: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            registry,
            id: id.into(),
            interval,
            shutdown_tx,
        }
    }

    /// Start the refresh loop. The first refresh happens after one interval;
    /// the caller registers before starting.
    pub fn start(&self) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let id = self.id.clone();
        let interval = self.interval;
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;
            while !*shutdown.borrow_and_update() {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = registry.refresh(&id).await {
                            warn!("Heartbeat refresh failed for {}: {}", id, e);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            if let Err(e) = registry.deregister(&id).await {
                warn!("Failed to deregister {}: {}", id, e);
            }
        })
    }

    /// Ask the loop to stop and deregister.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_done(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}
