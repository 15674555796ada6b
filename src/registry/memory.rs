//! In-process registry backend (single instance, or tests).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{RegistryBackend, RegistryResult};
use crate::models::InstanceRecord;

#[derive(Clone, Default)]
pub struct InMemoryRegistryBackend {
    records: Arc<Mutex<HashMap<String, (InstanceRecord, Instant)>>>,
}

impl InMemoryRegistryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistryBackend for InMemoryRegistryBackend {
    async fn write(&self, record: &InstanceRecord, ttl: Duration) -> RegistryResult<()> {
        let expires_at = Instant::now() + ttl;
        self.records
            .lock()
            .await
            .insert(record.id.clone(), (record.clone(), expires_at));
        Ok(())
    }

    async fn remove(&self, id: &str) -> RegistryResult<()> {
        self.records.lock().await.remove(id);
        Ok(())
    }

    async fn list(&self) -> RegistryResult<Vec<InstanceRecord>> {
        let now = Instant::now();
        let mut records = self.records.lock().await;
        records.retain(|_, (_, expires_at)| *expires_at > now);
        Ok(records.values().map(|(r, _)| r.clone()).collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
