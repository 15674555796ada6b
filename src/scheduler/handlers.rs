//! Task handlers: what running one task means.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::cache::{cache_key, CacheLayer, CacheTier};
use crate::models::{DetailScope, EntityRecord, EntityRef, ListTarget};
use crate::scrapers::{ScrapeError, SourceScraper};
use crate::store::{EntityStore, StoreError};
use crate::work_queue::{Task, TaskKind};
use crate::worker_pool::WorkerPool;

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error(transparent)]
    Scrape(#[from] ScrapeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Handler panicked: {0}")]
    Panicked(String),
}

/// Executes one task attempt. Errors are retried by the scheduler.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<(), TaskError>;
}

/// Production handler: cache, then source, then store.
pub struct CollectorHandler {
    scraper: Arc<dyn SourceScraper>,
    cache: Arc<CacheLayer>,
    pool: WorkerPool,
    store: Arc<dyn EntityStore>,
}

impl CollectorHandler {
    pub fn new(
        scraper: Arc<dyn SourceScraper>,
        cache: Arc<CacheLayer>,
        pool: WorkerPool,
        store: Arc<dyn EntityStore>,
    ) -> Self {
        Self {
            scraper,
            cache,
            pool,
            store,
        }
    }

    async fn list_fetch(&self, target: &ListTarget, detailed: bool) -> Result<(), TaskError> {
        let key = cache_key(target.source(), "list", &target.cache_id());
        let records = match self.cache.get_json::<Vec<EntityRecord>>(&key).await {
            Some(records) => {
                debug!("Cache hit for {}", target);
                records
            }
            None => {
                let records = self.scraper.scrape_list(target).await?;
                if let Err(e) = self.cache.set_json(&key, &records, CacheTier::Medium).await {
                    debug!("Not caching {}: {}", target, e);
                }
                records
            }
        };

        let records = if detailed && !records.is_empty() {
            let report = self
                .pool
                .fan_out(records, DetailScope::Profile, self.scraper.clone())
                .await;
            info!(
                "{}: {} details fetched, {} failed",
                target, report.succeeded, report.failed
            );
            report.entities
        } else {
            records
        };

        let saved = self.store.save_entities(&records).await?;
        info!("{}: saved {} entities", target, saved);
        Ok(())
    }

    async fn detail_fetch(
        &self,
        entity: &EntityRef,
        scope: DetailScope,
        tier: CacheTier,
    ) -> Result<(), TaskError> {
        let identifier = format!("{}-{}", entity.kind.as_str(), entity.id);
        let key = cache_key(entity.kind.home_source(), scope.cache_category(), &identifier);

        let data = match self.cache.get_json::<Value>(&key).await {
            Some(data) => data,
            None => {
                let data = self.scraper.scrape_detail(entity, scope).await?;
                if let Err(e) = self.cache.set_json(&key, &data, tier).await {
                    debug!("Not caching {}: {}", key, e);
                }
                data
            }
        };

        self.store.save_detail(entity, scope, data).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for CollectorHandler {
    async fn handle(&self, task: &Task) -> Result<(), TaskError> {
        match &task.kind {
            TaskKind::ListFetch { target, detailed } => self.list_fetch(target, *detailed).await,
            TaskKind::DetailFetch { entity } => {
                self.detail_fetch(entity, DetailScope::Profile, CacheTier::ExtraLong)
                    .await
            }
            TaskKind::EarningsUpdate { entity } => {
                self.detail_fetch(entity, DetailScope::Earnings, CacheTier::Long)
                    .await
            }
            TaskKind::TournamentUpdate { entity } | TaskKind::TeamUpdate { entity } => {
                self.detail_fetch(entity, DetailScope::Profile, CacheTier::Long)
                    .await
            }
        }
    }
}
