//! Bounded fan-out of per-entity detail fetches.
//!
//! Each worker fetches one entity in its own spawned task. Timeouts live on
//! the individual HTTP requests inside the scraper, so a worker queued behind
//! the rate limiter or a backoff delay is never cut short. Results are
//! all-settled: a failed or panicked worker leaves its entity as it was and
//! never aborts the batch.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::models::{DetailScope, EntityRecord};
use crate::scrapers::SourceScraper;

/// Message handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub entity_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("worker panicked: {0}")]
    Panicked(String),
    #[error("worker pool closed")]
    Closed,
}

/// Wire form of a worker outcome: `{success: true, data}` or
/// `{success: false, error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Result<Value, WorkerError>> for WorkerResponse {
    fn from(result: &Result<Value, WorkerError>) -> Self {
        match result {
            Ok(data) => Self {
                success: true,
                data: Some(data.clone()),
                error: None,
            },
            Err(e) => Self {
                success: false,
                data: None,
                error: Some(e.to_string()),
            },
        }
    }
}

impl WorkerResponse {
    pub fn into_result(self) -> Result<Value, WorkerError> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            (true, None) => Ok(Value::Null),
            (false, _) => Err(WorkerError::Fetch(
                self.error.unwrap_or_else(|| "unknown error".to_string()),
            )),
        }
    }
}

/// Outcome of one fan-out, in batch order.
#[derive(Debug)]
pub struct FanOutReport {
    pub entities: Vec<EntityRecord>,
    pub responses: Vec<WorkerResponse>,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct WorkerPool {
    size: usize,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            permits: Arc::new(Semaphore::new(size)),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Fetch `scope` detail for every entity and merge each success back into
    /// its batch entry.
    pub async fn fan_out(
        &self,
        batch: Vec<EntityRecord>,
        scope: DetailScope,
        scraper: Arc<dyn SourceScraper>,
    ) -> FanOutReport {
        debug!(
            "Fanning out {} {} fetches over {} workers",
            batch.len(),
            scope.cache_category(),
            self.size
        );

        let handles: Vec<_> = batch
            .iter()
            .map(|record| {
                let permits = self.permits.clone();
                let scraper = scraper.clone();
                let entity = record.reference();
                tokio::spawn(async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|_| WorkerError::Closed)?;
                    let request = WorkerRequest {
                        entity_url: entity.url.clone(),
                    };
                    debug!("Worker fetching {}", request.entity_url);
                    scraper
                        .scrape_detail(&entity, scope)
                        .await
                        .map_err(|e| WorkerError::Fetch(e.to_string()))
                })
            })
            .collect();

        let results = join_all(handles).await;

        let mut report = FanOutReport {
            entities: Vec::with_capacity(batch.len()),
            responses: Vec::with_capacity(batch.len()),
            succeeded: 0,
            failed: 0,
        };
        for (mut record, joined) in batch.into_iter().zip(results) {
            let outcome = joined.unwrap_or_else(|e| Err(WorkerError::Panicked(e.to_string())));
            report.responses.push(WorkerResponse::from(&outcome));
            match outcome {
                Ok(data) => {
                    record.merge_detail(scope, data);
                    report.succeeded += 1;
                }
                Err(e) => {
                    warn!("Detail fetch for {} failed: {}", record.url, e);
                    report.failed += 1;
                }
            }
            report.entities.push(record);
        }
        report
    }
}
