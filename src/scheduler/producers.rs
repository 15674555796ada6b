//! Producers compute a candidate set and turn it into tasks.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::models::{EntityKind, EntityRef, ListTarget};
use crate::registry::{InstanceRegistry, PageRange, RegistryError};
use crate::store::{EntityStore, StalenessRule, StoreError};
use crate::work_queue::{PriorityPolicy, Task, TaskKind};

#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Invalid schedule '{expr}': {reason}")]
    InvalidSchedule { expr: String, reason: String },
}

#[async_trait]
pub trait Producer: Send + Sync {
    /// Tasks for this run. Must not enqueue anything itself.
    async fn produce(&self) -> Result<Vec<Task>, ProducerError>;
}

/// Full list refresh sequence: player pages, then team regions, then events.
pub fn refresh_tasks(pages: PageRange, regions: &[String], detailed: bool, priority: i32) -> Vec<Task> {
    let mut tasks: Vec<Task> = pages
        .pages()
        .map(|page| {
            Task::new(
                TaskKind::ListFetch {
                    target: ListTarget::PlayerPage(page),
                    detailed,
                },
                priority,
            )
        })
        .collect();
    for region in regions {
        tasks.push(Task::new(
            TaskKind::ListFetch {
                target: ListTarget::TeamRegion(region.clone()),
                detailed: false,
            },
            priority,
        ));
    }
    tasks.push(Task::new(
        TaskKind::ListFetch {
            target: ListTarget::EventList,
            detailed: false,
        },
        priority,
    ));
    tasks
}

/// Instance identity for partitioned list work.
#[derive(Clone)]
pub struct Partitioning {
    pub registry: Arc<InstanceRegistry>,
    pub instance_id: String,
}

/// Daily list refresh over this instance's share of the pages.
pub struct ListRefreshProducer {
    total_pages: u32,
    regions: Vec<String>,
    detailed: bool,
    priority: i32,
    partitioning: Option<Partitioning>,
}

impl ListRefreshProducer {
    pub fn new(total_pages: u32, regions: Vec<String>) -> Self {
        Self {
            total_pages,
            regions,
            detailed: false,
            priority: PriorityPolicy::REFRESH,
            partitioning: None,
        }
    }

    pub fn detailed(mut self, detailed: bool) -> Self {
        self.detailed = detailed;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn partitioned(mut self, partitioning: Partitioning) -> Self {
        self.partitioning = Some(partitioning);
        self
    }
}

#[async_trait]
impl Producer for ListRefreshProducer {
    async fn produce(&self) -> Result<Vec<Task>, ProducerError> {
        let all = PageRange {
            start: 1,
            end: self.total_pages,
        };
        let Some(partitioning) = &self.partitioning else {
            return Ok(refresh_tasks(all, &self.regions, self.detailed, self.priority));
        };

        let range = partitioning
            .registry
            .own_range(self.total_pages, &partitioning.instance_id)
            .await?;
        info!(
            "Instance {} refreshing pages {} of {}",
            partitioning.instance_id, range, self.total_pages
        );

        let mut tasks = refresh_tasks(range, &self.regions, self.detailed, self.priority);
        // Region and event lists are unpartitioned: only the first instance
        // fetches them.
        if range.start != 1 {
            tasks.retain(|t| {
                matches!(
                    t.kind,
                    TaskKind::ListFetch {
                        target: ListTarget::PlayerPage(_),
                        ..
                    }
                )
            });
        }
        Ok(tasks)
    }
}

/// What to enqueue for each stale entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleAction {
    Detail,
    Earnings,
    Tournament,
    Team,
}

impl StaleAction {
    fn task_kind(&self, entity: EntityRef) -> TaskKind {
        match self {
            Self::Detail => TaskKind::DetailFetch { entity },
            Self::Earnings => TaskKind::EarningsUpdate { entity },
            Self::Tournament => TaskKind::TournamentUpdate { entity },
            Self::Team => TaskKind::TeamUpdate { entity },
        }
    }
}

/// One task per entity matching a staleness rule, prioritized by tier.
pub struct StaleEntityProducer {
    store: Arc<dyn EntityStore>,
    kind: EntityKind,
    rule: StalenessRule,
    action: StaleAction,
    limit: Option<usize>,
}

impl StaleEntityProducer {
    pub fn new(
        store: Arc<dyn EntityStore>,
        kind: EntityKind,
        rule: StalenessRule,
        action: StaleAction,
    ) -> Self {
        Self {
            store,
            kind,
            rule,
            action,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[async_trait]
impl Producer for StaleEntityProducer {
    async fn produce(&self) -> Result<Vec<Task>, ProducerError> {
        let mut stale = self.store.stale_entities(self.kind, &self.rule).await?;
        // Highest tiers first when a limit cuts the set
        stale.sort_by_key(|e| std::cmp::Reverse(PriorityPolicy::for_tier(e.tier)));
        if let Some(limit) = self.limit {
            stale.truncate(limit);
        }
        debug!("{} stale {} entities", stale.len(), self.kind.as_str());

        Ok(stale
            .into_iter()
            .map(|entity| {
                let priority = PriorityPolicy::for_tier(entity.tier);
                Task::new(self.action.task_kind(entity), priority)
            })
            .collect())
    }
}
