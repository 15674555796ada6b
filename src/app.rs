//! Process wiring: builds every component from `Settings` once at startup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::cache::CacheLayer;
use crate::config::Settings;
use crate::models::{EntityKind, InstanceRecord, InstanceStatus, Source};
use crate::rate_limit::{
    BackoffController, GateStats, InMemoryWindowBackend, RateLimiter, WindowBackend,
};
use crate::registry::{InstanceRegistry, PageRange, RegistryError};
use crate::scheduler::{
    CollectorHandler, CronSchedule, ListRefreshProducer, Partitioning, ProducerError,
    ScheduleEntry, Scheduler, SchedulerStatus, StaleAction, StaleEntityProducer,
    FULL_REFRESH_GUARD,
};
use crate::scrapers::{ActiveRequests, HttpClient, HttpScraper, ScrapeError};
use crate::store::{EntityStore, InMemoryEntityStore, StalenessRule};
use crate::work_queue::QueueStatus;
use crate::worker_pool::WorkerPool;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Scrape(#[from] ScrapeError),
    #[error(transparent)]
    Schedule(#[from] ProducerError),
}

/// Point-in-time view for `status`.
///
/// Registry, cache and limiter fields reflect shared state. The scheduler
/// and queue fields describe only the process that built the report.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub instance_id: String,
    pub local_scheduler: SchedulerStatus,
    pub local_queue: QueueStatus,
    pub cache_backend: &'static str,
    pub cache_degraded: bool,
    pub registry_backend: &'static str,
    pub active_instances: Vec<InstanceRecord>,
    /// Stored records whose heartbeat is past the TTL; excluded from partitioning.
    pub stale_instances: Vec<InstanceRecord>,
    /// `None` when this process is not in the active set.
    pub own_pages: Option<PageRange>,
    pub total_pages: u32,
    pub rate_limits: HashMap<Source, GateStats>,
}

pub struct App {
    pub settings: Settings,
    pub instance_id: String,
    pub limiter: RateLimiter,
    pub cache: Arc<CacheLayer>,
    pub registry: Arc<InstanceRegistry>,
    pub store: Arc<dyn EntityStore>,
    pub scheduler: Scheduler,
}

impl App {
    pub async fn build(settings: Settings) -> Result<Self, AppError> {
        let instance_id = settings.instance_id();

        let window_backend = window_backend(settings.limits.redis_url.as_deref()).await;
        let limiter = RateLimiter::new(&settings.limits.by_source(), window_backend);
        let active = ActiveRequests::new();
        let client = HttpClient::new(
            Duration::from_secs(settings.scrapers.request_timeout_secs),
            settings.scrapers.user_agent.as_deref(),
            limiter.clone(),
            BackoffController::from_config(&settings.backoff),
            active.clone(),
        )?;
        let scraper = Arc::new(HttpScraper::new(client, settings.scrapers.clone())?);

        let cache = Arc::new(CacheLayer::connect(settings.cache.clone()).await);
        let registry = Arc::new(InstanceRegistry::connect(&settings.registry).await?);
        let store: Arc<dyn EntityStore> = Arc::new(InMemoryEntityStore::new());

        let handler = CollectorHandler::new(
            scraper,
            cache.clone(),
            WorkerPool::new(settings.worker_count),
            store.clone(),
        );
        let scheduler = Scheduler::new(Arc::new(handler), settings.scheduler.clone(), active);

        info!(
            "Instance {} ready (cache: {}, registry: {})",
            instance_id,
            cache.backend_name(),
            registry.backend_name()
        );

        Ok(Self {
            settings,
            instance_id,
            limiter,
            cache,
            registry,
            store,
            scheduler,
        })
    }

    /// The default schedule table.
    pub fn schedule_table(&self) -> Result<Vec<ScheduleEntry>, ProducerError> {
        let schedules = &self.settings.schedules;
        let stale = |kind, days, action, rule: Option<StalenessRule>| {
            let rule = rule.unwrap_or_else(|| StalenessRule::older_than(days_to_duration(days)));
            let producer = StaleEntityProducer::new(self.store.clone(), kind, rule, action);
            match schedules.max_entities_per_run {
                Some(limit) => producer.with_limit(limit),
                None => producer,
            }
        };

        let daily = ListRefreshProducer::new(
            self.settings.total_pages,
            self.settings.scheduler.regions.clone(),
        )
        .partitioned(Partitioning {
            registry: self.registry.clone(),
            instance_id: self.instance_id.clone(),
        });

        let earnings_rule = StalenessRule::older_than(days_to_duration(
            schedules.earnings_stale_days,
        ))
        .requiring("earnings");

        Ok(vec![
            ScheduleEntry::new(
                "daily-basic",
                CronSchedule::parse(&schedules.daily_basic)?,
                Arc::new(daily),
            )
            .with_guard(FULL_REFRESH_GUARD),
            ScheduleEntry::new(
                "weekly-player-details",
                CronSchedule::parse(&schedules.weekly_player_details)?,
                Arc::new(stale(
                    EntityKind::Player,
                    schedules.player_stale_days,
                    StaleAction::Detail,
                    None,
                )),
            ),
            ScheduleEntry::new(
                "biweekly-earnings",
                CronSchedule::parse(&schedules.biweekly_earnings)?,
                Arc::new(stale(
                    EntityKind::Player,
                    schedules.earnings_stale_days,
                    StaleAction::Earnings,
                    Some(earnings_rule),
                )),
            ),
            ScheduleEntry::new(
                "daily-tournaments",
                CronSchedule::parse(&schedules.daily_tournaments)?,
                Arc::new(stale(
                    EntityKind::Tournament,
                    schedules.tournament_stale_days,
                    StaleAction::Tournament,
                    None,
                )),
            ),
            ScheduleEntry::new(
                "weekly-teams",
                CronSchedule::parse(&schedules.weekly_teams)?,
                Arc::new(stale(
                    EntityKind::Team,
                    schedules.team_stale_days,
                    StaleAction::Team,
                    None,
                )),
            ),
        ])
    }

    pub async fn status_report(&self) -> Result<StatusReport, RegistryError> {
        let (active_instances, stale_instances): (Vec<_>, Vec<_>) = self
            .registry
            .list_instances()
            .await?
            .into_iter()
            .partition(|r| r.status == InstanceStatus::Active);
        let own_pages = self
            .registry
            .own_range(self.settings.total_pages, &self.instance_id)
            .await
            .ok();

        Ok(StatusReport {
            instance_id: self.instance_id.clone(),
            local_scheduler: self.scheduler.status(),
            local_queue: self.scheduler.queue_status(),
            cache_backend: self.cache.backend_name(),
            cache_degraded: self.cache.is_degraded(),
            registry_backend: self.registry.backend_name(),
            active_instances,
            stale_instances,
            own_pages,
            total_pages: self.settings.total_pages,
            rate_limits: self.limiter.stats(),
        })
    }
}

fn days_to_duration(days: u64) -> Duration {
    Duration::from_secs(days.saturating_mul(24 * 60 * 60))
}

#[cfg(feature = "redis-backend")]
async fn window_backend(redis_url: Option<&str>) -> Arc<dyn WindowBackend> {
    if let Some(url) = redis_url {
        match crate::rate_limit::RedisWindowBackend::new(url).await {
            Ok(backend) => return Arc::new(backend),
            Err(e) => warn!("Redis rate limit store unavailable ({}); using local windows", e),
        }
    }
    Arc::new(InMemoryWindowBackend::new())
}

#[cfg(not(feature = "redis-backend"))]
async fn window_backend(redis_url: Option<&str>) -> Arc<dyn WindowBackend> {
    if redis_url.is_some() {
        warn!("Built without redis-backend; rate limit windows are per process");
    }
    Arc::new(InMemoryWindowBackend::new())
}
