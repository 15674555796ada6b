//! The collection scheduler: owns the task queue and its drain loop.
//!
//! State machine: `Idle -> Draining -> Idle`. Enqueueing while idle starts
//! the drain loop, which runs one task at a time until the queue is empty.
//! Failed tasks re-enter the queue with decayed priority until the retry cap
//! is reached, then they are dropped and recorded.

mod cron;
mod handlers;
mod producers;
mod retry;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::models::{EntityKind, EntityRef};
use crate::registry::PageRange;
use crate::scrapers::ActiveRequests;
use crate::work_queue::{PriorityPolicy, QueueStatus, RunGuards, Task, TaskKind, TaskQueue};

pub use self::cron::{CronRunner, CronSchedule, ScheduleEntry, SchedulesConfig, FULL_REFRESH_GUARD};
pub use handlers::{CollectorHandler, TaskError, TaskHandler};
pub use producers::{
    refresh_tasks, ListRefreshProducer, Partitioning, Producer, ProducerError, StaleAction,
    StaleEntityProducer,
};
pub use retry::RetryPolicy;

/// How many terminal failures `stats()` remembers.
const RECENT_FAILURES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Draining,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub retry: RetryPolicy,
    /// Player pages enqueued by a manual refresh without `pages`.
    pub refresh_pages: u32,
    /// Team regions listed by every full refresh.
    pub regions: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            refresh_pages: 10,
            regions: ["Korea", "China", "Europe", "North America"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Queue status query result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub queue_length: usize,
    pub active_requests: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RefreshRequest {
    pub pages: Option<u32>,
    pub detailed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_length: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateResponse {
    pub success: bool,
    pub message: String,
}

/// Outcome of firing one producer.
#[derive(Debug, Clone, PartialEq)]
pub enum ProducerRun {
    Started { enqueued: usize },
    /// The producer's previous run still has tasks in flight.
    Skipped,
    Failed { error: String },
}

/// A task dropped after exhausting its retries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TerminalFailure {
    pub task: String,
    pub attempts: u32,
    pub error: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulerStats {
    pub completed: u64,
    pub failed_attempts: u64,
    pub dropped: u64,
    pub recent_failures: Vec<TerminalFailure>,
}

#[derive(Default)]
struct StatsInner {
    completed: u64,
    failed_attempts: u64,
    dropped: u64,
    recent_failures: VecDeque<TerminalFailure>,
}

struct Inner {
    queue: Mutex<TaskQueue>,
    draining: AtomicBool,
    state_tx: watch::Sender<SchedulerState>,
    handler: Arc<dyn TaskHandler>,
    config: SchedulerConfig,
    guards: RunGuards,
    active: ActiveRequests,
    stats: Mutex<StatsInner>,
}

impl Inner {
    fn queue(&self) -> std::sync::MutexGuard<'_, TaskQueue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn stats(&self) -> std::sync::MutexGuard<'_, StatsInner> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Cheap to clone; clones share one queue and drain loop.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        handler: Arc<dyn TaskHandler>,
        config: SchedulerConfig,
        active: ActiveRequests,
    ) -> Self {
        let (state_tx, _) = watch::channel(SchedulerState::Idle);
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(TaskQueue::new()),
                draining: AtomicBool::new(false),
                state_tx,
                handler,
                config,
                guards: RunGuards::new(),
                active,
                stats: Mutex::new(StatsInner::default()),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Add a task, starting the drain loop if idle. Needs a tokio runtime.
    pub fn enqueue(&self, task: Task) {
        debug!("Enqueue {} (priority {})", task.kind, task.priority);
        self.inner.queue().enqueue(task);
        self.try_begin_drain();
    }

    pub fn enqueue_all(&self, tasks: impl IntoIterator<Item = Task>) -> usize {
        let count = {
            let mut queue = self.inner.queue();
            let before = queue.len();
            for task in tasks {
                queue.enqueue(task);
            }
            queue.len() - before
        };
        if count > 0 {
            self.try_begin_drain();
        }
        count
    }

    fn try_begin_drain(&self) {
        if self
            .inner
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.inner.state_tx.send_replace(SchedulerState::Draining);
            let inner = self.inner.clone();
            tokio::spawn(drain(inner));
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.inner.state_tx.borrow()
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            is_running: self.state() == SchedulerState::Draining,
            queue_length: self.inner.queue().len(),
            active_requests: self.inner.active.get(),
        }
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.inner.queue().peek_status()
    }

    /// Pending tasks in the order they will run.
    pub fn pending(&self) -> Vec<Task> {
        self.inner.queue().pending()
    }

    pub fn is_producer_running(&self, guard: &str) -> bool {
        self.inner.guards.is_running(guard)
    }

    /// Resolve once the queue has drained and the loop is idle.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.state_tx.subscribe();
        let _ = rx.wait_for(|state| *state == SchedulerState::Idle).await;
    }

    pub fn stats(&self) -> SchedulerStats {
        let stats = self.inner.stats();
        SchedulerStats {
            completed: stats.completed,
            failed_attempts: stats.failed_attempts,
            dropped: stats.dropped,
            recent_failures: stats.recent_failures.iter().cloned().collect(),
        }
    }

    /// Enqueue the full refresh sequence at refresh priority.
    ///
    /// Shares its guard with the daily list refresh; returns immediately.
    pub fn trigger_refresh(&self, request: RefreshRequest) -> RefreshResponse {
        let Some(lease) = self.inner.guards.try_acquire(FULL_REFRESH_GUARD) else {
            return RefreshResponse {
                success: false,
                message: "A full refresh is already running".to_string(),
                queue_length: None,
            };
        };

        let pages = request.pages.unwrap_or(self.inner.config.refresh_pages);
        let detailed = request.detailed.unwrap_or(false);
        let tasks = refresh_tasks(
            PageRange { start: 1, end: pages },
            &self.inner.config.regions,
            detailed,
            PriorityPolicy::REFRESH,
        );
        let enqueued =
            self.enqueue_all(tasks.into_iter().map(|t| t.with_origin(lease.clone())));
        info!("Manual refresh queued {} tasks", enqueued);

        RefreshResponse {
            success: true,
            message: format!(
                "Queued refresh of {} pages{}",
                pages,
                if detailed { " with details" } else { "" }
            ),
            queue_length: Some(self.inner.queue().len()),
        }
    }

    /// Enqueue one maximum-priority update for `entity`.
    pub fn trigger_entity_update(&self, entity: EntityRef) -> UpdateResponse {
        if entity.id.trim().is_empty() || entity.url.trim().is_empty() {
            return UpdateResponse {
                success: false,
                message: "Entity id and url are required".to_string(),
            };
        }

        let label = format!("{}:{}", entity.kind.as_str(), entity.id);
        let kind = match entity.kind {
            EntityKind::Player => TaskKind::DetailFetch { entity },
            EntityKind::Team => TaskKind::TeamUpdate { entity },
            EntityKind::Tournament => TaskKind::TournamentUpdate { entity },
        };
        self.enqueue(Task::new(kind, PriorityPolicy::MANUAL));

        UpdateResponse {
            success: true,
            message: format!("Queued update for {}", label),
        }
    }

    /// Fire one schedule entry unless its previous run is still in flight.
    ///
    /// Every produced task carries the run lease, so the guard stays held
    /// until the last of them (including retries) is finished.
    pub async fn run_producer(&self, entry: &ScheduleEntry) -> ProducerRun {
        let Some(lease) = self.inner.guards.try_acquire(&entry.guard) else {
            return ProducerRun::Skipped;
        };

        match entry.producer.produce().await {
            Ok(tasks) => {
                let enqueued =
                    self.enqueue_all(tasks.into_iter().map(|t| t.with_origin(lease.clone())));
                ProducerRun::Started { enqueued }
            }
            Err(e) => ProducerRun::Failed {
                error: e.to_string(),
            },
        }
    }
}

async fn drain(inner: Arc<Inner>) {
    loop {
        let next = {
            let mut queue = inner.queue();
            let next = queue.dequeue();
            if next.is_none() {
                // Decided under the queue lock so a concurrent enqueue either
                // lands before this check or starts a fresh loop.
                inner.draining.store(false, Ordering::Release);
                inner.state_tx.send_replace(SchedulerState::Idle);
            }
            next
        };
        match next {
            Some(task) => run_one(&inner, task).await,
            None => return,
        }
    }
}

async fn run_one(inner: &Inner, task: Task) {
    debug!("Running {} (attempt {})", task.kind, task.retry_count + 1);

    // Spawned so a panicking handler surfaces as a JoinError
    let handler = inner.handler.clone();
    let attempt = task.clone();
    let outcome = match tokio::spawn(async move { handler.handle(&attempt).await }).await {
        Ok(result) => result,
        Err(e) => Err(TaskError::Panicked(e.to_string())),
    };

    match outcome {
        Ok(()) => {
            inner.stats().completed += 1;
        }
        Err(e) => {
            inner.stats().failed_attempts += 1;
            match inner.config.retry.next_attempt(&task) {
                Some(next) => {
                    warn!(
                        "{} failed (attempt {}): {}; requeued at priority {}",
                        task.kind,
                        task.retry_count + 1,
                        e,
                        next.priority
                    );
                    inner.queue().enqueue(next);
                }
                None => {
                    error!(
                        "{} dropped after {} attempts: {}",
                        task.kind,
                        task.retry_count + 1,
                        e
                    );
                    let mut stats = inner.stats();
                    stats.dropped += 1;
                    stats.recent_failures.push_back(TerminalFailure {
                        task: task.kind.to_string(),
                        attempts: task.retry_count + 1,
                        error: e.to_string(),
                        at: Utc::now(),
                    });
                    while stats.recent_failures.len() > RECENT_FAILURES {
                        stats.recent_failures.pop_front();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ListTarget;
    use async_trait::async_trait;

    struct FailingHandler;

    #[async_trait]
    impl TaskHandler for FailingHandler {
        async fn handle(&self, _task: &Task) -> Result<(), TaskError> {
            Err(TaskError::Scrape(crate::scrapers::ScrapeError::Parse(
                "bad page".into(),
            )))
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl TaskHandler for PanickingHandler {
        async fn handle(&self, _task: &Task) -> Result<(), TaskError> {
            panic!("handler bug");
        }
    }

    fn scheduler(handler: Arc<dyn TaskHandler>) -> Scheduler {
        Scheduler::new(handler, SchedulerConfig::default(), ActiveRequests::new())
    }

    fn page_task(page: u32) -> Task {
        Task::new(
            TaskKind::ListFetch {
                target: ListTarget::PlayerPage(page),
                detailed: false,
            },
            10,
        )
    }

    #[tokio::test]
    async fn test_failing_task_dropped_after_cap() {
        let scheduler = scheduler(Arc::new(FailingHandler));
        scheduler.enqueue(page_task(1));
        scheduler.wait_idle().await;

        let stats = scheduler.stats();
        assert_eq!(stats.failed_attempts, 4);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.recent_failures[0].attempts, 4);
        assert_eq!(scheduler.status().queue_length, 0);
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_kill_loop() {
        let scheduler = scheduler(Arc::new(PanickingHandler));
        scheduler.enqueue(page_task(1));
        scheduler.wait_idle().await;

        let stats = scheduler.stats();
        assert_eq!(stats.dropped, 1);
        assert!(stats.recent_failures[0].error.contains("panicked"));
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_refresh_conflict_reported() {
        let scheduler = scheduler(Arc::new(FailingHandler));
        let first = scheduler.trigger_refresh(RefreshRequest {
            pages: Some(2),
            detailed: None,
        });
        assert!(first.success);
        // 2 pages + 4 regions + event list
        assert!(first.queue_length.unwrap() <= 7);

        let second = scheduler.trigger_refresh(RefreshRequest::default());
        assert!(!second.success);
        assert_eq!(second.queue_length, None);

        scheduler.wait_idle().await;
        assert!(!scheduler.is_producer_running(FULL_REFRESH_GUARD));
        assert!(scheduler.trigger_refresh(RefreshRequest::default()).success);
    }

    #[tokio::test]
    async fn test_entity_update_validation() {
        let scheduler = scheduler(Arc::new(FailingHandler));
        let response =
            scheduler.trigger_entity_update(EntityRef::new(EntityKind::Player, " ", "https://s"));
        assert!(!response.success);
        assert_eq!(scheduler.status().queue_length, 0);
    }

    #[test]
    fn test_refresh_response_wire_shape() {
        let conflict = RefreshResponse {
            success: false,
            message: "busy".into(),
            queue_length: None,
        };
        assert_eq!(
            serde_json::to_value(&conflict).unwrap(),
            serde_json::json!({"success": false, "message": "busy"})
        );
    }
}
