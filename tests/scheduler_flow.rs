//! End-to-end drain loop behaviour with scripted handlers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rosterwatch::models::{EntityKind, EntityRef, ListTarget};
use rosterwatch::scheduler::{
    CronSchedule, Producer, ProducerError, ProducerRun, RefreshRequest, ScheduleEntry,
    Scheduler, SchedulerConfig, TaskError, TaskHandler, FULL_REFRESH_GUARD,
};
use rosterwatch::scrapers::{ActiveRequests, ScrapeError};
use rosterwatch::work_queue::{Task, TaskKind};
use tokio::sync::Semaphore;

/// One handled attempt: (page, priority, retry_count).
type Attempt = (u32, i32, u32);

/// Fails page `n` the first `failures[n]` times; panics on pages in `panics`.
#[derive(Default)]
struct ScriptedHandler {
    failures: HashMap<u32, u32>,
    panics: Vec<u32>,
    gate: Option<Arc<Semaphore>>,
    seen: Mutex<Vec<Attempt>>,
}

impl ScriptedHandler {
    fn attempts(&self) -> Vec<Attempt> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskHandler for ScriptedHandler {
    async fn handle(&self, task: &Task) -> Result<(), TaskError> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }
        let page = match &task.kind {
            TaskKind::ListFetch {
                target: ListTarget::PlayerPage(page),
                ..
            } => *page,
            _ => 0,
        };
        let earlier = {
            let mut seen = self.seen.lock().unwrap();
            let earlier = seen.iter().filter(|(p, _, _)| *p == page).count() as u32;
            seen.push((page, task.priority, task.retry_count));
            earlier
        };

        if self.panics.contains(&page) {
            panic!("scripted panic on page {page}");
        }
        if earlier < self.failures.get(&page).copied().unwrap_or(0) {
            return Err(TaskError::Scrape(ScrapeError::Timeout(format!("page {page}"))));
        }
        Ok(())
    }
}

fn page_task(page: u32, priority: i32) -> Task {
    Task::new(
        TaskKind::ListFetch {
            target: ListTarget::PlayerPage(page),
            detailed: false,
        },
        priority,
    )
}

fn scheduler(handler: Arc<ScriptedHandler>) -> Scheduler {
    Scheduler::new(handler, SchedulerConfig::default(), ActiveRequests::new())
}

#[tokio::test]
async fn test_drain_order_follows_priority_then_arrival() {
    let handler = Arc::new(ScriptedHandler::default());
    let scheduler = scheduler(handler.clone());

    scheduler.enqueue_all(
        [(1, 1), (2, 5), (3, 1), (4, 5), (5, 3)].map(|(page, priority)| page_task(page, priority)),
    );
    scheduler.wait_idle().await;

    let pages: Vec<u32> = handler.attempts().iter().map(|a| a.0).collect();
    assert_eq!(pages, vec![2, 4, 5, 1, 3]);
    assert_eq!(scheduler.stats().completed, 5);
}

#[tokio::test]
async fn test_retry_decays_priority_until_success() {
    let handler = Arc::new(ScriptedHandler {
        failures: HashMap::from([(7, 2)]),
        ..Default::default()
    });
    let scheduler = scheduler(handler.clone());

    scheduler.enqueue(page_task(7, 20));
    scheduler.wait_idle().await;

    assert_eq!(handler.attempts(), vec![(7, 20, 0), (7, 19, 1), (7, 18, 2)]);
    let stats = scheduler.stats();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed_attempts, 2);
    assert_eq!(stats.dropped, 0);
}

#[tokio::test]
async fn test_four_failures_drop_the_task() {
    let handler = Arc::new(ScriptedHandler {
        failures: HashMap::from([(9, u32::MAX)]),
        ..Default::default()
    });
    let scheduler = scheduler(handler.clone());

    scheduler.enqueue(page_task(9, 20));
    scheduler.wait_idle().await;

    assert_eq!(
        handler.attempts(),
        vec![(9, 20, 0), (9, 19, 1), (9, 18, 2), (9, 17, 3)]
    );
    assert_eq!(scheduler.status().queue_length, 0);
    assert!(scheduler.pending().is_empty());

    let stats = scheduler.stats();
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.recent_failures.len(), 1);
    assert_eq!(stats.recent_failures[0].attempts, 4);
}

#[tokio::test]
async fn test_retry_does_not_block_fresh_work() {
    let handler = Arc::new(ScriptedHandler {
        failures: HashMap::from([(1, 1)]),
        ..Default::default()
    });
    let scheduler = scheduler(handler.clone());

    // The retry of page 1 drops to 9, below page 2
    scheduler.enqueue_all([page_task(1, 10), page_task(2, 9), page_task(3, 8)]);
    scheduler.wait_idle().await;

    let pages: Vec<u32> = handler.attempts().iter().map(|a| a.0).collect();
    assert_eq!(pages, vec![1, 2, 1, 3]);
}

#[tokio::test]
async fn test_panicking_task_is_contained() {
    let handler = Arc::new(ScriptedHandler {
        panics: vec![1],
        ..Default::default()
    });
    let scheduler = scheduler(handler.clone());

    scheduler.enqueue_all([page_task(1, 10), page_task(2, 5)]);
    scheduler.wait_idle().await;

    let stats = scheduler.stats();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.dropped, 1);
    assert_eq!(handler.attempts().last(), Some(&(2, 5, 0)));
}

struct FixedProducer {
    pages: u32,
}

#[async_trait]
impl Producer for FixedProducer {
    async fn produce(&self) -> Result<Vec<Task>, ProducerError> {
        Ok((1..=self.pages).map(|p| page_task(p, 10)).collect())
    }
}

struct BrokenProducer;

#[async_trait]
impl Producer for BrokenProducer {
    async fn produce(&self) -> Result<Vec<Task>, ProducerError> {
        Err(ProducerError::InvalidSchedule {
            expr: "n/a".into(),
            reason: "store offline".into(),
        })
    }
}

fn entry(name: &str, producer: Arc<dyn Producer>) -> ScheduleEntry {
    ScheduleEntry::new(name, CronSchedule::parse("0 0 3 * * *").unwrap(), producer)
}

#[tokio::test]
async fn test_overlapping_producer_run_is_skipped() {
    let gate = Arc::new(Semaphore::new(0));
    let handler = Arc::new(ScriptedHandler {
        gate: Some(gate.clone()),
        ..Default::default()
    });
    let scheduler = scheduler(handler.clone());
    let weekly = entry("weekly-teams", Arc::new(FixedProducer { pages: 3 }));

    assert_eq!(
        scheduler.run_producer(&weekly).await,
        ProducerRun::Started { enqueued: 3 }
    );
    assert!(scheduler.is_producer_running("weekly-teams"));
    assert_eq!(scheduler.run_producer(&weekly).await, ProducerRun::Skipped);

    gate.add_permits(1);
    scheduler.wait_idle().await;
    assert_eq!(handler.attempts().len(), 3);
    assert!(!scheduler.is_producer_running("weekly-teams"));
    assert!(matches!(
        scheduler.run_producer(&weekly).await,
        ProducerRun::Started { enqueued: 3 }
    ));
}

#[tokio::test]
async fn test_failed_producer_releases_guard() {
    let scheduler = scheduler(Arc::new(ScriptedHandler::default()));
    let broken = entry("daily-tournaments", Arc::new(BrokenProducer));

    assert!(matches!(
        scheduler.run_producer(&broken).await,
        ProducerRun::Failed { .. }
    ));
    assert!(!scheduler.is_producer_running("daily-tournaments"));
}

#[tokio::test]
async fn test_manual_refresh_shares_daily_guard() {
    let gate = Arc::new(Semaphore::new(0));
    let scheduler = scheduler(Arc::new(ScriptedHandler {
        gate: Some(gate.clone()),
        ..Default::default()
    }));
    let daily = entry("daily-basic", Arc::new(FixedProducer { pages: 2 }))
        .with_guard(FULL_REFRESH_GUARD);

    assert!(matches!(
        scheduler.run_producer(&daily).await,
        ProducerRun::Started { .. }
    ));
    let conflict = scheduler.trigger_refresh(RefreshRequest::default());
    assert!(!conflict.success);
    assert_eq!(conflict.queue_length, None);

    gate.add_permits(1);
    scheduler.wait_idle().await;
    let response = scheduler.trigger_refresh(RefreshRequest {
        pages: Some(1),
        detailed: Some(false),
    });
    assert!(response.success);
    scheduler.wait_idle().await;
}

#[tokio::test]
async fn test_manual_update_jumps_the_queue() {
    let gate = Arc::new(Semaphore::new(0));
    let handler = Arc::new(ScriptedHandler {
        gate: Some(gate.clone()),
        ..Default::default()
    });
    let scheduler = scheduler(handler.clone());

    scheduler.enqueue_all([page_task(1, 10), page_task(2, 10)]);
    // Let the loop pick up page 1 and block on the gate
    tokio::time::sleep(Duration::from_millis(10)).await;

    let response = scheduler.trigger_entity_update(EntityRef::new(
        EntityKind::Player,
        "faker",
        "https://stats.example.gg/players/faker",
    ));
    assert!(response.success);

    let pending = scheduler.pending();
    assert!(matches!(pending[0].kind, TaskKind::DetailFetch { .. }));
    assert_eq!(pending[0].priority, 100);

    gate.add_permits(1);
    scheduler.wait_idle().await;
    // page 1, then the update (page 0), then page 2
    let pages: Vec<u32> = handler.attempts().iter().map(|a| a.0).collect();
    assert_eq!(pages, vec![1, 0, 2]);
}
