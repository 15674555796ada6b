//! Declarative cron table and the timers that fire it.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::producers::{Producer, ProducerError};
use super::{ProducerRun, Scheduler};

/// Guard shared by the daily list refresh and the manual refresh trigger.
pub const FULL_REFRESH_GUARD: &str = "full-refresh";

/// Parsed cron expression (seconds field first).
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expr: String,
    schedule: cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, ProducerError> {
        let schedule =
            cron::Schedule::from_str(expr).map_err(|e| ProducerError::InvalidSchedule {
                expr: expr.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            expr: expr.to_string(),
            schedule,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    pub fn upcoming(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }
}

/// One row of the schedule table.
pub struct ScheduleEntry {
    pub name: String,
    pub cron: CronSchedule,
    /// Run guard name; entries sharing a guard never overlap.
    pub guard: String,
    pub producer: Arc<dyn Producer>,
}

impl ScheduleEntry {
    pub fn new(name: &str, cron: CronSchedule, producer: Arc<dyn Producer>) -> Self {
        Self {
            name: name.to_string(),
            cron,
            guard: name.to_string(),
            producer,
        }
    }

    pub fn with_guard(mut self, guard: &str) -> Self {
        self.guard = guard.to_string();
        self
    }
}

/// Cron expressions and staleness thresholds for the default table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulesConfig {
    pub daily_basic: String,
    pub weekly_player_details: String,
    pub biweekly_earnings: String,
    pub daily_tournaments: String,
    pub weekly_teams: String,
    pub player_stale_days: u64,
    pub earnings_stale_days: u64,
    pub tournament_stale_days: u64,
    pub team_stale_days: u64,
    /// Cap on tasks per staleness run.
    pub max_entities_per_run: Option<usize>,
}

impl Default for SchedulesConfig {
    fn default() -> Self {
        Self {
            daily_basic: "0 0 3 * * *".to_string(),
            weekly_player_details: "0 0 4 * * Sun".to_string(),
            biweekly_earnings: "0 0 5 1,15 * *".to_string(),
            daily_tournaments: "0 0 6 * * *".to_string(),
            weekly_teams: "0 0 7 * * Mon".to_string(),
            player_stale_days: 7,
            earnings_stale_days: 14,
            tournament_stale_days: 1,
            team_stale_days: 7,
            max_entities_per_run: None,
        }
    }
}

/// Spawns one timer per schedule entry.
pub struct CronRunner {
    scheduler: Scheduler,
    entries: Vec<Arc<ScheduleEntry>>,
    shutdown_tx: watch::Sender<bool>,
}

impl CronRunner {
    pub fn new(scheduler: Scheduler, entries: Vec<ScheduleEntry>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            scheduler,
            entries: entries.into_iter().map(Arc::new).collect(),
            shutdown_tx,
        }
    }

    pub fn entries(&self) -> &[Arc<ScheduleEntry>] {
        &self.entries
    }

    pub fn start(&self) -> Vec<JoinHandle<()>> {
        self.entries
            .iter()
            .map(|entry| {
                let entry = entry.clone();
                let scheduler = self.scheduler.clone();
                let mut shutdown = self.shutdown_tx.subscribe();
                tokio::spawn(async move {
                    info!("Schedule '{}' armed ({})", entry.name, entry.cron.expr());
                    loop {
                        let now = Utc::now();
                        let Some(next) = entry.cron.next_after(now) else {
                            warn!("Schedule '{}' has no future runs", entry.name);
                            return;
                        };
                        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
                        tokio::select! {
                            _ = tokio::time::sleep(wait) => {}
                            _ = shutdown.changed() => return,
                        }
                        if *shutdown.borrow() {
                            return;
                        }

                        match scheduler.run_producer(&entry).await {
                            ProducerRun::Started { enqueued } => {
                                info!("Schedule '{}' enqueued {} tasks", entry.name, enqueued)
                            }
                            ProducerRun::Skipped => {
                                info!("Schedule '{}' skipped: previous run in flight", entry.name)
                            }
                            ProducerRun::Failed { error } => {
                                warn!("Schedule '{}' failed: {}", entry.name, error)
                            }
                        }
                    }
                })
            })
            .collect()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike};

    #[test]
    fn test_default_expressions_parse() {
        let config = SchedulesConfig::default();
        for expr in [
            &config.daily_basic,
            &config.weekly_player_details,
            &config.biweekly_earnings,
            &config.daily_tournaments,
            &config.weekly_teams,
        ] {
            assert!(CronSchedule::parse(expr).is_ok(), "{expr}");
        }
    }

    #[test]
    fn test_biweekly_runs_on_first_and_fifteenth() {
        let schedule = CronSchedule::parse(&SchedulesConfig::default().biweekly_earnings).unwrap();
        let from = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        let days: Vec<u32> = schedule.upcoming(from, 3).iter().map(|d| d.day()).collect();
        assert_eq!(days, vec![15, 1, 15]);
        assert_eq!(schedule.next_after(from).unwrap().hour(), 5);
    }

    #[test]
    fn test_invalid_expression() {
        assert!(matches!(
            CronSchedule::parse("every tuesday"),
            Err(ProducerError::InvalidSchedule { .. })
        ));
    }
}
