//! Schedulable units of work.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::lease::RunLease;
use crate::models::{EntityRef, ListTarget};

/// Kind-specific payload of a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TaskKind {
    ListFetch { target: ListTarget, detailed: bool },
    DetailFetch { entity: EntityRef },
    EarningsUpdate { entity: EntityRef },
    TournamentUpdate { entity: EntityRef },
    TeamUpdate { entity: EntityRef },
}

/// Payload-free discriminant, used for queue observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKindName {
    ListFetch,
    DetailFetch,
    EarningsUpdate,
    TournamentUpdate,
    TeamUpdate,
}

impl TaskKindName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ListFetch => "list_fetch",
            Self::DetailFetch => "detail_fetch",
            Self::EarningsUpdate => "earnings_update",
            Self::TournamentUpdate => "tournament_update",
            Self::TeamUpdate => "team_update",
        }
    }
}

impl TaskKind {
    pub fn name(&self) -> TaskKindName {
        match self {
            Self::ListFetch { .. } => TaskKindName::ListFetch,
            Self::DetailFetch { .. } => TaskKindName::DetailFetch,
            Self::EarningsUpdate { .. } => TaskKindName::EarningsUpdate,
            Self::TournamentUpdate { .. } => TaskKindName::TournamentUpdate,
            Self::TeamUpdate { .. } => TaskKindName::TeamUpdate,
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ListFetch { target, detailed } => {
                write!(f, "list_fetch({}{})", target, if *detailed { ", detailed" } else { "" })
            }
            Self::DetailFetch { entity }
            | Self::EarningsUpdate { entity }
            | Self::TournamentUpdate { entity }
            | Self::TeamUpdate { entity } => {
                write!(f, "{}({}:{})", self.name().as_str(), entity.kind.as_str(), entity.id)
            }
        }
    }
}

/// A unit of scheduled work.
///
/// Retries never mutate a task in place: `retried` builds the next attempt.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub kind: TaskKind,
    /// Higher runs first.
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    origin: Option<Arc<RunLease>>,
}

impl Task {
    pub fn new(kind: TaskKind, priority: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            priority,
            enqueued_at: Utc::now(),
            retry_count: 0,
            origin: None,
        }
    }

    /// Attach the lease of the producer that created this task.
    pub fn with_origin(mut self, lease: Arc<RunLease>) -> Self {
        self.origin = Some(lease);
        self
    }

    /// Name of the producer that created this task, if any.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref().map(RunLease::name)
    }

    /// Build the next attempt: one more retry, `decay_step` less priority.
    pub fn retried(&self, decay_step: i32) -> Self {
        Self {
            id: self.id,
            kind: self.kind.clone(),
            priority: self.priority.saturating_sub(decay_step),
            enqueued_at: Utc::now(),
            retry_count: self.retry_count + 1,
            origin: self.origin.clone(),
        }
    }
}

/// Domain priority seeding.
pub struct PriorityPolicy;

impl PriorityPolicy {
    /// Per-entity manual updates.
    pub const MANUAL: i32 = 100;
    /// Tasks enqueued by a manual full refresh.
    pub const REFRESH: i32 = 50;
    /// Tier-less entities.
    pub const UNTIERED: i32 = 5;

    /// Highest tier gets highest priority.
    pub fn for_tier(tier: Option<u8>) -> i32 {
        match tier {
            Some(1) => 30,
            Some(2) => 20,
            Some(3) => 10,
            _ => Self::UNTIERED,
        }
    }
}
