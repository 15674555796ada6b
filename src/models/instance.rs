//! Heartbeat records for running collector processes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Liveness of an instance as seen by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Active,
    /// Still stored, but the last heartbeat is older than the TTL.
    Stale,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Stale => "stale",
        }
    }
}

/// One record per live scheduler process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Unique identifier (e.g., "collector-7f3a...").
    pub id: String,
    /// Container ID or hostname.
    pub host: Option<String>,
    /// When the process registered.
    pub started_at: DateTime<Utc>,
    /// Last heartbeat timestamp.
    pub last_heartbeat: DateTime<Utc>,
    pub status: InstanceStatus,
    /// App version.
    pub version: Option<String>,
}

impl InstanceRecord {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            host: get_hostname(),
            started_at: now,
            last_heartbeat: now,
            status: InstanceStatus::Active,
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }
    }

    /// Generate a fresh instance id for this process.
    pub fn generate_id() -> String {
        format!("collector-{}", uuid::Uuid::new_v4().simple())
    }

    /// Stamp a new heartbeat.
    pub fn touch(&mut self) {
        self.last_heartbeat = Utc::now();
        self.status = InstanceStatus::Active;
    }

    /// Set `status` from the heartbeat age.
    pub fn mark_liveness(&mut self, ttl: Duration) {
        self.status = if self.is_stale(ttl) {
            InstanceStatus::Stale
        } else {
            InstanceStatus::Active
        };
    }

    /// Check if the record is stale (no heartbeat within `ttl`).
    pub fn is_stale(&self, ttl: Duration) -> bool {
        let age = Utc::now() - self.last_heartbeat;
        age.to_std().map(|age| age > ttl).unwrap_or(false)
    }
}

/// Get the current hostname.
fn get_hostname() -> Option<String> {
    hostname::get().ok().and_then(|h| h.into_string().ok())
}
