//! Player, team and tournament records as seen by the scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::source::{OpClass, Source};

/// Kind of tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Player,
    Team,
    Tournament,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Player => "player",
            Self::Team => "team",
            Self::Tournament => "tournament",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "player" => Some(Self::Player),
            "team" => Some(Self::Team),
            "tournament" => Some(Self::Tournament),
            _ => None,
        }
    }

    /// Source that owns detail pages for this kind.
    pub fn home_source(&self) -> Source {
        match self {
            Self::Player => Source::Stats,
            Self::Team | Self::Tournament => Source::Wiki,
        }
    }
}

/// Which detail page of an entity to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DetailScope {
    #[default]
    Profile,
    Earnings,
}

impl DetailScope {
    /// Cache category for payloads of this scope.
    pub fn cache_category(&self) -> &'static str {
        match self {
            Self::Profile => "detail",
            Self::Earnings => "earnings",
        }
    }
}

/// Lightweight identifier carried inside tasks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
    pub url: String,
    /// Competitive tier, 1 being the top tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<u8>,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            url: url.into(),
            tier: None,
        }
    }
}

/// A scraped entity, as handed to the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub kind: EntityKind,
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub url: String,
    #[serde(default)]
    pub tier: Option<u8>,
    /// Source-specific attributes.
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl EntityRecord {
    pub fn new(kind: EntityKind, id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            name: None,
            url: url.into(),
            tier: None,
            data: Map::new(),
            updated_at: None,
        }
    }

    pub fn reference(&self) -> EntityRef {
        EntityRef {
            kind: self.kind,
            id: self.id.clone(),
            url: self.url.clone(),
            tier: self.tier,
        }
    }

    /// Whether an attribute is present and non-null.
    pub fn has_attribute(&self, key: &str) -> bool {
        self.data.get(key).is_some_and(|v| !v.is_null())
    }

    /// Merge a detail payload into this record.
    ///
    /// Profile objects are merged key by key; earnings payloads are stored
    /// under the `earnings` attribute. Non-object profile payloads are kept
    /// under `detail`.
    pub fn merge_detail(&mut self, scope: DetailScope, data: Value) {
        match (scope, data) {
            (DetailScope::Profile, Value::Object(fields)) => {
                if self.name.is_none() {
                    self.name = fields.get("name").and_then(Value::as_str).map(String::from);
                }
                if self.tier.is_none() {
                    self.tier = fields
                        .get("tier")
                        .and_then(Value::as_u64)
                        .and_then(|t| u8::try_from(t).ok());
                }
                self.data.extend(fields);
            }
            (DetailScope::Profile, other) => {
                self.data.insert("detail".to_string(), other);
            }
            (DetailScope::Earnings, value) => {
                self.data.insert("earnings".to_string(), value);
            }
        }
        self.updated_at = Some(Utc::now());
    }
}

/// A list-level page of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "target", content = "value")]
pub enum ListTarget {
    /// Numbered page of the player ranking on the stats site.
    PlayerPage(u32),
    /// Team portal for one region on the wiki.
    TeamRegion(String),
    /// Tournament/event listing on the wiki.
    EventList,
}

impl ListTarget {
    pub fn source(&self) -> Source {
        match self {
            Self::PlayerPage(_) => Source::Stats,
            Self::TeamRegion(_) | Self::EventList => Source::Wiki,
        }
    }

    pub fn op_class(&self) -> OpClass {
        match self {
            Self::PlayerPage(_) => OpClass::Query,
            Self::TeamRegion(_) | Self::EventList => OpClass::Parse,
        }
    }

    pub fn entity_kind(&self) -> EntityKind {
        match self {
            Self::PlayerPage(_) => EntityKind::Player,
            Self::TeamRegion(_) => EntityKind::Team,
            Self::EventList => EntityKind::Tournament,
        }
    }

    /// Identifier used in cache keys.
    pub fn cache_id(&self) -> String {
        match self {
            Self::PlayerPage(page) => format!("page-{}", page),
            Self::TeamRegion(region) => format!("region-{}", region),
            Self::EventList => "events".to_string(),
        }
    }
}

impl std::fmt::Display for ListTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PlayerPage(page) => write!(f, "player page {}", page),
            Self::TeamRegion(region) => write!(f, "team region {}", region),
            Self::EventList => f.write_str("event list"),
        }
    }
}
