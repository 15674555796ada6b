//! Persistence seam for collected entities.
//!
//! The relational store lives outside this crate; handlers and producers talk
//! to it through `EntityStore`. `InMemoryEntityStore` backs tests and
//! single-process runs.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::models::{DetailScope, EntityKind, EntityRecord, EntityRef};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Which entities a producer should refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct StalenessRule {
    /// Not updated within this long (never-updated always counts).
    pub max_age: Duration,
    /// Missing this attribute counts as stale regardless of age.
    pub require_attribute: Option<String>,
}

impl StalenessRule {
    pub fn older_than(max_age: Duration) -> Self {
        Self {
            max_age,
            require_attribute: None,
        }
    }

    pub fn requiring(mut self, attribute: impl Into<String>) -> Self {
        self.require_attribute = Some(attribute.into());
        self
    }

    pub fn is_stale(&self, record: &EntityRecord) -> bool {
        if let Some(attr) = &self.require_attribute {
            if !record.has_attribute(attr) {
                return true;
            }
        }
        match record.updated_at {
            None => true,
            Some(updated_at) => (Utc::now() - updated_at)
                .to_std()
                .map(|age| age > self.max_age)
                .unwrap_or(false),
        }
    }
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Upsert list results, keeping previously collected detail data.
    async fn save_entities(&self, records: &[EntityRecord]) -> StoreResult<usize>;

    /// Merge a detail payload into an existing (or new) entity.
    async fn save_detail(
        &self,
        entity: &EntityRef,
        scope: DetailScope,
        data: Value,
    ) -> StoreResult<()>;

    async fn get(&self, kind: EntityKind, id: &str) -> StoreResult<Option<EntityRecord>>;

    async fn stale_entities(
        &self,
        kind: EntityKind,
        rule: &StalenessRule,
    ) -> StoreResult<Vec<EntityRef>>;

    async fn count(&self, kind: EntityKind) -> StoreResult<usize>;
}

#[derive(Default)]
pub struct InMemoryEntityStore {
    records: RwLock<HashMap<(EntityKind, String), EntityRecord>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn save_entities(&self, records: &[EntityRecord]) -> StoreResult<usize> {
        let mut map = self.records.write().await;
        for record in records {
            let key = (record.kind, record.id.clone());
            match map.get_mut(&key) {
                Some(existing) => {
                    if record.name.is_some() {
                        existing.name = record.name.clone();
                    }
                    if record.tier.is_some() {
                        existing.tier = record.tier;
                    }
                    existing.url = record.url.clone();
                    existing
                        .data
                        .extend(record.data.iter().map(|(k, v)| (k.clone(), v.clone())));
                    if record.updated_at.is_some() {
                        existing.updated_at = record.updated_at;
                    }
                }
                None => {
                    map.insert(key, record.clone());
                }
            }
        }
        Ok(records.len())
    }

    async fn save_detail(
        &self,
        entity: &EntityRef,
        scope: DetailScope,
        data: Value,
    ) -> StoreResult<()> {
        let mut map = self.records.write().await;
        let record = map
            .entry((entity.kind, entity.id.clone()))
            .or_insert_with(|| {
                let mut record = EntityRecord::new(entity.kind, &entity.id, &entity.url);
                record.tier = entity.tier;
                record
            });
        record.merge_detail(scope, data);
        Ok(())
    }

    async fn get(&self, kind: EntityKind, id: &str) -> StoreResult<Option<EntityRecord>> {
        Ok(self.records.read().await.get(&(kind, id.to_string())).cloned())
    }

    async fn stale_entities(
        &self,
        kind: EntityKind,
        rule: &StalenessRule,
    ) -> StoreResult<Vec<EntityRef>> {
        let map = self.records.read().await;
        let mut stale: Vec<EntityRef> = map
            .values()
            .filter(|r| r.kind == kind && rule.is_stale(r))
            .map(EntityRecord::reference)
            .collect();
        stale.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(stale)
    }

    async fn count(&self, kind: EntityKind) -> StoreResult<usize> {
        Ok(self
            .records
            .read()
            .await
            .keys()
            .filter(|(k, _)| *k == kind)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn player(id: &str) -> EntityRecord {
        EntityRecord::new(EntityKind::Player, id, format!("https://stats.example.gg/players/{id}"))
    }

    #[tokio::test]
    async fn test_save_entities_keeps_detail_data() {
        let store = InMemoryEntityStore::new();
        let entity = player("faker").reference();
        store
            .save_detail(&entity, DetailScope::Earnings, json!({"total": "1.5M"}))
            .await
            .unwrap();

        let mut listed = player("faker");
        listed.data.insert("rank".into(), json!("1"));
        store.save_entities(&[listed]).await.unwrap();

        let record = store.get(EntityKind::Player, "faker").await.unwrap().unwrap();
        assert!(record.has_attribute("earnings"));
        assert!(record.has_attribute("rank"));
        assert!(record.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_stale_entities() {
        let store = InMemoryEntityStore::new();
        let mut fresh = player("fresh");
        fresh.updated_at = Some(Utc::now());
        fresh.data.insert("earnings".into(), json!({}));
        let mut old = player("old");
        old.updated_at = Some(Utc::now() - chrono::Duration::days(10));
        let mut unearned = player("unearned");
        unearned.updated_at = Some(Utc::now());
        store
            .save_entities(&[fresh, old, unearned, player("never")])
            .await
            .unwrap();

        let week = Duration::from_secs(7 * 24 * 3600);
        let ids = |refs: Vec<EntityRef>| refs.into_iter().map(|r| r.id).collect::<Vec<_>>();

        let stale = store
            .stale_entities(EntityKind::Player, &StalenessRule::older_than(week))
            .await
            .unwrap();
        assert_eq!(ids(stale), vec!["never", "old"]);

        let stale = store
            .stale_entities(
                EntityKind::Player,
                &StalenessRule::older_than(week).requiring("earnings"),
            )
            .await
            .unwrap();
        assert_eq!(ids(stale), vec!["never", "old", "unearned"]);

        assert!(store
            .stale_entities(EntityKind::Team, &StalenessRule::older_than(week))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.count(EntityKind::Player).await.unwrap(), 4);
    }
}
