//! Caching front for a [`RecordSource`].
//!
//! Relation lookups made while expanding a traversal level go through the
//! browser. Prefetching fills its cache in batches; with requests disabled
//! (strict-cache mode) any lookup the cache cannot answer fails with
//! [`AqneoError::ForbiddenFetch`] instead of reaching the source.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::entity::{Entity, NodeKey};
use crate::error::{AqneoError, AqneoResult};
use crate::source::{RecordSource, RelationSpec};

#[derive(Debug, Default)]
struct BrowserCache {
    entities: HashMap<NodeKey, Entity>,
    relations: HashMap<(NodeKey, String), Vec<Entity>>,
}

pub struct Browser {
    source: Arc<dyn RecordSource>,
    cache: Mutex<BrowserCache>,
    requests_allowed: AtomicBool,
}

impl Browser {
    pub fn new(source: Arc<dyn RecordSource>) -> Self {
        Self {
            source,
            cache: Mutex::new(BrowserCache::default()),
            requests_allowed: AtomicBool::new(true),
        }
    }

    fn cache(&self) -> MutexGuard<'_, BrowserCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remember entities so later fetches by id are served locally.
    pub fn update_cache(&self, entities: &[Entity]) {
        let mut cache = self.cache();
        for entity in entities {
            cache.entities.insert(entity.key(), entity.clone());
        }
    }

    pub fn requests_allowed(&self) -> bool {
        self.requests_allowed.load(Ordering::SeqCst)
    }

    /// Enable or disable remote requests, returning the previous setting.
    pub fn set_requests_allowed(&self, allowed: bool) -> bool {
        self.requests_allowed.swap(allowed, Ordering::SeqCst)
    }

    pub fn is_cached(&self, owner: &NodeKey, relation: &str) -> bool {
        self.cache()
            .relations
            .contains_key(&(owner.clone(), relation.to_string()))
    }

    fn forbid(&self, relation: &str, key: &NodeKey) -> AqneoResult<()> {
        if self.requests_allowed() {
            Ok(())
        } else {
            Err(AqneoError::ForbiddenFetch {
                relation: relation.to_string(),
                key: key.clone(),
            })
        }
    }

    /// Fetch an entity by type and id.
    pub async fn fetch(&self, type_tag: &str, id: i64) -> AqneoResult<Entity> {
        let key = NodeKey::new(type_tag, id);
        if let Some(entity) = self.cache().entities.get(&key) {
            return Ok(entity.clone());
        }
        self.forbid("id", &key)?;

        let entity = self.source.fetch_by_id(type_tag, id).await?;
        self.cache().entities.insert(key, entity.clone());
        Ok(entity)
    }

    /// Entities reached from `entity` through `relation`.
    pub async fn related(&self, entity: &Entity, relation: &str) -> AqneoResult<Vec<Entity>> {
        let owner = entity.key();
        let cache_key = (owner.clone(), relation.to_string());
        if let Some(related) = self.cache().relations.get(&cache_key) {
            return Ok(related.clone());
        }
        self.forbid(relation, &owner)?;

        debug!(owner = %owner, relation, "Fetching relation on demand");
        let related = self.source.expand_relation(entity, relation).await?;
        let mut cache = self.cache();
        for e in &related {
            cache.entities.insert(e.key(), e.clone());
        }
        cache.relations.insert(cache_key, related.clone());
        Ok(related)
    }

    /// Warm `spec` for `entities` with a single batched source call.
    /// Entities whose top-level relations are all cached are skipped.
    pub async fn prefetch(&self, entities: &[Entity], spec: &RelationSpec) -> AqneoResult<()> {
        if spec.is_empty() {
            return Ok(());
        }

        let pending: Vec<Entity> = {
            let cache = self.cache();
            entities
                .iter()
                .filter(|e| {
                    spec.iter().any(|(relation, _)| {
                        !cache
                            .relations
                            .contains_key(&(e.key(), relation.to_string()))
                    })
                })
                .cloned()
                .collect()
        };
        let Some(first) = pending.first() else {
            return Ok(());
        };
        if let Some((relation, _)) = spec.iter().next() {
            self.forbid(relation, &first.key())?;
        }

        let warmed = self.source.prefetch_batch(&pending, spec).await?;
        debug!(entities = pending.len(), relations = warmed.len(), "Prefetched relations");

        let mut cache = self.cache();
        for batch in warmed {
            for e in &batch.related {
                cache.entities.insert(e.key(), e.clone());
            }
            cache
                .relations
                .insert((batch.owner, batch.relation), batch.related);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn source() -> (Arc<MemorySource>, Entity) {
        let sample = Entity::new("Sample", 1);
        let item = Entity::new("Item", 2);
        let mut source = MemorySource::new();
        source.insert(sample.clone());
        source.insert(item.clone());
        source.relate(&sample, "items", &item);
        (Arc::new(source), sample)
    }

    #[tokio::test]
    async fn test_related_is_cached() {
        let (source, sample) = source();
        let browser = Browser::new(source.clone());

        assert_eq!(browser.related(&sample, "items").await.unwrap().len(), 1);
        assert_eq!(browser.related(&sample, "items").await.unwrap().len(), 1);
        assert_eq!(source.requests(), 1);
        assert!(browser.is_cached(&sample.key(), "items"));
    }

    #[tokio::test]
    async fn test_forbidden_fetch_names_relation() {
        let (source, sample) = source();
        let browser = Browser::new(source.clone());
        browser.set_requests_allowed(false);

        let err = browser.related(&sample, "items").await.unwrap_err();
        match err {
            AqneoError::ForbiddenFetch { relation, key } => {
                assert_eq!(relation, "items");
                assert_eq!(key, sample.key());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(source.requests(), 0);
    }

    #[tokio::test]
    async fn test_prefetch_serves_strict_lookups() {
        let (source, sample) = source();
        let browser = Browser::new(source.clone());
        browser
            .prefetch(&[sample.clone()], &RelationSpec::new().relation("items"))
            .await
            .unwrap();

        browser.set_requests_allowed(false);
        let items = browser.related(&sample, "items").await.unwrap();
        assert_eq!(items[0].key(), NodeKey::new("Item", 2));
        assert_eq!(browser.fetch("Item", 2).await.unwrap().id(), 2);

        // Already warm: no second round trip.
        browser.set_requests_allowed(true);
        browser
            .prefetch(&[sample], &RelationSpec::new().relation("items"))
            .await
            .unwrap();
        assert_eq!(source.batch_requests(), 1);
    }
}
