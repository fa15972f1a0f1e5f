//! Record system collaborator interface.
//!
//! The remote record system owns its own query, pagination and caching
//! semantics. The graph builder needs three things from it: fetch an entity
//! by id, fetch the entities related through a named relation, and warm a
//! batch of relations for many entities in as few round trips as possible.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, NodeKey};
use crate::error::{AqneoError, AqneoResult};

/// Nested relation tree describing what to prefetch, e.g.
/// `{"items": {"object_type": {}, "sample": {}}, "sample_type": {}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationSpec {
    relations: BTreeMap<String, RelationSpec>,
}

impl RelationSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a leaf relation.
    pub fn relation(self, name: impl Into<String>) -> Self {
        self.nested(name, RelationSpec::new())
    }

    /// Add a relation whose targets are prefetched with `nested`.
    pub fn nested(mut self, name: impl Into<String>, nested: RelationSpec) -> Self {
        self.relations.entry(name.into()).or_default().merge(nested);
        self
    }

    /// Union `other` into this tree.
    pub fn merge(&mut self, other: RelationSpec) {
        for (name, nested) in other.relations {
            self.relations.entry(name).or_default().merge(nested);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RelationSpec)> {
        self.relations.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn contains(&self, relation: &str) -> bool {
        self.relations.contains_key(relation)
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

/// One warmed relation: the entities reached from `owner` through `relation`.
#[derive(Debug, Clone, PartialEq)]
pub struct PrefetchedRelation {
    pub owner: NodeKey,
    pub relation: String,
    pub related: Vec<Entity>,
}

/// The remote record system.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch_by_id(&self, type_tag: &str, id: i64) -> AqneoResult<Entity>;

    async fn expand_relation(&self, entity: &Entity, relation: &str) -> AqneoResult<Vec<Entity>>;

    /// Warm `spec` for every entity in `entities`. Best effort; the default
    /// walks the tree one relation lookup at a time.
    async fn prefetch_batch(
        &self,
        entities: &[Entity],
        spec: &RelationSpec,
    ) -> AqneoResult<Vec<PrefetchedRelation>> {
        let mut warmed = Vec::new();
        for (relation, nested) in spec.iter() {
            let mut reached = Vec::new();
            for entity in entities {
                let related = self.expand_relation(entity, relation).await?;
                reached.extend(related.iter().cloned());
                warmed.push(PrefetchedRelation {
                    owner: entity.key(),
                    relation: relation.to_string(),
                    related,
                });
            }
            if !nested.is_empty() && !reached.is_empty() {
                warmed.extend(self.prefetch_batch(&reached, nested).await?);
            }
        }
        Ok(warmed)
    }
}

/// Serialized form of a [`MemorySource`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordSnapshot {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relations: Vec<RelationRecord>,
}

/// `from --relation--> to[..]` in a [`RecordSnapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationRecord {
    pub from: NodeKey,
    pub relation: String,
    #[serde(default)]
    pub to: Vec<NodeKey>,
}

/// In-memory record source. Counts every lookup it serves so callers can
/// observe how many round trips a traversal costs.
#[derive(Debug, Default)]
pub struct MemorySource {
    entities: HashMap<NodeKey, Entity>,
    relations: HashMap<(NodeKey, String), Vec<NodeKey>>,
    requests: AtomicUsize,
    batch_requests: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: RecordSnapshot) -> Self {
        let mut source = Self::new();
        for entity in snapshot.entities {
            source.insert(entity);
        }
        for record in snapshot.relations {
            source
                .relations
                .entry((record.from, record.relation))
                .or_default()
                .extend(record.to);
        }
        source
    }

    pub fn from_json(json: &str) -> AqneoResult<Self> {
        let snapshot: RecordSnapshot = serde_json::from_str(json)?;
        Ok(Self::from_snapshot(snapshot))
    }

    /// Load a JSON snapshot file.
    pub fn load(path: &Path) -> AqneoResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn insert(&mut self, entity: Entity) {
        self.entities.insert(entity.key(), entity);
    }

    /// Record `from --relation--> to`. Both ends should be inserted.
    pub fn relate(&mut self, from: &Entity, relation: &str, to: &Entity) {
        self.relations
            .entry((from.key(), relation.to_string()))
            .or_default()
            .push(to.key());
    }

    pub fn get(&self, key: &NodeKey) -> Option<&Entity> {
        self.entities.get(key)
    }

    /// Every entity of a type, ordered by id.
    pub fn entities_of(&self, type_tag: &str) -> Vec<Entity> {
        let mut found: Vec<Entity> = self
            .entities
            .values()
            .filter(|e| e.type_tag() == type_tag)
            .cloned()
            .collect();
        found.sort_by_key(Entity::id);
        found
    }

    pub fn type_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .entities
            .keys()
            .map(|k| k.type_tag.clone())
            .collect();
        tags.sort();
        tags.dedup();
        tags
    }

    /// Single lookups served so far (fetches and relation expansions).
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Batch prefetch round trips served so far.
    pub fn batch_requests(&self) -> usize {
        self.batch_requests.load(Ordering::SeqCst)
    }

    fn lookup(&self, owner: &NodeKey, relation: &str) -> AqneoResult<Vec<Entity>> {
        let Some(targets) = self.relations.get(&(owner.clone(), relation.to_string())) else {
            return Ok(Vec::new());
        };
        targets
            .iter()
            .map(|key| {
                self.entities.get(key).cloned().ok_or_else(|| {
                    AqneoError::source(format!("{owner} --{relation}--> {key}: target not found"))
                })
            })
            .collect()
    }

    fn walk(
        &self,
        entities: &[Entity],
        spec: &RelationSpec,
        warmed: &mut Vec<PrefetchedRelation>,
    ) -> AqneoResult<()> {
        for (relation, nested) in spec.iter() {
            let mut reached = Vec::new();
            for entity in entities {
                let related = self.lookup(&entity.key(), relation)?;
                reached.extend(related.iter().cloned());
                warmed.push(PrefetchedRelation {
                    owner: entity.key(),
                    relation: relation.to_string(),
                    related,
                });
            }
            if !nested.is_empty() && !reached.is_empty() {
                self.walk(&reached, nested, warmed)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn fetch_by_id(&self, type_tag: &str, id: i64) -> AqneoResult<Entity> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let key = NodeKey::new(type_tag, id);
        self.entities
            .get(&key)
            .cloned()
            .ok_or_else(|| AqneoError::source(format!("{key} not found")))
    }

    async fn expand_relation(&self, entity: &Entity, relation: &str) -> AqneoResult<Vec<Entity>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.lookup(&entity.key(), relation)
    }

    async fn prefetch_batch(
        &self,
        entities: &[Entity],
        spec: &RelationSpec,
    ) -> AqneoResult<Vec<PrefetchedRelation>> {
        self.batch_requests.fetch_add(1, Ordering::SeqCst);
        let mut warmed = Vec::new();
        self.walk(entities, spec, &mut warmed)?;
        Ok(warmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = r#"{
        "entities": [
            {"type": "Sample", "id": 1, "attributes": {"name": "pGFP"}},
            {"type": "Item", "id": 10},
            {"type": "ObjectType", "id": 100, "attributes": {"name": "Plasmid Stock"}}
        ],
        "relations": [
            {"from": {"type": "Sample", "id": 1}, "relation": "items", "to": [{"type": "Item", "id": 10}]},
            {"from": {"type": "Item", "id": 10}, "relation": "object_type", "to": [{"type": "ObjectType", "id": 100}]}
        ]
    }"#;

    #[tokio::test]
    async fn test_snapshot_lookup() {
        let source = MemorySource::from_json(SNAPSHOT).unwrap();
        let sample = source.fetch_by_id("Sample", 1).await.unwrap();
        let items = source.expand_relation(&sample, "items").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].key(), NodeKey::new("Item", 10));
        assert!(source.expand_relation(&sample, "nothing").await.unwrap().is_empty());
        assert_eq!(source.requests(), 3);
        assert!(source.fetch_by_id("Sample", 2).await.is_err());
    }

    #[tokio::test]
    async fn test_prefetch_walks_nested_spec() {
        let source = MemorySource::from_json(SNAPSHOT).unwrap();
        let sample = source.get(&NodeKey::new("Sample", 1)).cloned().unwrap();
        let spec = RelationSpec::new().nested("items", RelationSpec::new().relation("object_type"));

        let warmed = source.prefetch_batch(&[sample], &spec).await.unwrap();
        assert_eq!(warmed.len(), 2);
        assert_eq!(warmed[1].owner, NodeKey::new("Item", 10));
        assert_eq!(warmed[1].related[0].key(), NodeKey::new("ObjectType", 100));
        assert_eq!(source.batch_requests(), 1);
        assert_eq!(source.requests(), 0);
    }

    #[test]
    fn test_spec_merge() {
        let mut spec = RelationSpec::new().relation("items");
        spec.merge(RelationSpec::new().nested("items", RelationSpec::new().relation("sample")));
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json, serde_json::json!({"items": {"sample": {}}}));
    }
}
