//! Declarative expansion rules keyed by entity type.

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::{Browser, Expand};
use crate::entity::Entity;
use crate::error::{AqneoError, AqneoResult};
use crate::source::RelationSpec;

/// Follow `relation` from an entity and label each resulting edge `label`.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationRule {
    pub relation: String,
    pub label: String,
    /// Relations of the targets to warm alongside this one.
    pub prefetch: RelationSpec,
}

/// A named set of relation rules; entity types without rules are leaves.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    name: String,
    rules: BTreeMap<String, Vec<RelationRule>>,
}

impl RuleSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: BTreeMap::new(),
        }
    }

    pub fn rule(self, type_tag: &str, relation: &str, label: &str) -> Self {
        self.rule_with_prefetch(type_tag, relation, label, RelationSpec::new())
    }

    pub fn rule_with_prefetch(
        mut self,
        type_tag: &str,
        relation: &str,
        label: &str,
        prefetch: RelationSpec,
    ) -> Self {
        self.rules
            .entry(type_tag.to_string())
            .or_default()
            .push(RelationRule {
                relation: relation.to_string(),
                label: label.to_string(),
                prefetch,
            });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules_for(&self, type_tag: &str) -> &[RelationRule] {
        self.rules.get(type_tag).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn type_tags(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    /// Everything to warm before expanding entities of `type_tag`.
    pub fn prefetch_spec(&self, type_tag: &str) -> RelationSpec {
        let mut spec = RelationSpec::new();
        for rule in self.rules_for(type_tag) {
            spec = spec.nested(rule.relation.clone(), rule.prefetch.clone());
        }
        spec
    }

    /// Samples with their items, the items' object types and sample types.
    pub fn inventory() -> Self {
        Self::new("inventory")
            .rule_with_prefetch(
                "Sample",
                "items",
                "hasItem",
                RelationSpec::new().relation("object_type").relation("sample"),
            )
            .rule("Sample", "sample_type", "hasSampleType")
            .rule("Item", "sample", "hasSample")
            .rule("Item", "object_type", "hasObjectType")
    }

    /// Samples with their field values, field types and sample types.
    pub fn samples() -> Self {
        Self::new("samples")
            .rule_with_prefetch(
                "Sample",
                "field_values",
                "hasFieldValue",
                RelationSpec::new().relation("field_type").relation("sample"),
            )
            .rule("Sample", "sample_type", "hasSampleType")
            .rule("FieldValue", "field_type", "hasFieldType")
            .rule("FieldValue", "sample", "hasSample")
            .rule("SampleType", "field_types", "hasFieldType")
    }

    pub fn by_name(name: &str) -> AqneoResult<Self> {
        match name {
            "inventory" => Ok(Self::inventory()),
            "samples" => Ok(Self::samples()),
            other => Err(AqneoError::UnknownQuery(other.to_string())),
        }
    }

    pub fn names() -> &'static [&'static str] {
        &["inventory", "samples"]
    }
}

#[async_trait]
impl Expand for RuleSet {
    async fn expand(&self, browser: &Browser, entity: &Entity) -> AqneoResult<Vec<(Entity, String)>> {
        let mut out = Vec::new();
        for rule in self.rules_for(entity.type_tag()) {
            for related in browser.related(entity, &rule.relation).await? {
                out.push((related, rule.label.clone()));
            }
        }
        Ok(out)
    }

    async fn prefetch(&self, browser: &Browser, frontier: &[Entity]) -> AqneoResult<()> {
        let mut by_type: BTreeMap<&str, Vec<Entity>> = BTreeMap::new();
        for entity in frontier {
            by_type
                .entry(entity.type_tag())
                .or_default()
                .push(entity.clone());
        }
        for (type_tag, entities) in by_type {
            browser.prefetch(&entities, &self.prefetch_spec(type_tag)).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::entity::NodeKey;
    use crate::graph::{Edge, GraphBuilder};
    use crate::source::MemorySource;

    fn inventory_source() -> (Arc<MemorySource>, Entity) {
        let sample = Entity::new("Sample", 1).with_attribute("name", "pGFP");
        let sample_type = Entity::new("SampleType", 5).with_attribute("name", "Plasmid");
        let item = Entity::new("Item", 10);
        let object_type = Entity::new("ObjectType", 20).with_attribute("name", "Plasmid Stock");

        let mut source = MemorySource::new();
        for e in [&sample, &sample_type, &item, &object_type] {
            source.insert(e.clone());
        }
        source.relate(&sample, "items", &item);
        source.relate(&sample, "sample_type", &sample_type);
        source.relate(&item, "sample", &sample);
        source.relate(&item, "object_type", &object_type);
        (Arc::new(source), sample)
    }

    #[test]
    fn test_prefetch_spec_merges_rules() {
        let spec = RuleSet::inventory().prefetch_spec("Sample");
        assert_eq!(
            serde_json::to_value(&spec).unwrap(),
            serde_json::json!({"items": {"object_type": {}, "sample": {}}, "sample_type": {}})
        );
        assert!(RuleSet::inventory().prefetch_spec("ObjectType").is_empty());
    }

    #[test]
    fn test_by_name() {
        assert_eq!(RuleSet::by_name("samples").unwrap().name(), "samples");
        assert!(RuleSet::by_name("nope").is_err());
    }

    #[tokio::test]
    async fn test_inventory_traversal_is_fully_prefetched() {
        let (source, sample) = inventory_source();
        let browser = Browser::new(source.clone());
        let rules = RuleSet::inventory();

        let graph = GraphBuilder::new(&browser, &rules)
            .build(vec![sample])
            .await
            .unwrap();

        assert_eq!(graph.node_count(), 4);
        assert!(graph.edges().contains(&Edge::new(
            NodeKey::new("Item", 10),
            NodeKey::new("ObjectType", 20),
            "hasObjectType"
        )));
        assert_eq!(source.requests(), 0);
    }
}
