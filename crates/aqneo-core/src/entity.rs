//! Entities fetched from the record system and their graph identity.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Deduplication identity of a graph node: `(type tag, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    #[serde(rename = "type")]
    pub type_tag: String,
    pub id: i64,
}

impl NodeKey {
    pub fn new(type_tag: impl Into<String>, id: i64) -> Self {
        Self {
            type_tag: type_tag.into(),
            id,
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.type_tag, self.id)
    }
}

/// A record from the source system: a type tag, a numeric id and a flat
/// attribute map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "type")]
    type_tag: String,
    id: i64,
    #[serde(default)]
    attributes: Map<String, Value>,
}

impl Entity {
    pub fn new(type_tag: impl Into<String>, id: i64) -> Self {
        Self {
            type_tag: type_tag.into(),
            id,
            attributes: Map::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Default node key: `(type tag, id)`.
    pub fn key(&self) -> NodeKey {
        NodeKey::new(self.type_tag.clone(), self.id)
    }

    /// Flat property map written to the sink. Always carries `id`, which is
    /// the merge key for node payloads.
    pub fn dump(&self) -> Map<String, Value> {
        let mut data = self.attributes.clone();
        data.insert("id".to_string(), Value::from(self.id));
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_includes_id() {
        let entity = Entity::new("Sample", 7).with_attribute("name", "pGFP");
        let data = entity.dump();
        assert_eq!(data.get("id"), Some(&Value::from(7)));
        assert_eq!(data.get("name"), Some(&Value::from("pGFP")));
    }

    #[test]
    fn test_deserialize_entity() {
        let entity: Entity =
            serde_json::from_str(r#"{"type": "Item", "id": 3, "attributes": {"location": "M20"}}"#)
                .unwrap();
        assert_eq!(entity.key(), NodeKey::new("Item", 3));
        assert_eq!(entity.attribute("location"), Some(&Value::from("M20")));
        assert_eq!(entity.key().to_string(), "Item#3");
    }
}
