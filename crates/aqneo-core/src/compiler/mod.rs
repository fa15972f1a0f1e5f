//! Compile relationship graphs and entity lists into sink payloads.

pub mod relations;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::entity::{Entity, NodeKey};
use crate::error::{AqneoError, AqneoResult};
use crate::graph::{Edge, RelationshipGraph};
use crate::payload::Payload;
use crate::registry::{QueryRegistry, MERGE_MODELS};
use crate::template::{render, TemplateArgs};

pub use relations::{load_relation_file, parse_statement_blocks, AutoRelationship};

/// Entity types that also carry a unique `name`.
pub const NAMED_TYPES: &[&str] = &["Sample", "SampleType", "ObjectType"];

const CREATE_NODE: &str = "
    CREATE (n:{type})
    SET n.{key} = ${key}
    RETURN n.id
";

const UPDATE_NODE: &str = "
    MATCH (n:{type} { id: {id} })
    SET n.{key} = ${key}
    RETURN n.id
";

const CREATE_EDGE: &str = "
    MATCH (a:{type1}),(b:{type2})
    WHERE a.id = {id1} AND b.id = {id2}
    CREATE (a)-[r:{label}]->(b)
    RETURN a.id, type(r), b.id
";

const UNIQUE_CONSTRAINT: &str =
    "CREATE CONSTRAINT {name} IF NOT EXISTS FOR (n:{type}) REQUIRE n.{field} IS UNIQUE";

/// `SampleType` -> `sample_type`.
pub(crate) fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Usable both as a bare property name and as a `$parameter`.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn attribute_payload(template: &str, entity: &Entity) -> AqneoResult<Payload> {
    let data = entity.dump();
    if let Some(bad) = data.keys().find(|k| !is_identifier(k)) {
        return Err(AqneoError::validation(format!(
            "attribute '{bad}' of {} is not a valid property name",
            entity.key()
        )));
    }
    let keys: Vec<String> = data.keys().cloned().collect();
    let args = TemplateArgs::new()
        .with("type", entity.type_tag())
        .with("id", entity.id())
        .with("key", keys);
    Payload::new(render(template, &args)?, data)
}

/// Create one node with every attribute set from parameters.
pub fn node_payload(entity: &Entity) -> AqneoResult<Payload> {
    attribute_payload(CREATE_NODE, entity)
}

/// Overwrite the attributes of the node with the entity's id.
pub fn update_node(entity: &Entity) -> AqneoResult<Payload> {
    attribute_payload(UPDATE_NODE, entity)
}

/// Create one relationship between the nodes written for `source` and
/// `target`. Types, ids and the label are inlined.
pub fn edge_payload(source: &Entity, target: &Entity, label: &str) -> AqneoResult<Payload> {
    let args = TemplateArgs::new()
        .with("type1", source.type_tag())
        .with("type2", target.type_tag())
        .with("id1", source.id())
        .with("id2", target.id())
        .with("label", label);
    Payload::statement(render(CREATE_EDGE, &args)?)
}

/// The entity behind an edge endpoint. Graph keys may differ from the
/// entity's own type and id when the expander supplies its own `key_of`.
fn endpoint<'g>(graph: &'g RelationshipGraph, edge: &Edge, key: &NodeKey) -> AqneoResult<&'g Entity> {
    graph.node(key).map(|node| &node.entity).ok_or_else(|| {
        AqneoError::validation(format!(
            "edge {} -[{}]-> {} references {key}, which is not a node of the graph",
            edge.source, edge.label, edge.target
        ))
    })
}

/// Uniqueness constraints: `id` for every type, plus `name` for
/// [`NAMED_TYPES`].
pub fn constraints<'a>(type_tags: impl IntoIterator<Item = &'a str>) -> AqneoResult<Vec<Payload>> {
    let mut payloads = Vec::new();
    for type_tag in type_tags {
        let mut fields = vec!["id"];
        if NAMED_TYPES.contains(&type_tag) {
            fields.push("name");
        }
        for field in fields {
            let args = TemplateArgs::new()
                .with("name", format!("{}_{field}", snake_case(type_tag)))
                .with("type", type_tag)
                .with("field", field);
            payloads.push(Payload::statement(render(UNIQUE_CONSTRAINT, &args)?)?);
        }
    }
    Ok(payloads)
}

/// Turns graphs into payload lists, using the registry for declared queries.
#[derive(Debug, Clone)]
pub struct QueryCompiler {
    registry: Arc<QueryRegistry>,
}

impl QueryCompiler {
    pub fn new(registry: Arc<QueryRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &QueryRegistry {
        &self.registry
    }

    /// One `CREATE` payload per node, in discovery order.
    pub fn compile_nodes(&self, graph: &RelationshipGraph) -> AqneoResult<Vec<Payload>> {
        let payloads = graph
            .entities()
            .map(node_payload)
            .collect::<AqneoResult<Vec<_>>>()?;
        debug!(payloads = payloads.len(), "Compiled node payloads");
        Ok(payloads)
    }

    /// One `CREATE` payload per edge, in recording order. Endpoints are
    /// matched on the type and id their node payloads were written with.
    pub fn compile_edges(&self, graph: &RelationshipGraph) -> AqneoResult<Vec<Payload>> {
        let payloads = graph
            .edges()
            .iter()
            .map(|edge| {
                let source = endpoint(graph, edge, &edge.source)?;
                let target = endpoint(graph, edge, &edge.target)?;
                edge_payload(source, target, &edge.label)
            })
            .collect::<AqneoResult<Vec<_>>>()?;
        debug!(payloads = payloads.len(), "Compiled edge payloads");
        Ok(payloads)
    }

    /// Node payloads followed by edge payloads.
    pub fn compile(&self, graph: &RelationshipGraph) -> AqneoResult<Vec<Payload>> {
        let mut payloads = self.compile_nodes(graph)?;
        payloads.extend(self.compile_edges(graph)?);
        Ok(payloads)
    }

    /// One idempotent `MergeModels` payload per entity type, types in
    /// lexical order.
    pub fn merge_entities<'a>(
        &self,
        entities: impl IntoIterator<Item = &'a Entity>,
    ) -> AqneoResult<Vec<Payload>> {
        let mut groups: BTreeMap<&str, Vec<Value>> = BTreeMap::new();
        for entity in entities {
            groups
                .entry(entity.type_tag())
                .or_default()
                .push(Value::Object(entity.dump()));
        }

        let merge = self.registry.get(MERGE_MODELS)?;
        let mut payloads = Vec::with_capacity(groups.len());
        for (type_tag, datalist) in groups {
            let mut values = Map::new();
            values.insert("datalist".to_string(), Value::Array(datalist));
            payloads.push(merge.payload(values, &TemplateArgs::new().with("model_type", type_tag))?);
        }
        debug!(payloads = payloads.len(), "Compiled merge payloads");
        Ok(payloads)
    }

    pub fn compile_merge(&self, graph: &RelationshipGraph) -> AqneoResult<Vec<Payload>> {
        self.merge_entities(graph.entities())
    }
}
