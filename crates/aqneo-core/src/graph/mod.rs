//! Relationship graph discovered from a seed set of entities.
//!
//! Nodes are deduplicated on [`NodeKey`]; edges are kept as recorded, so two
//! sources expanding into the same target each contribute an edge.

pub mod browser;
pub mod builder;
pub mod rules;

use std::collections::HashMap;

use serde::Serialize;

use crate::entity::{Entity, NodeKey};

pub use browser::Browser;
pub use builder::{Expand, GraphBuilder};
pub use rules::{RelationRule, RuleSet};

/// A directed, labelled relationship between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Edge {
    pub source: NodeKey,
    pub target: NodeKey,
    pub label: String,
}

impl Edge {
    pub fn new(source: NodeKey, target: NodeKey, label: impl Into<String>) -> Self {
        Self {
            source,
            target,
            label: label.into(),
        }
    }
}

/// A node together with the entity that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub key: NodeKey,
    pub entity: Entity,
}

/// Nodes in discovery order plus every recorded edge.
#[derive(Debug, Clone, Default)]
pub struct RelationshipGraph {
    nodes: Vec<GraphNode>,
    index: HashMap<NodeKey, usize>,
    edges: Vec<Edge>,
}

impl RelationshipGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node. Returns `false` (and keeps the existing entity) when
    /// the key is already present.
    pub fn add_node(&mut self, key: NodeKey, entity: Entity) -> bool {
        if self.index.contains_key(&key) {
            return false;
        }
        self.index.insert(key.clone(), self.nodes.len());
        self.nodes.push(GraphNode { key, entity });
        true
    }

    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    pub fn node(&self, key: &NodeKey) -> Option<&GraphNode> {
        self.index.get(key).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.nodes.iter().map(|n| &n.entity)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nodes_deduplicated_edges_kept() {
        let mut graph = RelationshipGraph::new();
        let a = Entity::new("Sample", 1);
        let b = Entity::new("Item", 2);

        assert!(graph.add_node(a.key(), a.clone()));
        assert!(graph.add_node(b.key(), b.clone()));
        assert!(!graph.add_node(a.key(), a.clone()));

        graph.add_edge(Edge::new(a.key(), b.key(), "hasItem"));
        graph.add_edge(Edge::new(a.key(), b.key(), "hasItem"));

        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.node(&b.key()).map(|n| &n.entity), Some(&b));
    }
}
