//! Breadth-first relationship graph builder.
//!
//! Each level runs three phases over the whole frontier:
//!
//! 1. **prefetch**: the expander warms the browser cache for the frontier.
//! 2. **expand**: every frontier entity is expanded into `(related, label)`
//!    pairs. In strict-cache mode remote requests are disabled for this
//!    phase, so an incomplete prefetch surfaces as
//!    [`AqneoError::ForbiddenFetch`].
//! 3. **merge**: unseen related entities become nodes and form the next
//!    frontier; every pair becomes an edge.
//!
//! Traversal stops when a level discovers nothing new.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Browser, Edge, RelationshipGraph};
use crate::entity::{Entity, NodeKey};
use crate::error::{AqneoError, AqneoResult};

/// How entities of each type expand into related entities.
#[async_trait]
pub trait Expand: Send + Sync {
    /// Related entities of `entity`, each with the label of the edge that
    /// connects them.
    async fn expand(&self, browser: &Browser, entity: &Entity) -> AqneoResult<Vec<(Entity, String)>>;

    /// Warm the browser cache for a whole frontier before it is expanded.
    async fn prefetch(&self, _browser: &Browser, _frontier: &[Entity]) -> AqneoResult<()> {
        Ok(())
    }

    fn key_of(&self, entity: &Entity) -> NodeKey {
        entity.key()
    }
}

async fn expand_frontier(
    browser: &Browser,
    expander: &dyn Expand,
    frontier: &[Entity],
) -> AqneoResult<Vec<(NodeKey, Entity, String)>> {
    let mut expanded = Vec::new();
    for entity in frontier {
        let source_key = expander.key_of(entity);
        for (related, label) in expander.expand(browser, entity).await? {
            expanded.push((source_key.clone(), related, label));
        }
    }
    Ok(expanded)
}

type NodeCallback<'a> = Box<dyn FnMut(&NodeKey, &Entity) + Send + 'a>;
type EdgeCallback<'a> = Box<dyn FnMut(&Edge) + Send + 'a>;

/// Builds a [`RelationshipGraph`] from seed entities.
pub struct GraphBuilder<'a> {
    browser: &'a Browser,
    expander: &'a dyn Expand,
    reverse: bool,
    strict_cache: bool,
    on_new_node: Option<NodeCallback<'a>>,
    on_new_edge: Option<EdgeCallback<'a>>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(browser: &'a Browser, expander: &'a dyn Expand) -> Self {
        Self {
            browser,
            expander,
            reverse: false,
            strict_cache: true,
            on_new_node: None,
            on_new_edge: None,
        }
    }

    /// Point edges from the discovered entity back to its discoverer.
    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    /// Fail on any lookup the prefetch phase did not cover.
    pub fn strict_cache(mut self, strict_cache: bool) -> Self {
        self.strict_cache = strict_cache;
        self
    }

    pub fn on_new_node(mut self, callback: impl FnMut(&NodeKey, &Entity) + Send + 'a) -> Self {
        self.on_new_node = Some(Box::new(callback));
        self
    }

    pub fn on_new_edge(mut self, callback: impl FnMut(&Edge) + Send + 'a) -> Self {
        self.on_new_edge = Some(Box::new(callback));
        self
    }

    fn add_node(&mut self, graph: &mut RelationshipGraph, key: NodeKey, entity: Entity) {
        if let Some(callback) = self.on_new_node.as_mut() {
            callback(&key, &entity);
        }
        graph.add_node(key, entity);
    }

    fn add_edge(&mut self, graph: &mut RelationshipGraph, edge: Edge) {
        if let Some(callback) = self.on_new_edge.as_mut() {
            callback(&edge);
        }
        graph.add_edge(edge);
    }

    /// Run the traversal to completion.
    pub async fn build(mut self, seeds: Vec<Entity>) -> AqneoResult<RelationshipGraph> {
        let mut graph = RelationshipGraph::new();
        let mut visited: HashSet<NodeKey> = HashSet::new();

        let mut frontier = Vec::with_capacity(seeds.len());
        for seed in seeds {
            let key = self.expander.key_of(&seed);
            if visited.insert(key.clone()) {
                self.add_node(&mut graph, key, seed.clone());
                frontier.push(seed);
            }
        }
        self.browser.update_cache(&frontier);

        let mut level = 0usize;
        while !frontier.is_empty() {
            level += 1;

            self.expander.prefetch(self.browser, &frontier).await?;

            let previous = self.browser.set_requests_allowed(!self.strict_cache);
            let expanded = expand_frontier(self.browser, self.expander, &frontier).await;
            self.browser.set_requests_allowed(previous);
            let expanded = expanded.map_err(|e| match e {
                AqneoError::ForbiddenFetch { relation, key } => {
                    debug!(level, relation = %relation, key = %key, "Strict cache violation");
                    AqneoError::ForbiddenFetch { relation, key }
                }
                other => other,
            })?;

            let mut next = Vec::new();
            let edges = expanded.len();
            for (source_key, related, label) in expanded {
                let key = self.expander.key_of(&related);
                if visited.insert(key.clone()) {
                    self.add_node(&mut graph, key.clone(), related.clone());
                    next.push(related);
                }
                let edge = if self.reverse {
                    Edge::new(key, source_key, label)
                } else {
                    Edge::new(source_key, key, label)
                };
                self.add_edge(&mut graph, edge);
            }

            info!(
                level,
                frontier = frontier.len(),
                discovered = next.len(),
                edges,
                "Expanded traversal level"
            );
            frontier = next;
        }

        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            levels = level,
            "Relationship graph complete"
        );
        Ok(graph)
    }
}
