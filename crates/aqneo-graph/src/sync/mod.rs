//! Record source to Neo4j synchronization pipeline.
//!
//! Traverses the record source from a set of seeds, compiles the discovered
//! graph into node and edge payloads and writes both lists with the parallel
//! writer. Nodes are always written before edges, since edge statements match
//! on the node ids.

pub mod session;

use anyhow::{Context, Result};
use tracing::info;

use aqneo_core::{Browser, Entity, Expand, GraphBuilder, NodeKey, Payload, QueryCompiler};

use crate::error::WriteError;
use crate::writer::{tolerate_constraints, Callbacks, ItemResult, ParallelWriter, SinkConnector};

pub use session::{open_sessions, Sessions};

/// Result of a sync operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub nodes: usize,
    pub edges: usize,
    pub written: usize,
    pub failed: usize,
}

impl SyncReport {
    fn merge(&mut self, other: &SyncReport) {
        self.nodes += other.nodes;
        self.edges += other.edges;
        self.written += other.written;
        self.failed += other.failed;
    }

    fn tally(results: &[ItemResult]) -> Self {
        let failed = results.iter().filter(|r| r.is_err()).count();
        Self {
            written: results.len() - failed,
            failed,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Point edges from discovered entities back to their discoverer.
    pub reverse: bool,
    /// Fail the traversal on lookups the prefetch phase did not cover.
    pub strict_cache: bool,
    /// Upsert nodes with one `MergeModels` payload per type instead of one
    /// `CREATE` per node.
    pub merge: bool,
    /// Abort on the first sink error. When false, constraint errors are
    /// counted as failures and the write continues.
    pub strict: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            reverse: false,
            strict_cache: true,
            merge: false,
            strict: true,
        }
    }
}

/// Progress observer for a sync run.
pub trait SyncProgress: Send {
    fn node_discovered(&mut self, _key: &NodeKey) {}

    /// A write phase (`"nodes"` or `"edges"`) is starting with `total` payloads.
    fn phase(&mut self, _name: &str, _total: usize) {}

    fn item_written(&mut self) {}
}

/// Discards progress.
pub struct NoProgress;

impl SyncProgress for NoProgress {}

/// Run a full sync: traverse, compile, write nodes, then write edges.
pub async fn run_sync<C: SinkConnector>(
    browser: &Browser,
    expander: &dyn Expand,
    compiler: &QueryCompiler,
    writer: &ParallelWriter<C>,
    seeds: Vec<Entity>,
    options: &SyncOptions,
    progress: &mut dyn SyncProgress,
) -> Result<SyncReport> {
    info!(seeds = seeds.len(), merge = options.merge, "Starting graph sync");

    let graph = GraphBuilder::new(browser, expander)
        .reverse(options.reverse)
        .strict_cache(options.strict_cache)
        .on_new_node(|key, _| progress.node_discovered(key))
        .build(seeds)
        .await
        .context("Failed to build relationship graph")?;

    let mut total = SyncReport {
        nodes: graph.node_count(),
        edges: graph.edge_count(),
        ..SyncReport::default()
    };

    let node_payloads = if options.merge {
        compiler.compile_merge(&graph)
    } else {
        compiler.compile_nodes(&graph)
    }
    .context("Failed to compile node payloads")?;
    let edge_payloads = compiler
        .compile_edges(&graph)
        .context("Failed to compile edge payloads")?;

    for (phase, payloads) in [("nodes", node_payloads), ("edges", edge_payloads)] {
        progress.phase(phase, payloads.len());
        let results = write_phase(writer, payloads, options.strict, progress)
            .await
            .with_context(|| format!("Failed to write {phase}"))?;
        let report = SyncReport::tally(&results);
        info!(phase, written = report.written, failed = report.failed, "Sync phase written");
        total.merge(&report);
    }

    info!(
        nodes = total.nodes,
        edges = total.edges,
        written = total.written,
        failed = total.failed,
        "Graph sync complete"
    );
    Ok(total)
}

async fn write_phase<C: SinkConnector>(
    writer: &ParallelWriter<C>,
    payloads: Vec<Payload>,
    strict: bool,
    progress: &mut dyn SyncProgress,
) -> std::result::Result<Vec<ItemResult>, WriteError> {
    let mut callbacks = Callbacks::new().on_item(|_, _| progress.item_written());
    if !strict {
        callbacks = callbacks.on_error(tolerate_constraints);
    }
    writer.write(payloads, callbacks).await
}
