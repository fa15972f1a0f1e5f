//! aqneo Core Library
//!
//! Relationship graph discovery over a record source, the Cypher template
//! engine, structured query declarations and payload compilation. Nothing
//! in this crate talks to the network directly.

pub mod compiler;
pub mod entity;
pub mod error;
pub mod graph;
pub mod payload;
pub mod registry;
pub mod source;
pub mod template;

pub use compiler::QueryCompiler;
pub use entity::{Entity, NodeKey};
pub use error::{AqneoError, AqneoResult};
pub use graph::{Browser, Edge, Expand, GraphBuilder, RelationshipGraph, RuleSet};
pub use payload::Payload;
pub use registry::{QueryDeclaration, QueryRegistry};
pub use source::{MemorySource, RecordSource, RelationSpec};
pub use template::{render, FormatValue, TemplateArgs};
