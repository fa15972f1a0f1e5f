//! # aqneo Graph
//!
//! Neo4j sink for aqneo.
//!
//! Provides the connection client, sealed worker credentials, the parallel
//! transactional writer, constraint setup and the sync pipeline that ties
//! traversal, compilation and writing together.

pub mod client;
pub mod credentials;
pub mod error;
pub mod schema;
pub mod sync;
pub mod writer;

pub use client::{GraphClient, GraphConfig, GraphCounts, Neo4jConnector};
pub use credentials::{CredentialBundle, EphemeralKey};
pub use error::{SinkError, WriteError};
pub use sync::{open_sessions, run_sync, NoProgress, Sessions, SyncOptions, SyncProgress, SyncReport};
pub use writer::{
    AccessMode, Callbacks, ErrorPolicy, ItemResult, ParallelWriter, Record, SinkConnection, SinkConnector,
    WriteOptions,
};
