//! Centralized error types for aqneo.

use thiserror::Error;

use crate::entity::NodeKey;

/// Main error type for graph building and query compilation.
#[derive(Error, Debug)]
pub enum AqneoError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Missing format keys: {}", .0.join(", "))]
    MissingFormatKeys(Vec<String>),

    #[error(
        "More than one iterable key on line '{line}' ({}). Use a single iterable of tuples and index into it instead.",
        .keys.join(", ")
    )]
    AmbiguousVectorLine { line: String, keys: Vec<String> },

    #[error(
        "Forbidden fetch of relation '{relation}' on {key} while strict_cache is enabled. \
         This is most likely due to the prefetch function not being thorough."
    )]
    ForbiddenFetch { relation: String, key: NodeKey },

    #[error("Query '{0}' already defined")]
    ClassDefinitionConflict(String),

    #[error("Query '{name}' is incompletely declared: {reason}")]
    IncompleteDeclaration { name: String, reason: String },

    #[error("Query not found: {0}")]
    UnknownQuery(String),

    #[error("Record source error: {0}")]
    Source(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for aqneo operations.
pub type AqneoResult<T> = Result<T, AqneoError>;

impl AqneoError {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a record source error.
    pub fn source(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }

    /// Whether this error belongs to the validation class (malformed payloads
    /// and templates). These are raised while compiling and never reach a sink.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::MissingFormatKeys(_) | Self::AmbiguousVectorLine { .. }
        )
    }
}
