//! Sink and writer errors.

use std::time::Duration;

use thiserror::Error;

/// A failure reported while talking to the sink.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Constraint already exists: {0}")]
    ConstraintExists(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Credential error: {0}")]
    Credentials(String),
}

impl SinkError {
    /// Classify a message reported by the sink for a failed statement.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.contains("ConstraintValidationFailed") {
            Self::ConstraintViolation(message)
        } else if message.contains("EquivalentSchemaRuleAlreadyExists")
            || message.contains("ConstraintAlreadyExists")
            || message.contains("IndexAlreadyExists")
        {
            Self::ConstraintExists(message)
        } else {
            Self::Query(message)
        }
    }

    /// Constraint conditions that a re-run may tolerate.
    pub fn is_constraint(&self) -> bool {
        matches!(self, Self::ConstraintViolation(_) | Self::ConstraintExists(_))
    }
}

/// A write or read call that did not run to completion.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Payload {index} failed: {source}")]
    Aborted {
        index: usize,
        #[source]
        source: SinkError,
    },

    #[error("Worker {worker} could not connect: {source}")]
    Connect {
        worker: usize,
        #[source]
        source: SinkError,
    },

    #[error("Worker failed: {0}")]
    Worker(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let err = SinkError::classify(
            "Neo.ClientError.Schema.ConstraintValidationFailed: Node(3) already exists with label `Sample`",
        );
        assert!(matches!(err, SinkError::ConstraintViolation(_)));

        let err = SinkError::classify("Neo.ClientError.Schema.EquivalentSchemaRuleAlreadyExists");
        assert!(matches!(err, SinkError::ConstraintExists(_)));
        assert!(err.is_constraint());

        let err = SinkError::classify("Neo.ClientError.Statement.SyntaxError: Invalid input");
        assert!(matches!(err, SinkError::Query(_)));
        assert!(!err.is_constraint());
    }
}
