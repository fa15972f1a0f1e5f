//! Neo4j schema initialization and standalone statements.

use anyhow::{Context, Result};
use tracing::{info, warn};

use aqneo_core::{compiler, Payload};

use crate::error::SinkError;
use crate::writer::{Callbacks, ErrorPolicy, ParallelWriter, SinkConnector};

/// Outcome of applying constraint statements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstraintReport {
    pub applied: usize,
    pub existing: usize,
}

/// Create the `id` (and, for named types, `name`) uniqueness constraints for
/// every type tag.
///
/// Safe to run multiple times: statements use `IF NOT EXISTS`, and a sink
/// that still reports an equivalent rule is counted as existing.
pub async fn apply_constraints<'a, C: SinkConnector>(
    writer: &ParallelWriter<C>,
    type_tags: impl IntoIterator<Item = &'a str>,
) -> Result<ConstraintReport> {
    let payloads = compiler::constraints(type_tags).context("Failed to compile constraints")?;
    let total = payloads.len();
    info!(statements = total, "Applying uniqueness constraints");

    let mut existing = 0usize;
    writer
        .write(
            payloads,
            Callbacks::new().on_error(|_, error| match error {
                SinkError::ConstraintExists(_) => {
                    existing += 1;
                    ErrorPolicy::Continue
                }
                _ => ErrorPolicy::Abort,
            }),
        )
        .await
        .context("Failed to apply constraints")?;

    let report = ConstraintReport {
        applied: total - existing,
        existing,
    };
    info!(applied = report.applied, existing = report.existing, "Constraints applied");
    Ok(report)
}

/// Outcome of running independent statements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementReport {
    pub succeeded: usize,
    /// Submission index and error of every failed statement, in order.
    pub failed: Vec<(usize, SinkError)>,
}

/// Run statements that do not depend on each other, such as the blocks of a
/// relationship file. A failed statement is recorded and the rest still run.
/// `on_done` fires once per successful statement.
pub async fn run_statements<C: SinkConnector>(
    writer: &ParallelWriter<C>,
    payloads: Vec<Payload>,
    mut on_done: impl FnMut() + Send,
) -> Result<StatementReport> {
    let total = payloads.len();
    let mut failed = Vec::new();
    writer
        .write(
            payloads,
            Callbacks::new()
                .on_item(|_, _| on_done())
                .on_error(|index, error| {
                    warn!(index, error = %error, "Statement failed");
                    failed.push((index, error.clone()));
                    ErrorPolicy::Continue
                }),
        )
        .await
        .context("Failed to run statements")?;

    failed.sort_by_key(|(index, _)| *index);
    let report = StatementReport {
        succeeded: total - failed.len(),
        failed,
    };
    info!(succeeded = report.succeeded, failed = report.failed.len(), "Statements run");
    Ok(report)
}
