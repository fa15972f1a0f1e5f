//! Constraint and relationship statements.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use aqneo_core::compiler::{load_relation_file, AutoRelationship};
use aqneo_core::{MemorySource, RuleSet};
use aqneo_graph::schema::{apply_constraints, run_statements};
use aqneo_graph::Callbacks;

use crate::config::AppConfig;
use crate::output;

#[derive(Args)]
pub struct ConstraintsArgs {
    /// Entity types to constrain
    pub types: Vec<String>,

    /// Take the entity types from a JSON record snapshot
    #[arg(long, short)]
    pub records: Option<PathBuf>,
}

/// Types named on the command line, else those in the snapshot, else every
/// type the built-in rule sets traverse.
fn constraint_types(args: &ConstraintsArgs) -> Result<BTreeSet<String>> {
    if !args.types.is_empty() {
        return Ok(args.types.iter().cloned().collect());
    }
    if let Some(path) = &args.records {
        let source = MemorySource::load(path).context("Failed to load record snapshot")?;
        return Ok(source.type_tags().into_iter().collect());
    }

    let mut types = BTreeSet::new();
    for name in RuleSet::names() {
        types.extend(RuleSet::by_name(name)?.type_tags().map(str::to_string));
    }
    types.extend(
        AutoRelationship::builtins()
            .into_iter()
            .flat_map(|relation| [relation.from, relation.to]),
    );
    Ok(types)
}

pub async fn constraints(args: ConstraintsArgs, config: &AppConfig) -> Result<()> {
    let types = constraint_types(&args)?;
    let writer = super::writer(config)?;

    let report = apply_constraints(&writer, types.iter().map(String::as_str)).await?;

    println!("{}", "Constraints".bold());
    println!("{}", "─".repeat(40));
    for type_tag in &types {
        println!("  {}", type_tag.cyan());
    }
    println!();
    println!(
        "  {} applied, {} already present",
        report.applied.to_string().green(),
        report.existing
    );
    Ok(())
}

pub async fn relations(file: &Path, config: &AppConfig) -> Result<()> {
    let payloads = load_relation_file(file)
        .with_context(|| format!("Failed to load relationship queries from {}", file.display()))?;
    if payloads.is_empty() {
        println!("{}", "No statements found.".dimmed());
        return Ok(());
    }

    let writer = super::writer(config)?;
    let bar = output::progress_bar(payloads.len(), "relations");
    let report = run_statements(&writer, payloads, || bar.inc(1)).await?;
    bar.finish_and_clear();

    println!(
        "{} {} statement(s) from {}",
        "Ran".green().bold(),
        report.succeeded,
        file.display()
    );
    for (index, error) in &report.failed {
        println!("  {} statement {}: {}", "✗".red(), index + 1, error);
    }
    if !report.failed.is_empty() {
        bail!("{} statement(s) failed", report.failed.len());
    }
    Ok(())
}

pub async fn auto_relations(config: &AppConfig) -> Result<()> {
    let relations = AutoRelationship::builtins();
    let payloads = relations
        .iter()
        .map(AutoRelationship::payload)
        .collect::<Result<Vec<_>, _>>()?;

    let writer = super::writer(config)?;
    let results = writer.write(payloads, Callbacks::new()).await?;

    println!("{}", "Auto relationships".bold());
    println!("{}", "─".repeat(40));
    for (relation, result) in relations.iter().zip(&results) {
        let created = result
            .as_ref()
            .ok()
            .and_then(|rows| rows.first())
            .and_then(|row| row.get("count(r)"))
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);
        println!("  {:<50} {}", relation.to_string(), created.to_string().green());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_explicit_types_win() {
        let args = ConstraintsArgs {
            types: vec!["Sample".to_string(), "Sample".to_string(), "Item".to_string()],
            records: None,
        };
        let types: Vec<String> = constraint_types(&args).unwrap().into_iter().collect();
        assert_eq!(types, vec!["Item", "Sample"]);
    }

    #[test]
    fn test_types_from_records() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"entities": [{{"type": "Plate", "id": 1, "attributes": {{}}}}], "relations": []}}"#
        )
        .unwrap();
        let args = ConstraintsArgs {
            types: Vec::new(),
            records: Some(file.path().to_path_buf()),
        };
        let types: Vec<String> = constraint_types(&args).unwrap().into_iter().collect();
        assert_eq!(types, vec!["Plate"]);
    }

    #[test]
    fn test_default_types_cover_builtin_records() {
        let args = ConstraintsArgs {
            types: Vec::new(),
            records: None,
        };
        let types = constraint_types(&args).unwrap();
        for expected in ["Sample", "SampleType", "Item", "ObjectType", "FieldValue", "FieldType"] {
            assert!(types.contains(expected), "missing {expected}");
        }
    }
}
