//! `aqneo sync`: traverse the record graph and write it to Neo4j.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use aqneo_core::{Browser, Entity, MemorySource, NodeKey, QueryCompiler, QueryRegistry, RuleSet};
use aqneo_graph::schema::apply_constraints;
use aqneo_graph::{open_sessions, run_sync, SyncOptions};

use crate::config::AppConfig;
use crate::output::{self, SyncBar};

#[derive(Args)]
pub struct SyncArgs {
    /// JSON record snapshot to read entities and relations from
    #[arg(long, short)]
    pub records: PathBuf,

    /// Seed entities as `Type:id`
    pub seeds: Vec<String>,

    /// Seed with every entity of this type instead
    #[arg(long, conflicts_with = "seeds")]
    pub all: Option<String>,

    /// Traversal rules (inventory, samples)
    #[arg(long, short, default_value = "inventory")]
    pub query: String,

    /// Upsert nodes per type instead of creating one node per statement
    #[arg(long)]
    pub merge: bool,

    /// Number of writer workers
    #[arg(long, short)]
    pub jobs: Option<usize>,

    /// Payloads per worker chunk
    #[arg(long)]
    pub chunksize: Option<usize>,

    /// Keep writing past constraint violations
    #[arg(long)]
    pub lenient: bool,

    /// Point edges back at the entity that discovered them
    #[arg(long)]
    pub reverse: bool,

    /// Allow record lookups the prefetch phase did not cover
    #[arg(long)]
    pub no_strict_cache: bool,

    /// Do not create uniqueness constraints first
    #[arg(long)]
    pub skip_constraints: bool,
}

pub async fn execute(args: SyncArgs, mut config: AppConfig) -> Result<()> {
    if let Some(jobs) = args.jobs {
        config.writer.workers = jobs;
    }
    if let Some(chunksize) = args.chunksize {
        config.writer.chunksize = chunksize;
    }
    let rules = RuleSet::by_name(&args.query)
        .with_context(|| format!("Available queries: {}", RuleSet::names().join(", ")))?;

    let records = args.records.clone();
    let sessions = open_sessions(
        &config.neo4j,
        move || async move { MemorySource::load(&records).context("Failed to load record snapshot") },
        config.connect_timeout(),
    )
    .await;
    let (source, _client) = sessions.into_ready()?;

    let seeds = resolve_seeds(&source, &args.seeds, args.all.as_deref())?;
    let source = Arc::new(source);
    let writer = super::writer(&config)?;

    println!("{}", format!("Syncing {} seed(s) with '{}' rules", seeds.len(), rules.name()).bold());

    if !args.skip_constraints {
        let types = source.type_tags();
        let report = apply_constraints(&writer, types.iter().map(String::as_str)).await?;
        println!(
            "  Constraints: {} applied, {} already present",
            report.applied, report.existing
        );
    }

    let options = SyncOptions {
        reverse: args.reverse,
        strict_cache: config.traversal.strict_cache && !args.no_strict_cache,
        merge: args.merge,
        strict: config.writer.strict && !args.lenient,
    };
    let browser = Browser::new(source.clone());
    let compiler = QueryCompiler::new(Arc::new(QueryRegistry::with_builtins()?));
    let mut progress = SyncBar::new();

    let result = run_sync(&browser, &rules, &compiler, &writer, seeds, &options, &mut progress).await;
    progress.finish();
    let report = result?;

    output::print_sync_report(&report);
    if report.failed > 0 {
        println!(
            "{}",
            format!("{} payload(s) failed; see the log for details.", report.failed).yellow()
        );
    }
    Ok(())
}

/// Parse a `Type:id` seed.
fn parse_seed(seed: &str) -> Result<NodeKey> {
    let Some((type_tag, id)) = seed.split_once(':') else {
        bail!("Invalid seed '{seed}': expected Type:id");
    };
    let type_tag = type_tag.trim();
    if type_tag.is_empty() {
        bail!("Invalid seed '{seed}': missing type");
    }
    let id = id
        .trim()
        .parse::<i64>()
        .with_context(|| format!("Invalid seed '{seed}': id is not an integer"))?;
    Ok(NodeKey::new(type_tag, id))
}

fn resolve_seeds(source: &MemorySource, seeds: &[String], all: Option<&str>) -> Result<Vec<Entity>> {
    if let Some(type_tag) = all {
        let entities = source.entities_of(type_tag);
        if entities.is_empty() {
            bail!("No {type_tag} entities in the record snapshot");
        }
        return Ok(entities);
    }
    if seeds.is_empty() {
        bail!("No seeds given. Pass Type:id seeds or --all <Type>");
    }

    seeds
        .iter()
        .map(|seed| {
            let key = parse_seed(seed)?;
            source
                .get(&key)
                .cloned()
                .with_context(|| format!("Seed {key} not found in the record snapshot"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> MemorySource {
        let mut source = MemorySource::new();
        source.insert(Entity::new("Sample", 1));
        source.insert(Entity::new("Sample", 2));
        source.insert(Entity::new("Item", 10));
        source
    }

    #[test]
    fn test_parse_seed() {
        assert_eq!(parse_seed("Sample:42").unwrap(), NodeKey::new("Sample", 42));
        assert_eq!(parse_seed(" Item : 7 ").unwrap(), NodeKey::new("Item", 7));
        assert!(parse_seed("Sample").is_err());
        assert!(parse_seed(":1").is_err());
        assert!(parse_seed("Sample:abc").is_err());
    }

    #[test]
    fn test_resolve_explicit_seeds() {
        let seeds = resolve_seeds(&source(), &["Item:10".to_string(), "Sample:2".to_string()], None).unwrap();
        let keys: Vec<NodeKey> = seeds.iter().map(Entity::key).collect();
        assert_eq!(keys, vec![NodeKey::new("Item", 10), NodeKey::new("Sample", 2)]);
    }

    #[test]
    fn test_resolve_all_of_type() {
        let seeds = resolve_seeds(&source(), &[], Some("Sample")).unwrap();
        assert_eq!(seeds.len(), 2);
        assert!(resolve_seeds(&source(), &[], Some("FieldType")).is_err());
    }

    #[test]
    fn test_unknown_or_missing_seeds_fail() {
        let err = resolve_seeds(&source(), &["Sample:99".to_string()], None).unwrap_err();
        assert!(err.to_string().contains("Sample#99"));
        assert!(resolve_seeds(&source(), &[], None).is_err());
    }
}
