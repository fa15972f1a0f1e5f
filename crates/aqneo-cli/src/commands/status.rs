//! Graph status and cleanup.

use anyhow::{bail, Result};
use colored::Colorize;

use crate::config::AppConfig;

pub async fn status(config: &AppConfig) -> Result<()> {
    let client = super::connect(config).await?;
    let counts = client.get_counts().await?;

    println!("{}", "Neo4j Graph Status".bold());
    println!("{}", "─".repeat(40));
    println!("  URI:           {}", config.neo4j.uri.cyan());
    println!("  Database:      {}", config.neo4j.database);
    println!("  Nodes:         {}", counts.nodes.to_string().green());
    println!("  Relationships: {}", counts.relationships.to_string().green());
    Ok(())
}

pub async fn clear(config: &AppConfig, force: bool) -> Result<()> {
    if !force {
        bail!(
            "This deletes every node and relationship in {}. Re-run with --force to confirm.",
            config.neo4j.uri
        );
    }

    let client = super::connect(config).await?;
    let removed = client.clear().await?;

    println!(
        "{} {} nodes and {} relationships",
        "Deleted".red().bold(),
        removed.nodes,
        removed.relationships
    );
    Ok(())
}
