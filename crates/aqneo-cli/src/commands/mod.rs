//! CLI command definitions and handlers.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use aqneo_graph::{GraphClient, Neo4jConnector, ParallelWriter};

use crate::config::{AppConfig, ConnectionOverrides};

pub mod render;
pub mod schema;
pub mod status;
pub mod sync;

/// aqneo - mirror a record graph into Neo4j
#[derive(Parser)]
#[command(name = "aqneo")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to aqneo.toml (defaults to ./aqneo.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Neo4j bolt URI
    #[arg(long, global = true, env = "NEO4J_URI")]
    pub uri: Option<String>,

    /// Neo4j user
    #[arg(long, global = true, env = "NEO4J_USER")]
    pub user: Option<String>,

    /// Neo4j password
    #[arg(long, global = true, env = "NEO4J_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Neo4j database
    #[arg(long, global = true)]
    pub database: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Traverse the record graph from seed entities and write it to Neo4j
    Sync(sync::SyncArgs),

    /// Create uniqueness constraints for entity types
    Constraints(schema::ConstraintsArgs),

    /// Run the statements of a relationship query file
    Relations {
        /// File of Cypher statements separated by blank lines
        file: PathBuf,
    },

    /// Create the built-in foreign-key relationships
    AutoRelations,

    /// Render a query template without contacting Neo4j
    Render(render::RenderArgs),

    /// Show node and relationship counts
    Status,

    /// Delete every node and relationship
    Clear {
        /// Confirm destructive operation
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let mut config = AppConfig::load(self.config.as_deref())?;
        config.apply(ConnectionOverrides {
            uri: self.uri,
            user: self.user,
            password: self.password,
            database: self.database,
        });

        match self.command {
            Commands::Sync(args) => sync::execute(args, config).await,
            Commands::Constraints(args) => schema::constraints(args, &config).await,
            Commands::Relations { file } => schema::relations(&file, &config).await,
            Commands::AutoRelations => schema::auto_relations(&config).await,
            Commands::Render(args) => render::execute(args),
            Commands::Status => status::status(&config).await,
            Commands::Clear { force } => status::clear(&config, force).await,
        }
    }
}

/// Writer whose workers connect to the configured Neo4j instance.
pub(crate) fn writer(config: &AppConfig) -> Result<ParallelWriter<Neo4jConnector>> {
    Ok(ParallelWriter::new(Neo4jConnector, &config.neo4j, config.write_options())?)
}

/// Single client for status-style commands.
pub(crate) async fn connect(config: &AppConfig) -> Result<GraphClient> {
    tokio::time::timeout(config.connect_timeout(), GraphClient::connect(&config.neo4j))
        .await
        .map_err(|_| anyhow::anyhow!("Neo4j did not answer within {}s", config.writer.connect_timeout_secs))?
}
