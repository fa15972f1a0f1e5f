//! Neo4j connection client.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use neo4rs::{BoltNull, BoltType, ConfigBuilder, Graph, Query};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use aqneo_core::Payload;

use crate::error::SinkError;
use crate::writer::{AccessMode, Record, SinkConnection, SinkConnector};

/// Configuration for connecting to Neo4j.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_connections: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "neo4j".to_string(),
            database: "neo4j".to_string(),
            max_connections: 4,
        }
    }
}

/// Client for Neo4j operations.
#[derive(Clone)]
pub struct GraphClient {
    graph: Graph,
}

impl GraphClient {
    /// Create a new GraphClient from config.
    ///
    /// `Graph::connect` only builds a lazy pool, so a `RETURN 1` ping forces
    /// the bolt handshake. Callers wrap this in a timeout to fail fast when
    /// Neo4j is unreachable.
    pub async fn connect(config: &GraphConfig) -> Result<Self> {
        let neo4j_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .db(config.database.as_str())
            .max_connections(config.max_connections.max(1))
            .fetch_size(200)
            .build()
            .context("Failed to build Neo4j config")?;

        let graph = Graph::connect(neo4j_config)
            .await
            .context("Failed to create Neo4j connection pool")?;

        graph
            .run(Query::new("RETURN 1".to_string()))
            .await
            .context("Neo4j is not responding to queries")?;

        debug!(uri = %config.uri, database = %config.database, "Connected to Neo4j");
        Ok(Self { graph })
    }

    /// Execute a Cypher query that returns no results.
    pub async fn execute(&self, query: Query) -> Result<()> {
        self.graph
            .run(query)
            .await
            .context("Neo4j query execution failed")?;
        Ok(())
    }

    /// Execute a Cypher query and return results as rows.
    pub async fn query(&self, query: Query) -> Result<Vec<neo4rs::Row>> {
        let mut result = self.graph.execute(query).await.context("Neo4j query failed")?;

        let mut rows = Vec::new();
        while let Some(row) = result.next().await.context("Failed to read Neo4j row")? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Execute a Cypher query and return a single scalar value.
    pub async fn query_scalar<T: DeserializeOwned>(&self, query: Query, field: &str) -> Result<Option<T>> {
        let rows = self.query(query).await?;
        match rows.into_iter().next() {
            Some(row) => {
                let val: T = row
                    .get(field)
                    .map_err(|e| anyhow::anyhow!("Failed to get field '{}': {:?}", field, e))?;
                Ok(Some(val))
            }
            None => Ok(None),
        }
    }

    /// Get node and relationship counts for status display.
    pub async fn get_counts(&self) -> Result<GraphCounts> {
        let node_query = Query::new("MATCH (n) RETURN count(n) AS count".to_string());
        let rel_query = Query::new("MATCH ()-[r]->() RETURN count(r) AS count".to_string());

        let node_count: i64 = self.query_scalar(node_query, "count").await?.unwrap_or(0);
        let rel_count: i64 = self.query_scalar(rel_query, "count").await?.unwrap_or(0);

        Ok(GraphCounts {
            nodes: node_count as usize,
            relationships: rel_count as usize,
        })
    }

    /// Delete every relationship and node.
    pub async fn clear(&self) -> Result<GraphCounts> {
        let before = self.get_counts().await?;
        self.execute(Query::new("MATCH ()-[r]->() DELETE r".to_string()))
            .await
            .context("Failed to delete relationships")?;
        self.execute(Query::new("MATCH (n) DELETE n".to_string()))
            .await
            .context("Failed to delete nodes")?;
        info!(nodes = before.nodes, relationships = before.relationships, "Cleared graph");
        Ok(before)
    }

    /// Run one payload inside its own transaction. Read mode rolls the
    /// transaction back instead of committing it.
    pub async fn run_payload(&self, payload: &Payload, mode: AccessMode) -> Result<Vec<Record>, SinkError> {
        let query = to_query(payload);
        let mut txn = self
            .graph
            .start_txn()
            .await
            .map_err(|e| SinkError::Connection(e.to_string()))?;

        let rows = match collect_rows(&mut txn, query).await {
            Ok(rows) => rows,
            Err(e) => {
                let _ = txn.rollback().await;
                return Err(e);
            }
        };

        let finished = match mode {
            AccessMode::Write => txn.commit().await,
            AccessMode::Read => txn.rollback().await,
        };
        finished.map_err(|e| SinkError::classify(e.to_string()))?;
        Ok(rows)
    }
}

async fn collect_rows(txn: &mut neo4rs::Txn, query: Query) -> Result<Vec<Record>, SinkError> {
    let mut stream = txn
        .execute(query)
        .await
        .map_err(|e| SinkError::classify(e.to_string()))?;

    let mut rows = Vec::new();
    while let Some(row) = stream
        .next(txn.handle())
        .await
        .map_err(|e| SinkError::classify(e.to_string()))?
    {
        let record: Record = row
            .to()
            .map_err(|e| SinkError::Query(format!("unreadable row: {e}")))?;
        rows.push(record);
    }
    Ok(rows)
}

/// Bind payload parameters onto a neo4rs query.
pub fn to_query(payload: &Payload) -> Query {
    payload
        .parameters()
        .iter()
        .fold(Query::new(payload.query().to_string()), |query, (key, value)| {
            query.param(key, to_bolt(value))
        })
}

/// Convert a JSON parameter into its Bolt counterpart.
pub fn to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => (*b).into(),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.into(),
            None => n.as_f64().unwrap_or_default().into(),
        },
        Value::String(s) => s.clone().into(),
        Value::Array(items) => items.iter().map(to_bolt).collect::<Vec<BoltType>>().into(),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), to_bolt(v)))
            .collect::<HashMap<String, BoltType>>()
            .into(),
    }
}

/// Node and relationship counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphCounts {
    pub nodes: usize,
    pub relationships: usize,
}

#[async_trait]
impl SinkConnection for GraphClient {
    async fn run(&mut self, payload: &Payload, mode: AccessMode) -> Result<Vec<Record>, SinkError> {
        self.run_payload(payload, mode).await
    }
}

/// Connects writer workers to Neo4j.
#[derive(Debug, Clone, Copy, Default)]
pub struct Neo4jConnector;

#[async_trait]
impl SinkConnector for Neo4jConnector {
    type Connection = GraphClient;

    async fn connect(&self, config: &GraphConfig) -> Result<GraphClient, SinkError> {
        GraphClient::connect(config)
            .await
            .map_err(|e| SinkError::Connection(format!("{e:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_defaults_fill_missing_fields() {
        let config: GraphConfig = serde_json::from_value(json!({"uri": "bolt://db:7687"})).unwrap();
        assert_eq!(config.uri, "bolt://db:7687");
        assert_eq!(config.user, "neo4j");
        assert_eq!(config.database, "neo4j");
        assert_eq!(config.max_connections, 4);
    }

    #[test]
    fn test_to_bolt_shapes() {
        assert!(matches!(to_bolt(&json!(null)), BoltType::Null(_)));
        assert!(matches!(to_bolt(&json!(3)), BoltType::Integer(_)));
        assert!(matches!(to_bolt(&json!(1.5)), BoltType::Float(_)));
        assert!(matches!(to_bolt(&json!("x")), BoltType::String(_)));
        assert!(matches!(to_bolt(&json!([1, 2])), BoltType::List(_)));
        assert!(matches!(to_bolt(&json!({"id": 1})), BoltType::Map(_)));
    }
}
