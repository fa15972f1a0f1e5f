//! In-memory sink used by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use aqneo_core::Payload;
use aqneo_graph::{AccessMode, GraphConfig, Record, SinkConnection, SinkConnector, SinkError};

#[derive(Debug, Default)]
pub struct MockState {
    pub nodes: BTreeMap<(String, i64), Map<String, Value>>,
    pub edges: Vec<(i64, String, i64)>,
    pub constraints: BTreeSet<String>,
    pub configs: Vec<GraphConfig>,
}

/// Interprets the handful of statement shapes aqneo emits.
#[derive(Clone, Default)]
pub struct MockSink {
    pub state: Arc<Mutex<MockState>>,
    pub statements: Arc<AtomicUsize>,
    pub refuse_connections: bool,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing() -> Self {
        Self {
            refuse_connections: true,
            ..Self::default()
        }
    }

    pub fn node_count(&self) -> usize {
        self.state.lock().unwrap().nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.state.lock().unwrap().edges.len()
    }
}

pub struct MockConnection {
    sink: MockSink,
}

fn label_after<'q>(query: &'q str, marker: &str) -> Option<&'q str> {
    let rest = &query[query.find(marker)? + marker.len()..];
    let end = rest.find(|c: char| !c.is_alphanumeric() && c != '_')?;
    Some(&rest[..end])
}

fn number_after(query: &str, marker: &str) -> Option<i64> {
    let rest = &query[query.find(marker)? + marker.len()..];
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

impl MockConnection {
    fn apply(&self, payload: &Payload) -> Result<Vec<Record>, SinkError> {
        let query = payload.query();
        let params = payload.parameters();
        let mut state = self.sink.state.lock().unwrap();

        if query.contains("FAIL") {
            return Err(SinkError::classify("Neo.ClientError.Statement.SyntaxError: FAIL"));
        }

        if let Some(rest) = query.strip_prefix("CREATE CONSTRAINT ") {
            let name = rest.split_whitespace().next().unwrap_or_default().to_string();
            if !state.constraints.insert(name) {
                return Err(SinkError::classify(
                    "Neo.ClientError.Schema.EquivalentSchemaRuleAlreadyExists",
                ));
            }
            return Ok(Vec::new());
        }

        if query.contains("UNWIND $datalist") {
            let label = label_after(query, "MERGE (n:").unwrap_or_default().to_string();
            let mut ids = Vec::new();
            for data in params["datalist"].as_array().cloned().unwrap_or_default() {
                let id = data["id"].as_i64().unwrap_or_default();
                let entry = state.nodes.entry((label.clone(), id)).or_default();
                if let Value::Object(map) = data {
                    entry.extend(map);
                }
                ids.push(id);
            }
            ids.sort_unstable();
            return Ok(ids.into_iter().map(|x| json!({ "x": x })).collect());
        }

        if query.starts_with("CREATE (n:") {
            let label = label_after(query, "CREATE (n:").unwrap_or_default().to_string();
            let id = params["id"].as_i64().unwrap_or_default();
            if state.nodes.contains_key(&(label.clone(), id)) {
                return Err(SinkError::classify(format!(
                    "Neo.ClientError.Schema.ConstraintValidationFailed: Node({id}) already exists with label `{label}`"
                )));
            }
            state.nodes.insert((label, id), params.clone());
            return Ok(vec![json!({ "n.id": id })]);
        }

        if query.starts_with("MATCH (a:") && query.contains("CREATE (a)-[r:") {
            let source = number_after(query, "a.id = ").unwrap_or_default();
            let target = number_after(query, "b.id = ").unwrap_or_default();
            let label = label_after(query, "[r:").unwrap_or_default().to_string();
            state.edges.push((source, label.clone(), target));
            return Ok(vec![json!({ "a.id": source, "type(r)": label, "b.id": target })]);
        }

        Ok(vec![json!({ "query": query })])
    }
}

#[async_trait]
impl SinkConnection for MockConnection {
    async fn run(&mut self, payload: &Payload, _mode: AccessMode) -> Result<Vec<Record>, SinkError> {
        if let Some(delay) = payload.parameters().get("delay_ms").and_then(Value::as_u64) {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.sink.statements.fetch_add(1, Ordering::SeqCst);
        self.apply(payload)
    }
}

#[async_trait]
impl SinkConnector for MockSink {
    type Connection = MockConnection;

    async fn connect(&self, config: &GraphConfig) -> Result<MockConnection, SinkError> {
        if self.refuse_connections {
            return Err(SinkError::Connection("connection refused".to_string()));
        }
        self.state.lock().unwrap().configs.push(config.clone());
        Ok(MockConnection { sink: self.clone() })
    }
}

pub fn config() -> GraphConfig {
    GraphConfig {
        uri: "bolt://mock:7687".to_string(),
        password: "mock-password".to_string(),
        ..GraphConfig::default()
    }
}
