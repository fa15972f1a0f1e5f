//! Validated `(query, parameters)` pairs destined for the sink.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AqneoError, AqneoResult};

static BOUND_VARIABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(?P<variable>[A-Za-z_][A-Za-z0-9_]*)").expect("variable pattern"));

/// `query` with string literals, quoted identifiers and comments blanked
/// out, so only Cypher code remains.
fn code_only(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut chars = query.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                out.push(' ');
                while let Some(inner) = chars.next() {
                    if inner == '\\' && c != '`' {
                        chars.next();
                    } else if inner == c {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'/') => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut previous = ' ';
                for inner in chars.by_ref() {
                    if previous == '*' && inner == '/' {
                        break;
                    }
                    previous = inner;
                }
                out.push(' ');
            }
            other => out.push(other),
        }
    }
    out
}

/// Sink-side `$name` parameters referenced by a query. Text inside string
/// literals and comments is not code and binds nothing.
pub fn bound_variables(query: &str) -> BTreeSet<String> {
    BOUND_VARIABLE
        .captures_iter(&code_only(query))
        .map(|caps| caps["variable"].to_string())
        .collect()
}

/// A graph database transaction payload: query text plus the parameters
/// bound to its `$name` variables.
///
/// Parameters are held as JSON values, so a payload always round-trips
/// through JSON. Construction fails when the query is blank or references a
/// `$name` that has no parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    query: String,
    #[serde(default)]
    parameters: Map<String, Value>,
}

impl Payload {
    pub fn new(query: impl Into<String>, parameters: Map<String, Value>) -> AqneoResult<Self> {
        let query = query.into();
        if query.trim().is_empty() {
            return Err(AqneoError::validation("payload query is empty"));
        }

        let unbound: Vec<String> = bound_variables(&query)
            .into_iter()
            .filter(|v| !parameters.contains_key(v))
            .collect();
        if !unbound.is_empty() {
            return Err(AqneoError::validation(format!(
                "query binds ${} but no parameter was supplied",
                unbound.join(", $")
            )));
        }

        Ok(Self { query, parameters })
    }

    /// A payload without parameters.
    pub fn statement(query: impl Into<String>) -> AqneoResult<Self> {
        Self::new(query, Map::new())
    }

    /// Build a payload from any serializable parameter struct or map. The
    /// value must serialize to a JSON object.
    pub fn from_serialize<T: Serialize>(query: impl Into<String>, parameters: &T) -> AqneoResult<Self> {
        let value = serde_json::to_value(parameters)
            .map_err(|e| AqneoError::validation(format!("parameters are not serializable: {e}")))?;
        match value {
            Value::Object(map) => Self::new(query, map),
            other => Err(AqneoError::validation(format!(
                "parameters must serialize to a map, got {other}"
            ))),
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn parameters(&self) -> &Map<String, Value> {
        &self.parameters
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bound_variables() {
        let vars = bound_variables("UNWIND $datalist AS data\nSET n.name = $name, n.x = $name");
        assert_eq!(vars.into_iter().collect::<Vec<_>>(), vec!["datalist", "name"]);
    }

    #[test]
    fn test_literals_and_comments_bind_nothing() {
        let query = "// touches $nothing\n\
                     MATCH (n:Item) WHERE n.name = 'cost $usd' AND n.note = \"it's \\\"$quoted\\\"\"\n\
                     /* $block\n spans lines */ SET n.`$odd` = $value";
        let vars = bound_variables(query);
        assert_eq!(vars.into_iter().collect::<Vec<_>>(), vec!["value"]);

        assert!(Payload::statement("MATCH (n) WHERE n.name = 'cost $usd' RETURN n").is_ok());
    }

    #[test]
    fn test_unbound_variable_rejected() {
        let err = Payload::statement("MATCH (n) SET n += $data").unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("$data"));
    }

    #[test]
    fn test_blank_query_rejected() {
        assert!(Payload::statement("   \n").is_err());
    }

    #[test]
    fn test_from_serialize_requires_map() {
        assert!(Payload::from_serialize("RETURN 1", &vec![1, 2]).is_err());

        let payload = Payload::from_serialize("RETURN $x", &json!({"x": [1, [2, "a"]]})).unwrap();
        assert_eq!(payload.parameters()["x"], json!([1, [2, "a"]]));
    }

    #[test]
    fn test_json_round_trip() {
        let payload = Payload::from_serialize("RETURN $x", &json!({"x": 1.5})).unwrap();
        let encoded = serde_json::to_string(&payload).unwrap();
        let decoded: Payload = serde_json::from_str(&encoded).unwrap();
        assert_eq!(payload, decoded);
    }
}
