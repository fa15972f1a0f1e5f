//! Compile-time textual substitution for Cypher templates.
//!
//! Placeholders take the form `{key}` or `{key[idx]}`. A key bound to a
//! scalar is substituted in place. A key bound to a list turns its line into
//! a *vector* line, emitted once per list element:
//!
//! ```text
//! MATCH (n:{label})
//! SET n.{key} = ${key}
//! ```
//!
//! rendered with `label = "Sample"` and `key = ["id", "name"]` yields
//!
//! ```text
//! MATCH (n:Sample)
//! SET n.id = $id
//! SET n.name = $name
//! ```
//!
//! `$name` is sink-side parameter binding and is left untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::{AqneoError, AqneoResult};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\s*(?P<key>\w+)(?:\[\s*(?P<idx>\d+)\s*\])?\s*\}").expect("placeholder pattern")
});

/// A value substituted into a template.
#[derive(Debug, Clone, PartialEq)]
pub enum FormatValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Fixed-size group addressed with `{key[idx]}`.
    Tuple(Vec<FormatValue>),
    /// Sequence that fans a line out into one line per element.
    List(Vec<FormatValue>),
}

impl FormatValue {
    /// Convert a JSON value. Top-level arrays become lists; nested arrays
    /// become tuples.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Array(items) => Self::List(items.iter().map(Self::from_json_item).collect()),
            other => Self::from_json_item(other),
        }
    }

    fn from_json_item(value: &Value) -> Self {
        match value {
            Value::String(s) => Self::Text(s.clone()),
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            },
            Value::Array(items) => Self::Tuple(items.iter().map(Self::from_json_item).collect()),
            Value::Null => Self::Text("null".to_string()),
            Value::Object(_) => Self::Text(value.to_string()),
        }
    }

    fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }

    fn component(&self, key: &str, idx: usize) -> AqneoResult<&FormatValue> {
        match self {
            Self::Tuple(parts) | Self::List(parts) => parts.get(idx).ok_or_else(|| {
                AqneoError::validation(format!(
                    "index {idx} out of range for '{key}' ({} components)",
                    parts.len()
                ))
            }),
            _ => Err(AqneoError::validation(format!(
                "'{key}' is not a tuple and cannot be indexed with [{idx}]"
            ))),
        }
    }
}

impl fmt::Display for FormatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Tuple(parts) | Self::List(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{part}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for FormatValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FormatValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&String> for FormatValue {
    fn from(s: &String) -> Self {
        Self::Text(s.clone())
    }
}

impl From<i64> for FormatValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for FormatValue {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<usize> for FormatValue {
    fn from(i: usize) -> Self {
        Self::Int(i as i64)
    }
}

impl From<f64> for FormatValue {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for FormatValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl<A: Into<FormatValue>, B: Into<FormatValue>> From<(A, B)> for FormatValue {
    fn from((a, b): (A, B)) -> Self {
        Self::Tuple(vec![a.into(), b.into()])
    }
}

impl<A: Into<FormatValue>, B: Into<FormatValue>, C: Into<FormatValue>> From<(A, B, C)>
    for FormatValue
{
    fn from((a, b, c): (A, B, C)) -> Self {
        Self::Tuple(vec![a.into(), b.into(), c.into()])
    }
}

impl<T: Into<FormatValue>> From<Vec<T>> for FormatValue {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

/// Keyword map for [`render`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateArgs {
    values: BTreeMap<String, FormatValue>,
}

impl TemplateArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<FormatValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FormatValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&FormatValue> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

/// All placeholder keys referenced by a template.
pub fn format_keys(template: &str) -> BTreeSet<String> {
    PLACEHOLDER
        .captures_iter(template)
        .map(|caps| caps["key"].to_string())
        .collect()
}

struct Placeholder<'t> {
    start: usize,
    end: usize,
    key: &'t str,
    idx: Option<usize>,
}

fn placeholders(line: &str) -> AqneoResult<Vec<Placeholder<'_>>> {
    let mut found = Vec::new();
    for caps in PLACEHOLDER.captures_iter(line) {
        let whole = caps.get(0).expect("group 0 always matches");
        let key = caps.name("key").map(|m| m.as_str()).unwrap_or_default();
        let idx = match caps.name("idx") {
            Some(m) => Some(m.as_str().parse::<usize>().map_err(|_| {
                AqneoError::validation(format!("invalid index '{}' for '{key}'", m.as_str()))
            })?),
            None => None,
        };
        found.push(Placeholder {
            start: whole.start(),
            end: whole.end(),
            key,
            idx,
        });
    }
    Ok(found)
}

fn substitute(
    line: &str,
    found: &[Placeholder<'_>],
    args: &TemplateArgs,
    vector: Option<(&str, &FormatValue)>,
) -> AqneoResult<String> {
    let mut out = String::with_capacity(line.len());
    let mut last = 0;
    for p in found {
        out.push_str(&line[last..p.start]);
        let value = match vector {
            Some((key, element)) if key == p.key => element,
            _ => args
                .get(p.key)
                .ok_or_else(|| AqneoError::MissingFormatKeys(vec![p.key.to_string()]))?,
        };
        match p.idx {
            Some(idx) => out.push_str(&value.component(p.key, idx)?.to_string()),
            None => out.push_str(&value.to_string()),
        }
        last = p.end;
    }
    out.push_str(&line[last..]);
    Ok(out)
}

/// Render a multi-line template against `args`.
///
/// Every emitted line is trimmed and blank lines are dropped. Fails with
/// [`AqneoError::MissingFormatKeys`] naming every key absent from `args`, and
/// with [`AqneoError::AmbiguousVectorLine`] when a line references two
/// different list-valued keys.
pub fn render(template: &str, args: &TemplateArgs) -> AqneoResult<String> {
    let missing: Vec<String> = format_keys(template)
        .into_iter()
        .filter(|key| !args.contains_key(key))
        .collect();
    if !missing.is_empty() {
        return Err(AqneoError::MissingFormatKeys(missing));
    }

    let mut lines = Vec::new();
    for line in template.lines() {
        let found = placeholders(line)?;

        let mut vector_keys: Vec<&str> = Vec::new();
        for p in &found {
            let is_list = args.get(p.key).is_some_and(FormatValue::is_list);
            if is_list && !vector_keys.contains(&p.key) {
                vector_keys.push(p.key);
            }
        }

        match vector_keys.as_slice() {
            [] => lines.push(substitute(line, &found, args, None)?),
            [key] => {
                if let Some(FormatValue::List(elements)) = args.get(key) {
                    for element in elements {
                        lines.push(substitute(line, &found, args, Some((*key, element)))?);
                    }
                }
            }
            _ => {
                return Err(AqneoError::AmbiguousVectorLine {
                    line: line.trim().to_string(),
                    keys: vector_keys.iter().map(|k| k.to_string()).collect(),
                })
            }
        }
    }

    Ok(lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n"))
}
