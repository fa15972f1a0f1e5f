//! Relationship statements that are not derived from a traversal: blocks
//! read from relation-definition files and foreign-key based auto
//! relationships.

use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{AqneoError, AqneoResult};
use crate::payload::Payload;
use crate::template::{render, TemplateArgs};

use super::snake_case;

static FOREIGN_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<from>\w+)\.(?P<from_attr>\w+)\s*=\s*(?P<to>\w+)\.(?P<to_attr>\w+)\s*$")
        .expect("foreign key pattern")
});

const AUTO_RELATIONSHIP: &str = "
    MATCH (a:{from}), (b:{to})
    WHERE a.{from_attr} = b.{to_attr}
    MERGE (a)-[r:{label}]->(b)
    RETURN count(r)
";

/// Split text into statements separated by blank lines. Lines are trimmed;
/// runs of blank lines never produce empty statements.
pub fn parse_statement_blocks(text: &str) -> Vec<String> {
    let mut blocks: Vec<Vec<&str>> = vec![Vec::new()];
    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            blocks.push(Vec::new());
        } else if let Some(block) = blocks.last_mut() {
            block.push(line);
        }
    }
    blocks
        .into_iter()
        .filter(|b| !b.is_empty())
        .map(|b| b.join("\n"))
        .collect()
}

/// Read a relation-definition file into parameterless payloads.
pub fn load_relation_file(path: &Path) -> AqneoResult<Vec<Payload>> {
    let text = std::fs::read_to_string(path)?;
    parse_statement_blocks(&text)
        .into_iter()
        .map(Payload::statement)
        .collect()
}

/// A relationship implied by a foreign key, written as
/// `"Sample.sample_type_id = SampleType.id"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AutoRelationship {
    pub from: String,
    pub from_attr: String,
    pub to: String,
    pub to_attr: String,
    pub label: String,
}

impl AutoRelationship {
    pub fn parse(expr: &str, label: impl Into<String>) -> AqneoResult<Self> {
        let caps = FOREIGN_KEY.captures(expr).ok_or_else(|| {
            AqneoError::validation(format!(
                "'{expr}' is not a relationship of the form 'Type.attr = Other.attr'"
            ))
        })?;
        Ok(Self {
            from: caps["from"].to_string(),
            from_attr: caps["from_attr"].to_string(),
            to: caps["to"].to_string(),
            to_attr: caps["to_attr"].to_string(),
            label: label.into(),
        })
    }

    /// A `has_one` field: `from.<to snake>_id` references `to.id`.
    pub fn has_one(from: &str, to: &str) -> Self {
        Self {
            from: from.to_string(),
            from_attr: format!("{}_id", snake_case(to)),
            to: to.to_string(),
            to_attr: "id".to_string(),
            label: "hasOne".to_string(),
        }
    }

    /// A `has_many` field: `to.<from snake>_id` references `from.id`.
    pub fn has_many(from: &str, to: &str) -> Self {
        Self {
            from: from.to_string(),
            from_attr: "id".to_string(),
            to: to.to_string(),
            to_attr: format!("{}_id", snake_case(from)),
            label: "hasMany".to_string(),
        }
    }

    pub fn payload(&self) -> AqneoResult<Payload> {
        let args = TemplateArgs::new()
            .with("from", &self.from)
            .with("from_attr", &self.from_attr)
            .with("to", &self.to)
            .with("to_attr", &self.to_attr)
            .with("label", &self.label);
        Payload::statement(render(AUTO_RELATIONSHIP, &args)?)
    }

    /// Foreign keys between the built-in record types.
    pub fn builtins() -> Vec<Self> {
        vec![
            Self::has_one("Sample", "SampleType"),
            Self::has_one("Item", "Sample"),
            Self::has_one("Item", "ObjectType"),
            Self::has_one("FieldValue", "FieldType"),
            Self::has_many("SampleType", "FieldType"),
            Self::has_many("Sample", "FieldValue"),
        ]
    }
}

impl fmt::Display for AutoRelationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} = {}.{} ({})",
            self.from, self.from_attr, self.to, self.to_attr, self.label
        )
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_parse_statement_blocks() {
        let text = "
            MATCH (a:Sample), (b:SampleType)
            WHERE a.sample_type_id = b.id
            MERGE (a)-[:hasSampleType]->(b)


            MATCH (a:Item) RETURN a
        ";
        let blocks = parse_statement_blocks(text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(
            blocks[0],
            "MATCH (a:Sample), (b:SampleType)\nWHERE a.sample_type_id = b.id\nMERGE (a)-[:hasSampleType]->(b)"
        );
        assert_eq!(blocks[1], "MATCH (a:Item) RETURN a");
        assert!(parse_statement_blocks("\n \n").is_empty());
    }

    #[test]
    fn test_load_relation_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "RETURN 1\n\nRETURN 2").unwrap();
        let payloads = load_relation_file(file.path()).unwrap();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[1].query(), "RETURN 2");
    }

    #[test]
    fn test_auto_relationship() {
        let rel = AutoRelationship::parse("Sample.sample_type_id = SampleType.id", "hasOne").unwrap();
        assert_eq!(rel, AutoRelationship::has_one("Sample", "SampleType"));
        assert_eq!(
            rel.payload().unwrap().query(),
            "MATCH (a:Sample), (b:SampleType)\nWHERE a.sample_type_id = b.id\nMERGE (a)-[r:hasOne]->(b)\nRETURN count(r)"
        );
        assert!(AutoRelationship::parse("Sample = SampleType", "hasOne").is_err());
    }

    #[test]
    fn test_has_many_points_back() {
        let rel = AutoRelationship::has_many("SampleType", "FieldType");
        assert_eq!(rel.to_string(), "SampleType.id = FieldType.sample_type_id (hasMany)");
    }
}
