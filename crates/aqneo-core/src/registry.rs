//! Named, validated Cypher query declarations.
//!
//! A declaration pairs a template with the fields that feed it. Fields
//! supply the sink-side `$name` parameters and may also resolve `{name}`
//! placeholders. Declarations are checked when they are registered; format
//! keys are checked when a payload is compiled.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{AqneoError, AqneoResult};
use crate::payload::{bound_variables, Payload};
use crate::template::{format_keys, render, FormatValue, TemplateArgs};

/// Idempotent bulk upsert of one entity type, keyed on `id`.
pub const MERGE_MODELS: &str = "MergeModels";
/// Fetch up to `limit` sample nodes.
pub const GET_SAMPLES: &str = "GetSamples";

/// A declared query field with an optional default value.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub default: Option<Value>,
}

/// A named query template and its fields.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDeclaration {
    name: String,
    text: String,
    fields: Vec<FieldDecl>,
}

impl QueryDeclaration {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            fields: Vec::new(),
        }
    }

    /// Declare a required field.
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(FieldDecl {
            name: name.into(),
            default: None,
        });
        self
    }

    /// Declare a field with a default value.
    pub fn field_with_default(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.fields.push(FieldDecl {
            name: name.into(),
            default: Some(default.into()),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn fields(&self) -> &[FieldDecl] {
        &self.fields
    }

    /// `$name` variables bound by the template.
    pub fn bound_variables(&self) -> BTreeSet<String> {
        bound_variables(&self.text)
    }

    /// `{name}` keys substituted into the template.
    pub fn format_keys(&self) -> BTreeSet<String> {
        format_keys(&self.text)
    }

    fn field_decl(&self, name: &str) -> Option<&FieldDecl> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn validate(&self) -> AqneoResult<()> {
        let incomplete = |reason: String| AqneoError::IncompleteDeclaration {
            name: self.name.clone(),
            reason,
        };

        if self.text.trim().is_empty() {
            return Err(incomplete("query text must be defined".to_string()));
        }

        let mut seen = BTreeSet::new();
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(incomplete(format!("field '{}' declared twice", field.name)));
            }
        }

        let missing: Vec<String> = self
            .bound_variables()
            .into_iter()
            .filter(|v| !seen.contains(v.as_str()))
            .collect();
        if !missing.is_empty() {
            return Err(incomplete(format!(
                "no field declared for {}",
                missing
                    .iter()
                    .map(|m| format!("'{m}'"))
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
        Ok(())
    }

    /// Compile a payload.
    ///
    /// `values` supplies field values (falling back to declared defaults).
    /// `overrides` resolves format keys ahead of field values. The rendered
    /// text is prefixed with a `// <name>` comment line.
    pub fn payload(&self, mut values: Map<String, Value>, overrides: &TemplateArgs) -> AqneoResult<Payload> {
        if let Some(unknown) = values.keys().find(|k| self.field_decl(k).is_none()) {
            return Err(AqneoError::validation(format!(
                "'{unknown}' is not a field of query '{}'",
                self.name
            )));
        }

        for field in &self.fields {
            if values.contains_key(&field.name) {
                continue;
            }
            match &field.default {
                Some(default) => {
                    values.insert(field.name.clone(), default.clone());
                }
                None => {
                    return Err(AqneoError::validation(format!(
                        "query '{}' requires a value for field '{}'",
                        self.name, field.name
                    )))
                }
            }
        }

        let mut args = overrides.clone();
        let mut missing = Vec::new();
        for key in self.format_keys() {
            if args.contains_key(&key) {
                continue;
            }
            match values.get(&key) {
                Some(value) => args.insert(key, FormatValue::from_json(value)),
                None => missing.push(key),
            }
        }
        if !missing.is_empty() {
            return Err(AqneoError::MissingFormatKeys(missing));
        }

        let query = render(&self.to_string(), &args)?;
        let parameters: Map<String, Value> = self
            .bound_variables()
            .into_iter()
            .filter_map(|v| values.get(&v).cloned().map(|value| (v, value)))
            .collect();

        debug!(query = %self.name, parameters = parameters.len(), "Compiled structured query");
        Payload::new(query, parameters)
    }
}

impl fmt::Display for QueryDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "// {}", self.name)?;
        let lines: Vec<&str> = self
            .text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        f.write_str(&lines.join("\n"))
    }
}

/// Process-scoped registry of query declarations, constructed once at
/// startup and handed to the compiler.
#[derive(Debug, Default)]
pub struct QueryRegistry {
    queries: BTreeMap<String, Arc<QueryDeclaration>>,
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in declarations.
    pub fn with_builtins() -> AqneoResult<Self> {
        let mut registry = Self::new();
        registry.register(
            QueryDeclaration::new(
                MERGE_MODELS,
                "UNWIND $datalist AS data
                 MERGE (n:{model_type} {id: data.id})
                 ON CREATE SET n = data
                 ON MATCH SET n += data
                 RETURN n.id AS x
                 ORDER BY x",
            )
            .field("datalist"),
        )?;
        registry.register(
            QueryDeclaration::new(GET_SAMPLES, "MATCH (n:Sample) RETURN n LIMIT {limit}")
                .field_with_default("limit", 100),
        )?;
        Ok(registry)
    }

    /// Validate and insert a declaration. Names are unique.
    pub fn register(&mut self, declaration: QueryDeclaration) -> AqneoResult<Arc<QueryDeclaration>> {
        if self.queries.contains_key(declaration.name()) {
            return Err(AqneoError::ClassDefinitionConflict(declaration.name().to_string()));
        }
        declaration.validate()?;

        let declaration = Arc::new(declaration);
        self.queries
            .insert(declaration.name().to_string(), Arc::clone(&declaration));
        debug!(query = %declaration.name(), "Registered structured query");
        Ok(declaration)
    }

    pub fn get(&self, name: &str) -> AqneoResult<Arc<QueryDeclaration>> {
        self.queries
            .get(name)
            .cloned()
            .ok_or_else(|| AqneoError::UnknownQuery(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.queries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_missing_text_rejected() {
        let mut registry = QueryRegistry::new();
        let err = registry.register(QueryDeclaration::new("Foo", "  ")).unwrap_err();
        assert!(matches!(err, AqneoError::IncompleteDeclaration { .. }));
    }

    #[test]
    fn test_undeclared_bound_variable_rejected() {
        let mut registry = QueryRegistry::new();
        let err = registry.register(QueryDeclaration::new("Foo", "$data")).unwrap_err();
        assert!(matches!(err, AqneoError::IncompleteDeclaration { .. }));
        assert!(err.to_string().contains("'data'"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_name_conflict() {
        let mut registry = QueryRegistry::new();
        registry.register(QueryDeclaration::new("Foo", "RETURN 1")).unwrap();
        let err = registry.register(QueryDeclaration::new("Foo", "RETURN 2")).unwrap_err();
        assert!(matches!(err, AqneoError::ClassDefinitionConflict(name) if name == "Foo"));
    }

    #[test]
    fn test_basic_payload() {
        let declaration = QueryDeclaration::new(
            "Foo",
            "
            MATCH (n:Sample)
            SET n += $data
            ",
        )
        .field("data");
        let data = json!({"id": 3, "key": "value"});
        let payload = declaration
            .payload(values(json!({"data": data})), &TemplateArgs::new())
            .unwrap();

        let mut lines = payload.query().lines();
        assert_eq!(lines.next(), Some("// Foo"));
        assert_eq!(lines.collect::<Vec<_>>().join("\n"), "MATCH (n:Sample)\nSET n += $data");
        assert_eq!(payload.parameters().get("data"), Some(&data));
    }

    #[test]
    fn test_format_key_from_field_default() {
        let declaration = QueryDeclaration::new("Foo", "MATCH (n:{model_type})\nSET n += $data")
            .field("data")
            .field_with_default("model_type", "SampleType");
        let payload = declaration
            .payload(values(json!({"data": 4})), &TemplateArgs::new())
            .unwrap();
        assert!(payload.query().contains("MATCH (n:SampleType)"));
        // Format-only fields are not sent as sink parameters.
        assert!(payload.parameters().get("model_type").is_none());
    }

    #[test]
    fn test_format_key_from_overrides() {
        let declaration = QueryDeclaration::new("Foo", "MATCH (n:{model_type})\nSET n += $data").field("data");

        let err = declaration
            .payload(values(json!({"data": 4})), &TemplateArgs::new())
            .unwrap_err();
        assert!(matches!(err, AqneoError::MissingFormatKeys(ref keys) if keys == &["model_type"]));

        let payload = declaration
            .payload(
                values(json!({"data": 4})),
                &TemplateArgs::new().with("model_type", "SampleType"),
            )
            .unwrap();
        assert!(payload.query().contains("MATCH (n:SampleType)"));
    }

    #[test]
    fn test_missing_field_value() {
        let registry = QueryRegistry::with_builtins().unwrap();
        let merge = registry.get(MERGE_MODELS).unwrap();
        let err = merge
            .payload(Map::new(), &TemplateArgs::new().with("model_type", "Item"))
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_builtins() {
        let registry = QueryRegistry::with_builtins().unwrap();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec![GET_SAMPLES, MERGE_MODELS]);

        let samples = registry.get(GET_SAMPLES).unwrap();
        let payload = samples.payload(Map::new(), &TemplateArgs::new()).unwrap();
        assert!(payload.query().ends_with("MATCH (n:Sample) RETURN n LIMIT 100"));
        assert!(payload.parameters().is_empty());

        assert!(matches!(registry.get("Nope"), Err(AqneoError::UnknownQuery(_))));
    }
}
