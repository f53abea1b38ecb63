//! Strict function-call schema profile.
//!
//! Strict schemas are what function-calling APIs accept without guessing:
//! a root object, one type per node, every property required and no
//! additional properties. [`StrictJsonSchemaBuilder::adjust`] rewrites most
//! schemas into that shape; `validate` reports what is still off.

use log::warn;
use serde_json::{Map, Value};

use crate::json_schema::{for_each_sub_schema, transform_schema, JsonSchemaBuilder};
use crate::schema_builder::{SchemaBuilder, ValidationReport};

pub const SUPPORTED_KEYS: [&str; 7] = [
    "type",
    "description",
    "properties",
    "required",
    "enum",
    "items",
    "additionalProperties",
];

pub const SUPPORTED_FORMATS: [&str; 3] = ["date-time", "email", "uri"];

pub const SUPPORTED_TYPES: [&str; 6] = ["array", "boolean", "integer", "number", "object", "string"];

fn format_is_supported(format: &Value) -> bool {
    format.as_str().is_some_and(|f| SUPPORTED_FORMATS.contains(&f))
}

/// [`JsonSchemaBuilder`] restricted to the strict profile.
#[derive(Debug, Clone, Default)]
pub struct StrictJsonSchemaBuilder {
    inner: JsonSchemaBuilder,
}

impl StrictJsonSchemaBuilder {
    pub fn new(schema: Value) -> Self {
        Self {
            inner: JsonSchemaBuilder::new(schema),
        }
    }

    /// The underlying builder, for `sub`, `pick`, `inject_refs`, ...
    pub fn inner(&self) -> &JsonSchemaBuilder {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut JsonSchemaBuilder {
        &mut self.inner
    }
}

impl From<JsonSchemaBuilder> for StrictJsonSchemaBuilder {
    fn from(inner: JsonSchemaBuilder) -> Self {
        Self { inner }
    }
}

fn strict_errors(node: &Value, errors: &mut Vec<String>) {
    let Some(obj) = node.as_object() else {
        return;
    };

    match obj.get("type") {
        Some(Value::Array(_)) => {
            errors.push("Multiple types are not allowed".into());
            return;
        }
        Some(Value::String(kind)) if SUPPORTED_TYPES.contains(&kind.as_str()) => {}
        Some(Value::String(kind)) => errors.push(format!("Type not allowed: {kind}")),
        Some(other) => errors.push(format!("Type not allowed: {other}")),
        None => errors.push("Type not allowed: none".into()),
    }

    if let Some(format) = obj.get("format") {
        if !format_is_supported(format) {
            let shown = format.as_str().map(String::from).unwrap_or_else(|| format.to_string());
            errors.push(format!("Format not allowed: {shown}"));
        }
    }

    for key in obj.keys() {
        if key.starts_with('$') || key == "format" || SUPPORTED_KEYS.contains(&key.as_str()) {
            continue;
        }
        errors.push(format!("Property not allowed: {key}"));
    }
}

fn strict_node(node: Value, path: &str) -> Option<Value> {
    let Value::Object(obj) = node else {
        return None;
    };

    let mut kept = Map::new();
    for (key, value) in obj {
        let supported = SUPPORTED_KEYS.contains(&key.as_str())
            || (key == "format" && format_is_supported(&value));
        if supported {
            kept.insert(key, value);
        } else {
            warn!("strict schema: removing '{key}' at '{path}'");
        }
    }

    if kept.get("type").and_then(Value::as_str) == Some("object") {
        kept.insert("additionalProperties".into(), Value::Bool(false));
        let required: Vec<Value> = kept
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| props.keys().cloned().map(Value::String).collect())
            .unwrap_or_default();
        kept.insert("required".into(), Value::Array(required));
    }

    Some(Value::Object(kept))
}

impl SchemaBuilder for StrictJsonSchemaBuilder {
    type Schema = Value;

    fn schema(&self) -> &Value {
        self.inner.schema()
    }

    fn schema_mut(&mut self) -> &mut Value {
        self.inner.schema_mut()
    }

    fn validate(&self, schema: &Value) -> ValidationReport {
        let base = self.inner.validate(schema);
        if !base.is_valid() {
            return base;
        }

        if schema.get("type").and_then(Value::as_str) != Some("object") {
            return ValidationReport::from_errors(vec!["Root schema must be 'object'".into()]);
        }

        let mut errors = Vec::new();
        for_each_sub_schema(schema, &mut |node, _| strict_errors(node, &mut errors));
        ValidationReport::from_errors(errors)
    }

    /// Strip unsupported keys and formats, close every object and require
    /// all of its properties.
    fn adjust(&self, schema: Value) -> Value {
        transform_schema(schema, &mut strict_node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema_builder::BuildOptions;
    use serde_json::json;

    fn loose() -> Value {
        json!({
            "type": "object",
            "title": "Person",
            "properties": {
                "name": {"type": "string", "minLength": 1},
                "born": {"type": "string", "format": "date-time"},
                "site": {"type": "string", "format": "hostname"},
                "pets": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {"kind": {"type": "string", "enum": ["cat", "dog"]}}
                    }
                }
            },
            "required": ["name"]
        })
    }

    // ---- Validation ----

    #[test]
    fn root_must_be_object() {
        let builder = StrictJsonSchemaBuilder::new(json!({"type": "string"}));
        assert_eq!(builder.errors(false), vec!["Root schema must be 'object'"]);

        let builder = StrictJsonSchemaBuilder::new(json!(42));
        assert_eq!(builder.errors(false), vec!["Invalid schema"]);
    }

    #[test]
    fn reports_types_and_properties() {
        let builder = StrictJsonSchemaBuilder::new(json!({
            "type": "object",
            "properties": {
                "a": {"type": ["string", "null"]},
                "b": {"type": "null"},
                "c": {"type": "string", "pattern": "x+", "$comment": "ignored"}
            }
        }));
        assert_eq!(
            builder.errors(false),
            vec![
                "Multiple types are not allowed",
                "Type not allowed: null",
                "Property not allowed: pattern",
            ]
        );
    }

    #[test]
    fn reports_unsupported_formats() {
        let builder = StrictJsonSchemaBuilder::new(json!({
            "type": "object",
            "properties": {"h": {"type": "string", "format": "hostname"}}
        }));
        assert_eq!(builder.errors(false), vec!["Format not allowed: hostname"]);
    }

    // ---- Adjust ----

    #[test]
    fn adjust_produces_a_strict_schema() {
        let builder = StrictJsonSchemaBuilder::new(loose());
        assert!(!builder.is_valid(false));
        assert!(builder.is_valid(true));

        let adjusted = builder.adjust(loose());
        assert_eq!(
            adjusted,
            json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "born": {"type": "string", "format": "date-time"},
                    "site": {"type": "string"},
                    "pets": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {"kind": {"type": "string", "enum": ["cat", "dog"]}},
                            "additionalProperties": false,
                            "required": ["kind"]
                        }
                    }
                },
                "additionalProperties": false,
                "required": ["born", "name", "pets", "site"]
            })
        );
    }

    #[test]
    fn build_returns_adjusted_schema() {
        let mut builder = StrictJsonSchemaBuilder::new(loose());
        let built = builder.build(BuildOptions::default()).unwrap();
        assert_eq!(built["additionalProperties"], json!(false));
        assert!(built.get("title").is_none());
        // The builder keeps the loose original.
        assert_eq!(builder.schema()["title"], json!("Person"));
    }

    #[test]
    fn build_without_adjust_fails_on_loose_schema() {
        let mut builder = StrictJsonSchemaBuilder::new(loose());
        let err = builder
            .build(BuildOptions {
                adjust: false,
                ..Default::default()
            })
            .unwrap_err();
        let errors = err.data["errors"].as_array().unwrap();
        assert!(errors.contains(&json!("Property not allowed: title")));
        assert!(errors.contains(&json!("Property not allowed: minLength")));
    }

    #[test]
    fn adjust_cannot_fix_multiple_types() {
        let mut builder = StrictJsonSchemaBuilder::new(json!({
            "type": "object",
            "properties": {"a": {"type": ["string", "null"]}}
        }));
        let err = builder.build(BuildOptions::default()).unwrap_err();
        assert_eq!(err.data["errors"], json!(["Multiple types are not allowed"]));
    }

    #[test]
    fn inner_builder_helpers_still_apply() {
        let mut builder = StrictJsonSchemaBuilder::new(json!({"type": "object"}));
        builder
            .inner_mut()
            .sub("user.email", json!({"type": "string", "format": "email"}));
        let built = builder.build(BuildOptions::default()).unwrap();
        assert_eq!(built["properties"]["user"]["required"], json!(["email"]));
        assert_eq!(
            built["properties"]["user"]["properties"]["email"]["format"],
            json!("email")
        );
    }
}
