//! JSON-Schema builder over `serde_json::Value`.
//!
//! # Design
//!
//! - Traversal is post-order: every sub-schema is visited before the schema
//!   that contains it, so a visitor always sees finished children.
//! - Reachable sub-schemas: `properties`/`patternProperties` of objects,
//!   `items` (single or tuple) of arrays, and `anyOf`/`allOf`/`oneOf`
//!   everywhere. Boolean sub-schemas are skipped.
//! - [`JsonSchemaBuilder::transform`] rebuilds the tree; a replaced node is a
//!   new value, never an in-place patch of the old one.
//! - Paths are JSON-pointer-like: `""` for the root, then
//!   `/properties/<k>`, `/patternProperties/<p>`, `/items`, `/items/<i>`,
//!   `/anyOf/<i>`, ...
//!
//! # Connections
//!
//! - Implements [`SchemaBuilder`]; [`StrictJsonSchemaBuilder`](crate::strict_schema::StrictJsonSchemaBuilder)
//!   wraps it.
//! - Validation can be delegated to any registered [`JsonSchemaValidator`].

use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::resource::Resource;
use crate::schema_builder::{BuildOptions, SchemaBuilder, ValidationReport};

const OBJECT_CHILDREN: [&str; 2] = ["properties", "patternProperties"];
const COMBINATORS: [&str; 3] = ["anyOf", "allOf", "oneOf"];

// ---------------------------------------------------------------------------
// Validator capability
// ---------------------------------------------------------------------------

/// Validates data against a JSON schema. Registered as a resource so
/// builders can share one implementation.
pub trait JsonSchemaValidator: Resource {
    fn validate(&self, schema: &Value, data: &Value) -> ValidationReport;

    fn is_valid(&self, schema: &Value, data: &Value) -> bool {
        self.validate(schema, data).is_valid()
    }

    fn errors(&self, schema: &Value, data: &Value) -> Vec<String> {
        self.validate(schema, data).errors
    }
}

// ---------------------------------------------------------------------------
// Traversal
// ---------------------------------------------------------------------------

fn type_is(schema: &Map<String, Value>, name: &str) -> bool {
    schema.get("type").and_then(Value::as_str) == Some(name)
}

/// Visit every reachable sub-schema of `schema` (and `schema` itself, last)
/// in post-order.
pub fn for_each_sub_schema<F>(schema: &Value, visit: &mut F)
where
    F: FnMut(&Value, &str),
{
    walk(schema, "", visit);
}

fn walk<F>(schema: &Value, path: &str, visit: &mut F)
where
    F: FnMut(&Value, &str),
{
    let Some(obj) = schema.as_object() else {
        return;
    };

    if type_is(obj, "object") {
        for key in OBJECT_CHILDREN {
            if let Some(Value::Object(children)) = obj.get(key) {
                for (name, child) in children {
                    walk(child, &format!("{path}/{key}/{name}"), visit);
                }
            }
        }
    }

    if type_is(obj, "array") {
        match obj.get("items") {
            Some(Value::Array(items)) => {
                for (index, item) in items.iter().enumerate() {
                    walk(item, &format!("{path}/items/{index}"), visit);
                }
            }
            Some(item) => walk(item, &format!("{path}/items"), visit),
            None => {}
        }
    }

    for key in COMBINATORS {
        if let Some(Value::Array(options)) = obj.get(key) {
            for (index, option) in options.iter().enumerate() {
                walk(option, &format!("{path}/{key}/{index}"), visit);
            }
        }
    }

    visit(schema, path);
}

/// Post-order rebuild of `schema`. `transformer` receives each node with its
/// children already rebuilt; `Some` replaces the node, `None` keeps it.
pub fn transform_schema<F>(schema: Value, transformer: &mut F) -> Value
where
    F: FnMut(Value, &str) -> Option<Value>,
{
    rebuild(schema, "", transformer)
}

fn rebuild<F>(schema: Value, path: &str, transformer: &mut F) -> Value
where
    F: FnMut(Value, &str) -> Option<Value>,
{
    let Value::Object(mut obj) = schema else {
        return schema;
    };

    if type_is(&obj, "object") {
        for key in OBJECT_CHILDREN {
            if let Some(Value::Object(children)) = obj.get_mut(key) {
                for (name, child) in children.iter_mut() {
                    let child_path = format!("{path}/{key}/{name}");
                    *child = rebuild(child.take(), &child_path, transformer);
                }
            }
        }
    }

    if type_is(&obj, "array") {
        match obj.get_mut("items") {
            Some(Value::Array(items)) => {
                for (index, item) in items.iter_mut().enumerate() {
                    let item_path = format!("{path}/items/{index}");
                    *item = rebuild(item.take(), &item_path, transformer);
                }
            }
            Some(item) => {
                let item_path = format!("{path}/items");
                *item = rebuild(item.take(), &item_path, transformer);
            }
            None => {}
        }
    }

    for key in COMBINATORS {
        if let Some(Value::Array(options)) = obj.get_mut(key) {
            for (index, option) in options.iter_mut().enumerate() {
                let option_path = format!("{path}/{key}/{index}");
                *option = rebuild(option.take(), &option_path, transformer);
            }
        }
    }

    let node = Value::Object(obj);
    match transformer(node.clone(), path) {
        Some(replacement) => replacement,
        None => node,
    }
}

/// The sub-schema at a dotted property path (`"user.address.street"`).
/// An empty path is the schema itself.
pub fn resolve_obj_path<'a>(schema: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(schema);
    }
    path.split('.').try_fold(schema, |node, part| {
        node.get("properties")?.get(part).filter(|child| child.is_object())
    })
}

/// Objects, arrays, untyped schemas and `true` can hold structured data.
pub fn is_object_like(schema: &Value) -> bool {
    match schema {
        Value::Bool(accepts) => *accepts,
        Value::Object(obj) => match obj.get("type") {
            None => true,
            Some(Value::String(kind)) => kind == "object" || kind == "array",
            Some(_) => false,
        },
        _ => false,
    }
}

fn push_required(obj: &mut Map<String, Value>, key: &str) {
    let required = obj
        .entry("required")
        .or_insert_with(|| Value::Array(Vec::new()));
    if !required.is_array() {
        *required = Value::Array(Vec::new());
    }
    if let Value::Array(list) = required {
        if !list.iter().any(|k| k.as_str() == Some(key)) {
            list.push(Value::String(key.to_string()));
        }
    }
}

fn object_mut(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just made an object"),
    }
}

/// Make `node` an object schema and return its `properties` map.
fn properties_of(node: &mut Value) -> &mut Map<String, Value> {
    let obj = object_mut(node);
    obj.entry("type")
        .or_insert_with(|| Value::String("object".into()));
    object_mut(obj.entry("properties").or_insert_with(|| Value::Object(Map::new())))
}

fn pick_paths(source: &Value, paths: &[Vec<&str>]) -> Value {
    let Some(obj) = source.as_object() else {
        return source.clone();
    };
    let mut picked: Map<String, Value> = obj
        .iter()
        .filter(|(k, _)| k.as_str() != "properties" && k.as_str() != "required")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut properties = Map::new();
    let mut seen: Vec<&str> = Vec::new();
    for path in paths {
        let Some((&head, _)) = path.split_first() else {
            continue;
        };
        if seen.contains(&head) {
            continue;
        }
        seen.push(head);

        let Some(child) = source.get("properties").and_then(|p| p.get(head)) else {
            continue;
        };
        let whole = paths.iter().any(|p| p.len() == 1 && p[0] == head);
        let value = if whole {
            child.clone()
        } else {
            let rest: Vec<Vec<&str>> = paths
                .iter()
                .filter(|p| p.len() > 1 && p[0] == head)
                .map(|p| p[1..].to_vec())
                .collect();
            pick_paths(child, &rest)
        };
        properties.insert(head.to_string(), value);
    }

    if let Some(Value::Array(required)) = obj.get("required") {
        let kept: Vec<Value> = required
            .iter()
            .filter(|k| k.as_str().is_some_and(|k| properties.contains_key(k)))
            .cloned()
            .collect();
        picked.insert("required".into(), Value::Array(kept));
    }
    picked.insert("properties".into(), Value::Object(properties));
    Value::Object(picked)
}

// ---------------------------------------------------------------------------
// JsonSchemaBuilder
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct JsonSchemaBuilder {
    schema: Value,
    validator: Option<Arc<dyn JsonSchemaValidator>>,
}

impl JsonSchemaBuilder {
    pub fn new(schema: Value) -> Self {
        Self {
            schema,
            validator: None,
        }
    }

    /// Builder over `{}`.
    pub fn empty() -> Self {
        Self::new(json!({}))
    }

    pub fn with_validator(mut self, validator: Arc<dyn JsonSchemaValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn validator(&self) -> Option<&Arc<dyn JsonSchemaValidator>> {
        self.validator.as_ref()
    }

    /// Rebuild the schema through `transformer` (see [`transform_schema`]).
    pub fn transform<F>(&mut self, mut transformer: F) -> &mut Self
    where
        F: FnMut(Value, &str) -> Option<Value>,
    {
        let schema = self.schema.take();
        self.schema = transform_schema(schema, &mut transformer);
        self
    }

    /// Place `schema` at the dotted property path, creating object levels
    /// on the way. Every key on the path becomes required in its parent.
    pub fn sub(&mut self, path: &str, schema: Value) -> &mut Self {
        let parts: Vec<&str> = path.split('.').collect();
        let Some((last, parents)) = parts.split_last() else {
            return self;
        };

        let mut node = &mut self.schema;
        for part in parents {
            properties_of(node);
            push_required(object_mut(node), part);
            node = properties_of(node)
                .entry(part.to_string())
                .or_insert_with(|| json!({ "type": "object" }));
            if !node.is_object() {
                *node = json!({ "type": "object" });
            }
        }

        properties_of(node).insert(last.to_string(), schema);
        push_required(object_mut(node), last);
        self
    }

    /// A new builder keeping only the given dotted property paths.
    /// `required` lists are filtered to what was kept.
    pub fn pick(&self, paths: &[&str]) -> JsonSchemaBuilder {
        let split: Vec<Vec<&str>> = paths.iter().map(|p| p.split('.').collect()).collect();
        JsonSchemaBuilder {
            schema: pick_paths(&self.schema, &split),
            validator: self.validator.clone(),
        }
    }

    /// Inline `$ref`s found in `refs`.
    pub fn inject_refs(&mut self, refs: &Map<String, Value>) -> &mut Self {
        self.inject_refs_with(|reference, _, _| refs.get(reference).cloned())
    }

    /// Inline `$ref`s answered by `resolve(ref, node, path)`. The answer's
    /// keys are assigned onto the node and `$ref` is dropped; unanswered
    /// refs stay.
    pub fn inject_refs_with<F>(&mut self, mut resolve: F) -> &mut Self
    where
        F: FnMut(&str, &Value, &str) -> Option<Value>,
    {
        self.transform(|node, path| {
            let reference = node.get("$ref")?.as_str()?.to_string();
            let Value::Object(target) = resolve(&reference, &node, path)? else {
                return None;
            };
            let Value::Object(mut obj) = node else {
                return None;
            };
            obj.remove("$ref");
            obj.extend(target);
            Some(Value::Object(obj))
        })
    }

    pub fn resolve_obj_path(&self, path: &str) -> Option<&Value> {
        resolve_obj_path(&self.schema, path)
    }

    /// Shorthand for a default [`build`](SchemaBuilder::build).
    pub fn build_default(&mut self) -> crate::errors::Result<Value> {
        self.build(BuildOptions::default())
    }
}

impl SchemaBuilder for JsonSchemaBuilder {
    type Schema = Value;

    fn schema(&self) -> &Value {
        &self.schema
    }

    fn schema_mut(&mut self) -> &mut Value {
        &mut self.schema
    }

    fn validate(&self, schema: &Value) -> ValidationReport {
        if let Some(validator) = &self.validator {
            return validator.validate(schema, schema);
        }
        if !schema.is_object() {
            return ValidationReport::from_errors(vec!["Invalid schema".into()]);
        }
        ValidationReport::valid()
    }
}

impl std::fmt::Debug for JsonSchemaBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonSchemaBuilder")
            .field("schema", &self.schema)
            .field("validator", &self.validator.as_ref().map(|v| v.name()))
            .finish()
    }
}
