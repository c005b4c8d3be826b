//! Structural schemas for JSON-shaped values.
//!
//! A [`Schema`] is an ordered list of named [`Field`]s. Every schema that
//! flows through the engine is first passed through [`standardize`], which
//! drops titles (recursively). Field order is kept as declared, since it is
//! the order providers generate fields in; equality ignores it, so two schemas
//! built from the same shape compare equal regardless of declaration order.
//!
//! - [`schema_of`] infers a schema from a JSON payload.
//! - [`contains`] checks that one schema covers another (used by optimizers to
//!   pick the variables they govern).
//! - [`concat_schemas`] merges schemas, renaming colliding fields
//!   `name`, `name_1`, `name_2`, ...
//! - [`Schema::validate`] checks a payload against a schema.

pub mod registry;

use std::collections::HashSet;
use std::fmt;

use serde_json::{json, Map, Value};

use crate::error::{OpError, OpResult};

pub use registry::{DataModel, DataType, TypeRegistry};

/// The type of a single schema field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Null,
    /// Accepts any JSON value.
    Any,
    Array(Box<FieldType>),
    Object(Box<Schema>),
    /// A string restricted to a fixed set of labels.
    Enum(Vec<String>),
    /// The inner type or `null`.
    Nullable(Box<FieldType>),
}

/// A named field of a [`Schema`].
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
    pub required: bool,
    pub description: Option<String>,
    pub default: Option<Value>,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
            description: None,
            default: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Structural type descriptor of a JSON object.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub title: Option<String>,
    pub fields: Vec<Field>,
}

/// Field order does not take part in equality.
impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.title == other.title
            && self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .all(|field| other.get(&field.name) == Some(field))
    }
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            fields: Vec::new(),
        }
    }

    /// Append a required field.
    pub fn field(self, name: impl Into<String>, ty: FieldType) -> Self {
        self.with_field(Field::new(name, ty))
    }

    /// Append an optional field.
    pub fn optional_field(self, name: impl Into<String>, ty: FieldType) -> Self {
        self.with_field(Field::new(name, ty).optional())
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Canonical form of this schema. See [`standardize`].
    pub fn standardized(&self) -> Schema {
        standardize(self)
    }

    /// Render as a JSON Schema object, the form sent to language-model providers.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            let mut prop = field_type_to_json(&field.ty);
            if let Value::Object(obj) = &mut prop {
                if let Some(desc) = &field.description {
                    obj.insert("description".into(), Value::String(desc.clone()));
                }
                if let Some(default) = &field.default {
                    obj.insert("default".into(), default.clone());
                }
            }
            properties.insert(field.name.clone(), prop);
            if field.required {
                required.push(Value::String(field.name.clone()));
            }
        }
        let mut schema = json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        });
        if let Some(title) = &self.title {
            schema["title"] = Value::String(title.clone());
        }
        schema
    }

    /// Parse a JSON Schema object (the subset produced by [`Schema::to_json_schema`]).
    pub fn from_json_schema(value: &Value) -> OpResult<Schema> {
        let obj = value
            .as_object()
            .ok_or_else(|| OpError::ConfigError("JSON schema must be an object".into()))?;
        if let Some(ty) = obj.get("type").and_then(Value::as_str) {
            if ty != "object" {
                return Err(OpError::ConfigError(format!(
                    "JSON schema root must be of type `object`, found `{}`",
                    ty
                )));
            }
        }
        let required: HashSet<&str> = obj
            .get("required")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut schema = Schema {
            title: obj.get("title").and_then(Value::as_str).map(str::to_string),
            fields: Vec::new(),
        };
        if let Some(props) = obj.get("properties").and_then(Value::as_object) {
            for (name, prop) in props {
                let field = Field {
                    name: name.clone(),
                    ty: field_type_from_json(prop)?,
                    required: required.contains(name.as_str()),
                    description: prop
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    default: prop.get("default").cloned(),
                };
                schema.fields.push(field);
            }
        }
        Ok(schema)
    }

    /// Check that `payload` is an object matching this schema.
    ///
    /// Required fields must be present, unknown fields are rejected and every
    /// present field must match its declared type.
    pub fn validate(&self, payload: &Value) -> OpResult<()> {
        validate_object(self, payload, "$").map_err(OpError::ValidationError)
    }

    /// Payload built from field defaults, falling back to the zero value of
    /// each field type.
    pub fn default_payload(&self) -> Value {
        let mut map = Map::new();
        for field in &self.fields {
            let value = field
                .default
                .clone()
                .unwrap_or_else(|| zero_value(&field.ty));
            map.insert(field.name.clone(), value);
        }
        Value::Object(map)
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered =
            serde_json::to_string_pretty(&self.to_json_schema()).map_err(|_| fmt::Error)?;
        f.write_str(&rendered)
    }
}

/// Canonicalize a schema: drop titles, collapse nested nullables, recurse
/// into nested objects. Field order is preserved. Idempotent.
pub fn standardize(schema: &Schema) -> Schema {
    let fields: Vec<Field> = schema
        .fields
        .iter()
        .map(|f| Field {
            ty: standardize_type(&f.ty),
            ..f.clone()
        })
        .collect();
    Schema {
        title: None,
        fields,
    }
}

fn standardize_type(ty: &FieldType) -> FieldType {
    match ty {
        FieldType::Array(inner) => FieldType::Array(Box::new(standardize_type(inner))),
        FieldType::Object(schema) => FieldType::Object(Box::new(standardize(schema))),
        FieldType::Nullable(inner) => match inner.as_ref() {
            // Nullable(Nullable(t)) collapses to Nullable(t)
            FieldType::Nullable(_) => standardize_type(inner),
            _ => FieldType::Nullable(Box::new(standardize_type(inner))),
        },
        other => other.clone(),
    }
}

/// Infer the (standardized) schema of a JSON object payload. All fields are
/// required.
pub fn schema_of(value: &Value) -> OpResult<Schema> {
    let obj = value.as_object().ok_or_else(|| {
        OpError::SchemaMismatch(format!("expected a JSON object, found {}", json_kind(value)))
    })?;
    let fields = obj
        .iter()
        .map(|(name, v)| Field::new(name.clone(), infer_type(v)))
        .collect();
    Ok(standardize(&Schema {
        title: None,
        fields,
    }))
}

fn infer_type(value: &Value) -> FieldType {
    match value {
        Value::Null => FieldType::Null,
        Value::Bool(_) => FieldType::Boolean,
        Value::Number(n) if n.is_i64() || n.is_u64() => FieldType::Integer,
        Value::Number(_) => FieldType::Number,
        Value::String(_) => FieldType::String,
        Value::Array(items) => {
            let inner = items.first().map(infer_type).unwrap_or(FieldType::Any);
            FieldType::Array(Box::new(inner))
        }
        Value::Object(_) => match schema_of(value) {
            Ok(schema) => FieldType::Object(Box::new(schema)),
            Err(_) => FieldType::Any,
        },
    }
}

/// True if every field of `b` is present in `a` with a compatible type.
pub fn contains(a: &Schema, b: &Schema) -> bool {
    b.fields.iter().all(|fb| {
        a.get(&fb.name)
            .map(|fa| type_compatible(&fa.ty, &fb.ty))
            .unwrap_or(false)
    })
}

fn type_compatible(a: &FieldType, b: &FieldType) -> bool {
    match (a, b) {
        (FieldType::Any, _) | (_, FieldType::Any) => true,
        (FieldType::Array(x), FieldType::Array(y)) => type_compatible(x, y),
        (FieldType::Object(x), FieldType::Object(y)) => contains(x, y),
        (FieldType::Nullable(x), FieldType::Nullable(y)) => type_compatible(x, y),
        (FieldType::Nullable(x), y) => type_compatible(x, y),
        (FieldType::Enum(x), FieldType::Enum(y)) => y.iter().all(|label| x.contains(label)),
        (FieldType::String, FieldType::Enum(_)) => true,
        (FieldType::Number, FieldType::Integer) => true,
        (x, y) => x == y,
    }
}

/// Assign final field names for a merge of `operands`, in encounter order.
///
/// Returns, per operand, the `(original, merged)` name pairs. Shared by the
/// schema merge and the payload merge so both agree on renaming.
pub(crate) fn merged_field_names(operands: &[&Schema]) -> Vec<Vec<(String, String)>> {
    let mut used: HashSet<String> = HashSet::new();
    operands
        .iter()
        .map(|schema| {
            schema
                .fields
                .iter()
                .map(|field| {
                    let merged = unique_name(&field.name, &used);
                    used.insert(merged.clone());
                    (field.name.clone(), merged)
                })
                .collect()
        })
        .collect()
}

fn unique_name(name: &str, used: &HashSet<String>) -> String {
    if !used.contains(name) {
        return name.to_string();
    }
    let mut i = 1;
    loop {
        let candidate = format!("{}_{}", name, i);
        if !used.contains(&candidate) {
            return candidate;
        }
        i += 1;
    }
}

/// Merge schemas into one, renaming colliding fields. The result is standardized.
pub fn concat_schemas(schemas: &[&Schema]) -> Schema {
    let names = merged_field_names(schemas);
    let mut fields = Vec::new();
    for (schema, renames) in schemas.iter().zip(names) {
        for (field, (_, merged)) in schema.fields.iter().zip(renames) {
            fields.push(Field {
                name: merged,
                ..field.clone()
            });
        }
    }
    standardize(&Schema {
        title: None,
        fields,
    })
}

fn field_type_to_json(ty: &FieldType) -> Value {
    match ty {
        FieldType::String => json!({"type": "string"}),
        FieldType::Integer => json!({"type": "integer"}),
        FieldType::Number => json!({"type": "number"}),
        FieldType::Boolean => json!({"type": "boolean"}),
        FieldType::Null => json!({"type": "null"}),
        FieldType::Any => json!({}),
        FieldType::Array(inner) => json!({"type": "array", "items": field_type_to_json(inner)}),
        FieldType::Object(schema) => schema.to_json_schema(),
        FieldType::Enum(labels) => json!({"type": "string", "enum": labels}),
        FieldType::Nullable(inner) => {
            json!({"anyOf": [field_type_to_json(inner), {"type": "null"}]})
        }
    }
}

fn field_type_from_json(value: &Value) -> OpResult<FieldType> {
    if value.get("$ref").is_some() {
        return Err(OpError::ConfigError(
            "`$ref` is not supported in field schemas".into(),
        ));
    }
    if let Some(labels) = value.get("enum").and_then(Value::as_array) {
        return Ok(FieldType::Enum(
            labels
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        ));
    }
    if let Some(variants) = value.get("anyOf").and_then(Value::as_array) {
        let non_null: Vec<&Value> = variants
            .iter()
            .filter(|v| v.get("type").and_then(Value::as_str) != Some("null"))
            .collect();
        let has_null = non_null.len() != variants.len();
        let inner = match non_null.as_slice() {
            [single] => field_type_from_json(single)?,
            _ => FieldType::Any,
        };
        return Ok(if has_null {
            FieldType::Nullable(Box::new(inner))
        } else {
            inner
        });
    }
    let ty = match value.get("type").and_then(Value::as_str) {
        None => FieldType::Any,
        Some("string") => FieldType::String,
        Some("integer") => FieldType::Integer,
        Some("number") => FieldType::Number,
        Some("boolean") => FieldType::Boolean,
        Some("null") => FieldType::Null,
        Some("array") => {
            let items = match value.get("items") {
                Some(items) => field_type_from_json(items)?,
                None => FieldType::Any,
            };
            FieldType::Array(Box::new(items))
        }
        Some("object") => {
            if value.get("properties").is_some() {
                FieldType::Object(Box::new(Schema::from_json_schema(value)?))
            } else {
                FieldType::Any
            }
        }
        Some(other) => {
            return Err(OpError::ConfigError(format!(
                "unsupported JSON schema type: {}",
                other
            )))
        }
    };
    Ok(ty)
}

fn zero_value(ty: &FieldType) -> Value {
    match ty {
        FieldType::String => Value::String(String::new()),
        FieldType::Integer => json!(0),
        FieldType::Number => json!(0.0),
        FieldType::Boolean => Value::Bool(false),
        FieldType::Array(_) => Value::Array(Vec::new()),
        FieldType::Object(schema) => schema.default_payload(),
        FieldType::Enum(labels) => labels
            .first()
            .map(|l| Value::String(l.clone()))
            .unwrap_or(Value::Null),
        FieldType::Null | FieldType::Any | FieldType::Nullable(_) => Value::Null,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn validate_object(schema: &Schema, payload: &Value, path: &str) -> Result<(), String> {
    let obj = payload
        .as_object()
        .ok_or_else(|| format!("{}: expected object, found {}", path, json_kind(payload)))?;
    for field in &schema.fields {
        match obj.get(&field.name) {
            Some(value) => {
                let field_path = format!("{}.{}", path, field.name);
                if value.is_null() && !field.required {
                    continue;
                }
                validate_type(&field.ty, value, &field_path)?;
            }
            None if field.required => {
                return Err(format!("{}: missing required field `{}`", path, field.name));
            }
            None => {}
        }
    }
    for key in obj.keys() {
        if schema.get(key).is_none() {
            return Err(format!("{}: unexpected field `{}`", path, key));
        }
    }
    Ok(())
}

fn validate_type(ty: &FieldType, value: &Value, path: &str) -> Result<(), String> {
    let ok = match (ty, value) {
        (FieldType::Any, _) => true,
        (FieldType::String, Value::String(_)) => true,
        (FieldType::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
        (FieldType::Number, Value::Number(_)) => true,
        (FieldType::Boolean, Value::Bool(_)) => true,
        (FieldType::Null, Value::Null) => true,
        (FieldType::Nullable(_), Value::Null) => true,
        (FieldType::Nullable(inner), v) => return validate_type(inner, v, path),
        (FieldType::Enum(labels), Value::String(s)) => {
            if !labels.contains(s) {
                return Err(format!(
                    "{}: `{}` is not one of {:?}",
                    path, s, labels
                ));
            }
            true
        }
        (FieldType::Array(inner), Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                validate_type(inner, item, &format!("{}[{}]", path, i))?;
            }
            true
        }
        (FieldType::Object(schema), v) => return validate_object(schema, v, path),
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(format!(
            "{}: expected {}, found {}",
            path,
            type_label(ty),
            json_kind(value)
        ))
    }
}

fn type_label(ty: &FieldType) -> &'static str {
    match ty {
        FieldType::String => "string",
        FieldType::Integer => "integer",
        FieldType::Number => "number",
        FieldType::Boolean => "boolean",
        FieldType::Null => "null",
        FieldType::Any => "any",
        FieldType::Array(_) => "array",
        FieldType::Object(_) => "object",
        FieldType::Enum(_) => "enum",
        FieldType::Nullable(_) => "nullable",
    }
}
