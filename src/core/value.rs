//! Value representations: concrete JSON values, symbolic placeholders and the
//! [`Data`] sum type that module dispatch inspects.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{OpError, OpResult};
use crate::program::node::History;
use crate::schema::{merged_field_names, schema_of, standardize, DataType, Schema};

/// A schema paired with a payload that validates against it.
#[derive(Clone, PartialEq)]
pub struct JsonDataModel {
    schema: Arc<Schema>,
    value: Value,
}

impl fmt::Debug for JsonDataModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JsonDataModel({})", self.value)
    }
}

impl JsonDataModel {
    /// Validate `value` against `schema` (standardized first).
    pub fn new(schema: &Schema, value: Value) -> OpResult<Self> {
        let schema = standardize(schema);
        schema.validate(&value)?;
        Ok(Self {
            schema: Arc::new(schema),
            value,
        })
    }

    /// Wrap a JSON object, inferring its schema.
    pub fn from_value(value: Value) -> OpResult<Self> {
        let schema = schema_of(&value)?;
        Ok(Self {
            schema: Arc::new(schema),
            value,
        })
    }

    pub(crate) fn with_shared_schema(schema: Arc<Schema>, value: Value) -> Self {
        Self { schema, value }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn json(&self) -> &Value {
        &self.value
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.value.get(field)
    }

    pub fn into_json(self) -> Value {
        self.value
    }

    /// Placeholder of the same shape, detached from any graph.
    pub fn to_symbolic(&self) -> SymbolicDataModel {
        SymbolicDataModel {
            schema: self.schema.clone(),
            history: None,
        }
    }

    pub fn deserialize<T: DeserializeOwned>(&self) -> OpResult<T> {
        Ok(serde_json::from_value(self.value.clone())?)
    }
}

/// A schema with no payload, standing in for a value not yet computed.
///
/// Placeholders produced by module calls carry the [`History`] of the node
/// that produced them so a program can walk back to its inputs.
#[derive(Clone)]
pub struct SymbolicDataModel {
    schema: Arc<Schema>,
    history: Option<History>,
}

impl fmt::Debug for SymbolicDataModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolicDataModel")
            .field("fields", &self.schema.field_names())
            .field("history", &self.history)
            .finish()
    }
}

/// Placeholders compare by shape only.
impl PartialEq for SymbolicDataModel {
    fn eq(&self, other: &Self) -> bool {
        self.schema == other.schema
    }
}

impl SymbolicDataModel {
    pub fn new(schema: &Schema) -> Self {
        Self {
            schema: Arc::new(standardize(schema)),
            history: None,
        }
    }

    pub(crate) fn with_history(schema: Schema, history: History) -> Self {
        Self {
            schema: Arc::new(standardize(&schema)),
            history: Some(history),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn history(&self) -> Option<&History> {
        self.history.as_ref()
    }
}

/// Operand of a module call: a type descriptor, a placeholder or a concrete value.
#[derive(Debug, Clone)]
pub enum Data {
    Type(DataType),
    Symbolic(SymbolicDataModel),
    Json(JsonDataModel),
}

impl Data {
    pub fn schema(&self) -> &Schema {
        match self {
            Data::Type(ty) => ty.schema(),
            Data::Symbolic(s) => s.schema(),
            Data::Json(j) => j.schema(),
        }
    }

    /// True for type descriptors and placeholders.
    pub fn is_symbolic(&self) -> bool {
        !matches!(self, Data::Json(_))
    }

    pub fn as_json(&self) -> Option<&JsonDataModel> {
        match self {
            Data::Json(j) => Some(j),
            _ => None,
        }
    }

    pub fn into_json(self) -> Option<JsonDataModel> {
        match self {
            Data::Json(j) => Some(j),
            _ => None,
        }
    }

    pub fn as_symbolic(&self) -> Option<&SymbolicDataModel> {
        match self {
            Data::Symbolic(s) => Some(s),
            _ => None,
        }
    }

    /// Placeholder view of this operand. Type descriptors become detached
    /// placeholders.
    pub fn to_symbolic(&self) -> SymbolicDataModel {
        match self {
            Data::Type(ty) => ty.symbolic(),
            Data::Symbolic(s) => s.clone(),
            Data::Json(j) => j.to_symbolic(),
        }
    }
}

impl From<DataType> for Data {
    fn from(value: DataType) -> Self {
        Data::Type(value)
    }
}

impl From<SymbolicDataModel> for Data {
    fn from(value: SymbolicDataModel) -> Self {
        Data::Symbolic(value)
    }
}

impl From<JsonDataModel> for Data {
    fn from(value: JsonDataModel) -> Self {
        Data::Json(value)
    }
}

/// Merge concrete values field by field, renaming collisions the same way as
/// [`concat_schemas`](crate::schema::concat_schemas).
pub fn concat_values(values: &[&JsonDataModel]) -> OpResult<JsonDataModel> {
    let schemas: Vec<&Schema> = values.iter().map(|v| v.schema()).collect();
    let names = merged_field_names(&schemas);
    let merged_schema = crate::schema::concat_schemas(&schemas);

    let mut payload = Map::new();
    for (value, renames) in values.iter().zip(names) {
        let obj = value.json().as_object().ok_or_else(|| {
            OpError::SchemaMismatch("concat operands must be JSON objects".into())
        })?;
        for (original, merged) in renames {
            if let Some(field) = obj.get(&original) {
                payload.insert(merged, field.clone());
            }
        }
    }
    Ok(JsonDataModel::with_shared_schema(
        Arc::new(merged_schema),
        Value::Object(payload),
    ))
}
