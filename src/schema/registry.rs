//! Type descriptors for registered data shapes.
//!
//! A [`DataType`] stands wherever a bare type is used: as a program input
//! declaration, or as a symbolic operand of a module call. Registration goes
//! through [`TypeRegistry`] or, for Rust structs, the [`DataModel`] trait.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{standardize, Schema};
use crate::core::value::{JsonDataModel, SymbolicDataModel};
use crate::error::{OpError, OpResult};

/// Named, canonical schema usable as a type descriptor.
#[derive(Clone, PartialEq)]
pub struct DataType {
    name: Arc<str>,
    schema: Arc<Schema>,
}

impl fmt::Debug for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataType({})", self.name)
    }
}

impl DataType {
    pub fn new(name: impl AsRef<str>, schema: &Schema) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            schema: Arc::new(standardize(schema)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Build a concrete value of this type, validating the payload.
    pub fn instantiate(&self, payload: serde_json::Value) -> OpResult<JsonDataModel> {
        self.schema.validate(&payload)?;
        Ok(JsonDataModel::with_shared_schema(self.schema.clone(), payload))
    }

    /// Detached placeholder of this type.
    pub fn symbolic(&self) -> SymbolicDataModel {
        SymbolicDataModel::new(&self.schema)
    }
}

/// Rust structs that describe a JSON data shape.
pub trait DataModel: Serialize + DeserializeOwned {
    fn type_name() -> &'static str;

    fn schema() -> Schema;

    fn data_type() -> DataType {
        DataType::new(Self::type_name(), &Self::schema())
    }

    fn to_json_data_model(&self) -> OpResult<JsonDataModel> {
        let payload = serde_json::to_value(self)?;
        Self::data_type().instantiate(payload)
    }
}

/// Name-keyed registry of data types.
#[derive(Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<String, DataType>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `schema` under `name`. Re-registering the same shape returns
    /// the existing descriptor; a different shape is rejected.
    pub fn register(&self, name: &str, schema: &Schema) -> OpResult<DataType> {
        let data_type = DataType::new(name, schema);
        let mut types = self.types.write();
        if let Some(existing) = types.get(name) {
            if existing.schema() == data_type.schema() {
                return Ok(existing.clone());
            }
            return Err(OpError::ConfigError(format!(
                "Data type `{}` is already registered with a different schema",
                name
            )));
        }
        types.insert(name.to_string(), data_type.clone());
        Ok(data_type)
    }

    pub fn register_model<T: DataModel>(&self) -> OpResult<DataType> {
        self.register(T::type_name(), &T::schema())
    }

    pub fn get(&self, name: &str) -> Option<DataType> {
        self.types.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.types.read().keys().cloned().collect();
        names.sort();
        names
    }
}
