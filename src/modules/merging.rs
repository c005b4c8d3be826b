//! Multi-input merge modules.
//!
//! | kind     | all present | some None        | all None |
//! |----------|-------------|------------------|----------|
//! | `Concat` | merge       | fails            | fails    |
//! | `And`    | merge       | None             | None     |
//! | `Or`     | merge       | merge of present | None     |

use async_trait::async_trait;

use crate::core::context::CallContext;
use crate::core::naming::auto_name;
use crate::core::value::{concat_values, JsonDataModel};
use crate::error::{OpError, OpResult};
use crate::modules::Module;
use crate::schema::{concat_schemas, Schema};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeKind {
    Concat,
    And,
    Or,
}

impl MergeKind {
    pub fn op_name(&self) -> &'static str {
        match self {
            MergeKind::Concat => "concat",
            MergeKind::And => "logical_and",
            MergeKind::Or => "logical_or",
        }
    }

    /// Output schema for `schemas`, `None` when the merge yields nothing.
    pub fn merge_schemas(&self, schemas: &[Option<&Schema>]) -> OpResult<Option<Schema>> {
        let present: Vec<&Schema> = schemas.iter().flatten().copied().collect();
        match self {
            MergeKind::Concat => {
                if let Some(index) = schemas.iter().position(Option::is_none) {
                    return Err(OpError::IncompatibleMerge {
                        op: self.op_name().into(),
                        index,
                    });
                }
            }
            MergeKind::And => {
                if present.len() != schemas.len() {
                    return Ok(None);
                }
            }
            MergeKind::Or => {}
        }
        if present.is_empty() {
            return Ok(None);
        }
        Ok(Some(concat_schemas(&present)))
    }

    /// Concrete merge following the same table.
    pub fn merge_values(&self, values: &[Option<&JsonDataModel>]) -> OpResult<Option<JsonDataModel>> {
        let present: Vec<&JsonDataModel> = values.iter().flatten().copied().collect();
        match self {
            MergeKind::Concat => {
                if let Some(index) = values.iter().position(Option::is_none) {
                    return Err(OpError::IncompatibleMerge {
                        op: self.op_name().into(),
                        index,
                    });
                }
            }
            MergeKind::And => {
                if present.len() != values.len() {
                    return Ok(None);
                }
            }
            MergeKind::Or => {}
        }
        if present.is_empty() {
            return Ok(None);
        }
        concat_values(&present).map(Some)
    }
}

/// Merge module usable as a program node.
pub struct Merge {
    name: String,
    kind: MergeKind,
}

impl Merge {
    pub fn new(kind: MergeKind) -> Self {
        Self {
            name: auto_name(kind.op_name()),
            kind,
        }
    }

    pub fn concat() -> Self {
        Self::new(MergeKind::Concat)
    }

    pub fn and() -> Self {
        Self::new(MergeKind::And)
    }

    pub fn or() -> Self {
        Self::new(MergeKind::Or)
    }

    pub fn kind(&self) -> MergeKind {
        self.kind
    }
}

#[async_trait]
impl Module for Merge {
    fn name(&self) -> &str {
        &self.name
    }

    fn compute_output_spec(
        &self,
        input_schemas: &[Option<Schema>],
        _ctx: &CallContext,
    ) -> OpResult<Vec<Option<Schema>>> {
        let schemas: Vec<Option<&Schema>> = input_schemas.iter().map(Option::as_ref).collect();
        Ok(vec![self.kind.merge_schemas(&schemas)?])
    }

    async fn call(
        &self,
        inputs: Vec<Option<JsonDataModel>>,
        _ctx: &CallContext,
    ) -> OpResult<Vec<Option<JsonDataModel>>> {
        let values: Vec<Option<&JsonDataModel>> = inputs.iter().map(Option::as_ref).collect();
        Ok(vec![self.kind.merge_values(&values)?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn value(v: serde_json::Value) -> JsonDataModel {
        JsonDataModel::from_value(v).unwrap()
    }

    #[test]
    fn test_merge_table_values() {
        let a = value(json!({"foo": "a"}));
        let b = value(json!({"bar": "b"}));

        let both = MergeKind::And.merge_values(&[Some(&a), Some(&b)]).unwrap().unwrap();
        assert_eq!(both.json(), &json!({"foo": "a", "bar": "b"}));
        assert!(MergeKind::And.merge_values(&[Some(&a), None]).unwrap().is_none());
        assert!(MergeKind::And.merge_values(&[None, None]).unwrap().is_none());

        let either = MergeKind::Or.merge_values(&[None, Some(&b)]).unwrap().unwrap();
        assert_eq!(either.json(), &json!({"bar": "b"}));
        assert!(MergeKind::Or.merge_values(&[None, None]).unwrap().is_none());

        let err = MergeKind::Concat.merge_values(&[Some(&a), None]).unwrap_err();
        assert!(matches!(err, OpError::IncompatibleMerge { index: 1, .. }));
        let err = MergeKind::Concat.merge_values(&[None, None]).unwrap_err();
        assert!(matches!(err, OpError::IncompatibleMerge { index: 0, .. }));
    }

    #[test]
    fn test_merge_table_schemas() {
        let a = a_schema();
        let b = Schema::new().field("bar", crate::schema::FieldType::String);
        assert!(MergeKind::Or
            .merge_schemas(&[Some(&a), None])
            .unwrap()
            .is_some());
        assert!(MergeKind::And
            .merge_schemas(&[Some(&a), None])
            .unwrap()
            .is_none());
        assert_eq!(
            MergeKind::Concat
                .merge_schemas(&[Some(&a), Some(&b)])
                .unwrap()
                .unwrap()
                .field_names(),
            vec!["foo", "bar"]
        );
        assert!(MergeKind::Concat.merge_schemas(&[None, Some(&b)]).is_err());
    }

    fn a_schema() -> Schema {
        Schema::new().field("foo", crate::schema::FieldType::String)
    }

    #[tokio::test]
    async fn test_merge_module_checks_runtime_shapes() {
        let module = crate::modules::ModuleHandle::new(Merge::or());
        let ctx = CallContext::new();
        let b = value(json!({"bar": "b"}));
        let out = module.forward(vec![None, Some(b)], &ctx).await.unwrap();
        assert_eq!(out[0].as_ref().unwrap().json(), &json!({"bar": "b"}));
    }
}
