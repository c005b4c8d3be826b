//! Scalar rewards comparing a program output to a reference value.

use serde_json::{Map, Value};

use crate::core::value::JsonDataModel;

pub trait Reward: Send + Sync {
    fn name(&self) -> &str;

    /// Reward in `[0, 1]` for one prediction. A missing prediction scores 0.
    fn score(&self, y_true: &JsonDataModel, y_pred: Option<&JsonDataModel>) -> f64;

    /// Mean reward over a batch. An empty batch scores 0.
    fn mean(&self, y_true: &[JsonDataModel], y_pred: &[Option<JsonDataModel>]) -> f64 {
        if y_true.is_empty() {
            return 0.0;
        }
        let total: f64 = y_true
            .iter()
            .zip(y_pred.iter().map(Option::as_ref).chain(std::iter::repeat(None)))
            .map(|(t, p)| self.score(t, p))
            .sum();
        total / y_true.len() as f64
    }
}

/// 1.0 when both payloads are equal, 0.0 otherwise.
///
/// With a mask, only the listed fields are compared.
#[derive(Debug, Clone, Default)]
pub struct ExactMatch {
    mask: Option<Vec<String>>,
}

impl ExactMatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mask(fields: Vec<String>) -> Self {
        Self { mask: Some(fields) }
    }

    fn project(&self, value: &Value) -> Value {
        match (&self.mask, value) {
            (Some(fields), Value::Object(object)) => {
                let projected: Map<String, Value> = fields
                    .iter()
                    .filter_map(|f| object.get(f).map(|v| (f.clone(), v.clone())))
                    .collect();
                Value::Object(projected)
            }
            _ => value.clone(),
        }
    }
}

impl Reward for ExactMatch {
    fn name(&self) -> &str {
        "exact_match"
    }

    fn score(&self, y_true: &JsonDataModel, y_pred: Option<&JsonDataModel>) -> f64 {
        match y_pred {
            Some(pred) if self.project(y_true.json()) == self.project(pred.json()) => 1.0,
            _ => 0.0,
        }
    }
}
