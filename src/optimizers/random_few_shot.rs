use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::Value;

use super::{Optimizer, OptimizerState};
use crate::core::context::CallContext;
use crate::core::naming::auto_name;
use crate::core::variable::Variable;
use crate::error::{OpError, OpResult};
use crate::modules::Prediction;
use crate::schema::{FieldType, Schema};

/// Schema of the variables this optimizer rewrites.
pub fn few_shot_schema() -> Schema {
    let predictions =
        FieldType::Array(Box::new(FieldType::Object(Box::new(Prediction::schema()))));
    Schema::new()
        .field("examples", predictions.clone())
        .field("predictions", predictions)
}

/// Few-shot selection from the best rewarded predictions.
///
/// Every step back-fills the batch reward into unrewarded predictions, keeps
/// the `k_best` highest rewarded ones and samples `k` of them as the new
/// `examples`.
pub struct RandomFewShot {
    state: OptimizerState,
    k: usize,
    k_best: usize,
    rng: Mutex<StdRng>,
}

impl RandomFewShot {
    pub fn new(k: usize, k_best: usize) -> OpResult<Self> {
        Self::build(k, k_best, None, StdRng::from_entropy())
    }

    /// Deterministic sampling, for reproducible runs.
    pub fn with_seed(k: usize, k_best: usize, seed: u64) -> OpResult<Self> {
        Self::build(k, k_best, None, StdRng::seed_from_u64(seed))
    }

    pub fn named(k: usize, k_best: usize, name: impl Into<String>) -> OpResult<Self> {
        Self::build(k, k_best, Some(name.into()), StdRng::from_entropy())
    }

    fn build(k: usize, k_best: usize, name: Option<String>, rng: StdRng) -> OpResult<Self> {
        if k == 0 || k_best == 0 {
            return Err(OpError::ConfigError(
                "random few-shot requires k and k_best to be positive".into(),
            ));
        }
        let name = name.unwrap_or_else(|| auto_name("random_few_shot"));
        Ok(Self {
            state: OptimizerState::new(
                name,
                Some("Samples few-shot examples among the best predictions".into()),
                few_shot_schema(),
            )?,
            k,
            k_best,
            rng: Mutex::new(rng),
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn k_best(&self) -> usize {
        self.k_best
    }

    fn select(&self, predictions: &[Prediction]) -> Vec<Prediction> {
        let mut ranked = predictions.to_vec();
        ranked.sort_by(|a, b| {
            let a = a.reward.unwrap_or(f64::NEG_INFINITY);
            let b = b.reward.unwrap_or(f64::NEG_INFINITY);
            b.total_cmp(&a)
        });
        ranked.truncate(self.k_best);
        if ranked.len() <= self.k {
            return ranked;
        }
        let mut rng = self.rng.lock();
        ranked.choose_multiple(&mut *rng, self.k).cloned().collect()
    }
}

fn predictions_of(state: &Value) -> OpResult<Vec<Prediction>> {
    let predictions = state
        .get("predictions")
        .cloned()
        .ok_or_else(|| OpError::SchemaMismatch("few-shot state has no `predictions`".into()))?;
    Ok(serde_json::from_value(predictions)?)
}

fn set_field(state: &mut Value, field: &str, value: Value) -> OpResult<()> {
    let object = state
        .as_object_mut()
        .ok_or_else(|| OpError::SchemaMismatch("few-shot state is not an object".into()))?;
    object.insert(field.to_string(), value);
    Ok(())
}

#[async_trait]
impl Optimizer for RandomFewShot {
    fn state(&self) -> &OptimizerState {
        &self.state
    }

    async fn optimize(&self, variable: &Variable, reward: f64, ctx: &CallContext) -> OpResult<()> {
        let mut state = variable.value(ctx)?;
        let mut predictions = predictions_of(&state)?;
        for prediction in predictions.iter_mut().filter(|p| p.reward.is_none()) {
            prediction.reward = Some(reward);
        }
        let examples = self.select(&predictions);
        tracing::debug!(
            variable = %variable.path(),
            predictions = predictions.len(),
            examples = examples.len(),
            "selected few-shot examples"
        );
        set_field(&mut state, "predictions", serde_json::to_value(&predictions)?)?;
        set_field(&mut state, "examples", serde_json::to_value(&examples)?)?;
        variable.assign(state, ctx)
    }

    async fn finalize(&self, variable: &Variable, ctx: &CallContext) -> OpResult<()> {
        variable.update(ctx, |state| set_field(state, "predictions", Value::Array(Vec::new())))
    }
}
