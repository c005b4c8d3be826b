//! Optimizers rewrite trainable variables from reward feedback.
//!
//! An optimizer declares a governing schema and only touches variables whose
//! schema contains it. Each [`Optimizer::apply_optimization`] bumps the
//! optimizer's own `iteration` variable before visiting the matching
//! variables.

pub mod random_few_shot;

pub use random_few_shot::RandomFewShot;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::context::CallContext;
use crate::core::variable::{validate_name, Variable};
use crate::error::{OpError, OpResult};
use crate::schema::{contains, standardize, FieldType, Schema};

/// Bookkeeping shared by every optimizer.
pub struct OptimizerState {
    name: String,
    description: Option<String>,
    schema: Schema,
    iteration: Variable,
}

impl OptimizerState {
    pub fn new(
        name: impl Into<String>,
        description: Option<String>,
        schema: Schema,
    ) -> OpResult<Self> {
        let name = name.into();
        validate_name(&name)?;
        let ctx = CallContext::new();
        let iteration = {
            let _scope = ctx.name_scope(name.clone());
            Variable::builder("iteration")
                .schema(Self::iteration_schema())
                .value(json!({ "iteration": 0 }))
                .trainable(false)
                .build(&ctx)?
        };
        Ok(Self {
            name,
            description,
            schema: standardize(&schema),
            iteration,
        })
    }

    fn iteration_schema() -> Schema {
        Schema::new().field("iteration", FieldType::Integer)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The governing schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn iteration_variable(&self) -> &Variable {
        &self.iteration
    }

    pub fn iterations(&self, ctx: &CallContext) -> OpResult<u64> {
        let value = self.iteration.value(ctx)?;
        value
            .get("iteration")
            .and_then(Value::as_u64)
            .ok_or_else(|| OpError::SchemaMismatch("optimizer iteration is not an integer".into()))
    }

    fn increment(&self, ctx: &CallContext) -> OpResult<u64> {
        let next = self.iterations(ctx)? + 1;
        self.iteration.assign(json!({ "iteration": next }), ctx)?;
        Ok(next)
    }

    /// Whether `variable` is governed by this optimizer.
    pub fn governs(&self, variable: &Variable) -> bool {
        contains(variable.schema(), &self.schema)
    }
}

#[async_trait]
pub trait Optimizer: Send + Sync {
    fn state(&self) -> &OptimizerState;

    /// Rewrite one governed variable given the batch reward.
    async fn optimize(&self, variable: &Variable, _reward: f64, _ctx: &CallContext) -> OpResult<()> {
        Err(OpError::NotImplemented(format!(
            "optimizer `{}` does not implement optimize (variable `{}`)",
            self.state().name(),
            variable.path()
        )))
    }

    /// Settle one governed variable at the end of training.
    async fn finalize(&self, variable: &Variable, _ctx: &CallContext) -> OpResult<()> {
        Err(OpError::NotImplemented(format!(
            "optimizer `{}` does not implement finalize (variable `{}`)",
            self.state().name(),
            variable.path()
        )))
    }

    async fn apply_optimization(
        &self,
        trainable_variables: &[Variable],
        reward: f64,
        ctx: &CallContext,
    ) -> OpResult<()> {
        let iteration = self.state().increment(ctx)?;
        tracing::debug!(optimizer = %self.state().name(), iteration, reward, "applying optimization");
        for variable in trainable_variables {
            if self.state().governs(variable) {
                self.optimize(variable, reward, ctx).await?;
            }
        }
        Ok(())
    }

    async fn finalize_variable_values(
        &self,
        trainable_variables: &[Variable],
        ctx: &CallContext,
    ) -> OpResult<()> {
        for variable in trainable_variables {
            if self.state().governs(variable) {
                self.finalize(variable, ctx).await?;
            }
        }
        Ok(())
    }

    /// Variables owned by the optimizer, in ordinal order.
    fn variables(&self) -> Vec<Variable> {
        vec![self.state().iteration_variable().clone()]
    }
}
