//! Reward-driven training loop over a compiled program.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::TrainingConfig;
use crate::core::context::CallContext;
use crate::core::value::JsonDataModel;
use crate::error::{OpError, ProgramResult};
use crate::optimizers::Optimizer;
use crate::program::Program;
use crate::rewards::Reward;

/// Mean reward of every epoch, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingHistory {
    pub rewards: Vec<f64>,
}

impl TrainingHistory {
    pub fn last(&self) -> Option<f64> {
        self.rewards.last().copied()
    }
}

/// Binds a program to a reward and an optimizer.
pub struct Trainer {
    program: Program,
    reward: Arc<dyn Reward>,
    optimizer: Arc<dyn Optimizer>,
}

impl Trainer {
    pub fn new(
        program: Program,
        reward: impl Reward + 'static,
        optimizer: impl Optimizer + 'static,
    ) -> Self {
        Self {
            program,
            reward: Arc::new(reward),
            optimizer: Arc::new(optimizer),
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn optimizer(&self) -> &dyn Optimizer {
        self.optimizer.as_ref()
    }

    /// Train on `(x, y)` pairs.
    ///
    /// Each batch runs in training mode so generators log their predictions,
    /// then the batch mean reward is handed to the optimizer. Variables are
    /// finalized once after the last epoch.
    pub async fn fit(
        &self,
        x: &[JsonDataModel],
        y: &[JsonDataModel],
        config: &TrainingConfig,
    ) -> ProgramResult<TrainingHistory> {
        check_dataset(x, y)?;
        if config.batch_size == 0 {
            return Err(OpError::ConfigError("batch_size must be positive".into()).into());
        }

        let mut rng = config.seed.map(StdRng::seed_from_u64);
        let mut order: Vec<usize> = (0..x.len()).collect();
        let mut history = TrainingHistory::default();
        let ctx = CallContext::training();

        for epoch in 0..config.epochs {
            if let Some(rng) = rng.as_mut() {
                order.shuffle(rng);
            }
            let mut total = 0.0;
            for batch in order.chunks(config.batch_size) {
                let mut truths = Vec::with_capacity(batch.len());
                let mut predictions = Vec::with_capacity(batch.len());
                for &i in batch {
                    predictions.push(self.program.run_one(x[i].clone(), &ctx).await?);
                    truths.push(y[i].clone());
                }
                let reward = self.reward.mean(&truths, &predictions);
                total += reward * batch.len() as f64;
                self.optimizer
                    .apply_optimization(&self.program.trainable_variables(), reward, &ctx)
                    .await?;
            }
            let mean = if x.is_empty() { 0.0 } else { total / x.len() as f64 };
            tracing::info!(epoch = epoch + 1, epochs = config.epochs, reward = mean, "epoch finished");
            history.rewards.push(mean);
        }

        self.optimizer
            .finalize_variable_values(&self.program.trainable_variables(), &CallContext::new())
            .await?;
        Ok(history)
    }

    /// Mean reward over `(x, y)` without logging predictions.
    pub async fn evaluate(&self, x: &[JsonDataModel], y: &[JsonDataModel]) -> ProgramResult<f64> {
        check_dataset(x, y)?;
        let ctx = CallContext::new();
        let mut predictions = Vec::with_capacity(x.len());
        for input in x {
            predictions.push(self.program.run_one(input.clone(), &ctx).await?);
        }
        Ok(self.reward.mean(y, &predictions))
    }
}

fn check_dataset(x: &[JsonDataModel], y: &[JsonDataModel]) -> ProgramResult<()> {
    if x.len() != y.len() {
        return Err(OpError::ConfigError(format!(
            "dataset has {} inputs but {} targets",
            x.len(),
            y.len()
        ))
        .into());
    }
    Ok(())
}
