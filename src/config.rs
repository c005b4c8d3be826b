//! Engine configuration: language-model connection, retry policy and
//! training-loop settings. Loadable from TOML or the environment.

use serde::{Deserialize, Serialize};

use crate::error::{OpError, OpResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageModelConfig {
    /// `provider/model`, e.g. `openai/gpt-4o-mini`.
    pub model: String,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_retry")]
    pub retry: u32,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_retry_interval_ms")]
    pub max_retry_interval_ms: u64,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<i32>,
}

fn default_retry() -> u32 {
    5
}
fn default_retry_interval_ms() -> u64 {
    1000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_max_retry_interval_ms() -> u64 {
    60_000
}

impl LanguageModelConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_base: None,
            api_key: None,
            retry: default_retry(),
            retry_interval_ms: default_retry_interval_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_retry_interval_ms: default_max_retry_interval_ms(),
            temperature: None,
            max_tokens: None,
        }
    }

    /// Read `XLINKS_MODEL`, `OPENAI_API_KEY` and `OPENAI_BASE_URL`.
    pub fn from_env() -> OpResult<Self> {
        let model = std::env::var("XLINKS_MODEL")
            .map_err(|_| OpError::ConfigError("XLINKS_MODEL is not set".into()))?;
        let mut config = Self::new(model);
        config.api_key = std::env::var("OPENAI_API_KEY").ok();
        config.api_base = std::env::var("OPENAI_BASE_URL").ok();
        Ok(config)
    }

    /// Split `provider/model`.
    pub fn provider_and_model(&self) -> OpResult<(&str, &str)> {
        match self.model.split_once('/') {
            Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
                Ok((provider, model))
            }
            _ => Err(OpError::ConfigError(format!(
                "model `{}` must be of the form `provider/model`",
                self.model
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_epochs() -> usize {
    1
}
fn default_batch_size() -> usize {
    32
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub language_model: Option<LanguageModelConfig>,
    #[serde(default)]
    pub training: TrainingConfig,
}

impl EngineConfig {
    pub fn from_toml_str(source: &str) -> OpResult<Self> {
        toml::from_str(source).map_err(|e| OpError::ConfigError(e.to_string()))
    }
}
