use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::error::LlmError;
use super::types::{ChatCompletionRequest, ChatMessage, CompletionOptions};
use super::{LlmProvider, LlmProviderRegistry};
use crate::config::LanguageModelConfig;
use crate::core::context::CallContext;
use crate::error::{OpError, OpResult};
use crate::schema::Schema;

/// Exponential backoff between attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub interval_ms: u64,
    pub backoff_multiplier: f64,
    pub max_interval_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            interval_ms: 1000,
            backoff_multiplier: 2.0,
            max_interval_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(retry as i32);
        let ms = (self.interval_ms as f64 * factor).min(self.max_interval_ms as f64);
        Duration::from_millis(ms as u64)
    }
}

impl From<&LanguageModelConfig> for RetryPolicy {
    fn from(config: &LanguageModelConfig) -> Self {
        Self {
            max_retries: config.retry,
            interval_ms: config.retry_interval_ms,
            backoff_multiplier: config.backoff_multiplier,
            max_interval_ms: config.max_retry_interval_ms,
        }
    }
}

/// A model behind a provider, returning validated JSON replies.
pub struct LanguageModel {
    model: String,
    provider: Arc<dyn LlmProvider>,
    retry: RetryPolicy,
    options: CompletionOptions,
}

impl std::fmt::Debug for LanguageModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguageModel")
            .field("provider", &self.provider.id())
            .field("model", &self.model)
            .finish()
    }
}

impl LanguageModel {
    pub fn new(model: impl Into<String>, provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            model: model.into(),
            provider,
            retry: RetryPolicy::default(),
            options: CompletionOptions::default(),
        }
    }

    /// Resolve `provider/model` against a registry.
    pub fn from_registry(registry: &LlmProviderRegistry, model: &str) -> OpResult<Self> {
        let config = LanguageModelConfig::new(model);
        let (provider_id, model_name) = config.provider_and_model()?;
        let provider = registry
            .get(provider_id)
            .ok_or_else(|| LlmError::ProviderNotFound(provider_id.to_string()))?;
        Ok(Self::new(model_name, provider))
    }

    /// Build an OpenAI-compatible model from configuration.
    #[cfg(feature = "openai-provider")]
    pub fn from_config(config: &LanguageModelConfig) -> OpResult<Self> {
        let (_, model_name) = config.provider_and_model()?;
        let api_key = config.api_key.clone().ok_or_else(|| {
            OpError::ConfigError(format!("no API key configured for `{}`", config.model))
        })?;
        let provider = super::provider::OpenAiProvider::new(super::provider::OpenAiConfig {
            api_key,
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".into()),
            default_model: model_name.to_string(),
        });
        Ok(Self::new(model_name, Arc::new(provider))
            .with_retry(RetryPolicy::from(config))
            .with_options(CompletionOptions {
                temperature: config.temperature,
                top_p: None,
                max_tokens: config.max_tokens,
            }))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send `messages` and return the reply.
    ///
    /// With a schema, the reply is the parsed JSON object validated against
    /// it; streaming is ignored. Without one, the reply is
    /// `{"role": "assistant", "content": ...}`, and with `streaming` set its
    /// chunks are forwarded to the context's stream sink as they arrive
    /// (see [`CallContext::with_stream_sink`]). Transient failures and
    /// malformed replies are retried; past the retry budget the last failure
    /// is returned as [`LlmError::RetriesExhausted`].
    pub async fn call(
        &self,
        messages: &[ChatMessage],
        schema: Option<&Schema>,
        streaming: bool,
        options: Option<&CompletionOptions>,
        ctx: &CallContext,
    ) -> OpResult<Value> {
        if ctx.is_bare_symbolic() {
            return Err(OpError::ScopeError(
                "language model calls are not allowed during schema inference".into(),
            ));
        }

        let mut request = ChatCompletionRequest::new(self.model.clone(), messages.to_vec())
            .with_options(options.unwrap_or(&self.options));
        request.response_schema = schema.map(Schema::to_json_schema);
        request.stream = streaming && schema.is_none();

        let attempts = self.retry.max_retries + 1;
        let mut last_error = LlmError::InvalidRequest("no attempt was made".into());
        for attempt in 0..attempts {
            match self.attempt(&request, schema, ctx).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => {
                    tracing::warn!(
                        model = %self.model,
                        attempt = attempt + 1,
                        attempts,
                        error = %err,
                        "language model call failed"
                    );
                    if attempt + 1 < attempts {
                        tokio::time::sleep(self.retry.delay(attempt)).await;
                    }
                    last_error = err;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(LlmError::RetriesExhausted {
            attempts,
            last_error: Box::new(last_error),
        }
        .into())
    }

    async fn attempt(
        &self,
        request: &ChatCompletionRequest,
        schema: Option<&Schema>,
        ctx: &CallContext,
    ) -> Result<Value, LlmError> {
        let response = if request.stream {
            let (tx, mut rx) = mpsc::channel(64);
            let sink = ctx.stream_sink();
            let drain = async {
                let mut chunks = 0usize;
                while let Some(chunk) = rx.recv().await {
                    chunks += 1;
                    if let Some(sink) = sink {
                        // a closed sink only stops forwarding
                        let _ = sink.send(chunk).await;
                    }
                }
                chunks
            };
            let (response, chunks) =
                tokio::join!(self.provider.chat_completion_stream(request.clone(), tx), drain);
            tracing::debug!(model = %self.model, chunks, "stream finished");
            response?
        } else {
            self.provider.chat_completion(request.clone()).await?
        };

        match schema {
            None => Ok(json!({ "role": "assistant", "content": response.content })),
            Some(schema) => {
                let value = parse_json_reply(&response.content)?;
                schema
                    .validate(&value)
                    .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
                Ok(value)
            }
        }
    }
}

/// Parse a JSON object reply, tolerating a surrounding markdown code fence.
pub fn parse_json_reply(content: &str) -> Result<Value, LlmError> {
    let trimmed = content.trim();
    let body = match trimmed.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.strip_prefix("json").unwrap_or(rest);
            rest.strip_suffix("```").unwrap_or(rest).trim()
        }
        None => trimmed,
    };
    let value: Value = serde_json::from_str(body)
        .map_err(|e| LlmError::InvalidResponse(format!("reply is not valid JSON: {}", e)))?;
    if !value.is_object() {
        return Err(LlmError::InvalidResponse(
            "reply is not a JSON object".into(),
        ));
    }
    Ok(value)
}
