//! Language-model adapter.
//!
//! [`LlmProvider`] is the transport seam (one implementation per backend);
//! [`LanguageModel`] sits on top of it and turns a message list plus an
//! optional output [`Schema`](crate::schema::Schema) into a validated JSON
//! reply, retrying transient failures.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub mod error;
pub mod language_model;
pub mod provider;
pub mod types;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn id(&self) -> &str;
    fn info(&self) -> types::ProviderInfo;

    async fn chat_completion(
        &self,
        request: types::ChatCompletionRequest,
    ) -> Result<types::ChatCompletionResponse, error::LlmError>;

    async fn chat_completion_stream(
        &self,
        request: types::ChatCompletionRequest,
        chunk_tx: mpsc::Sender<types::StreamChunk>,
    ) -> Result<types::ChatCompletionResponse, error::LlmError>;
}

pub struct LlmProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
}

impl LlmProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(provider_id).cloned()
    }

    pub fn list(&self) -> Vec<ProviderInfo> {
        self.providers.values().map(|p| p.info()).collect()
    }

    /// Registry with the providers that can be configured from the environment.
    pub fn with_builtins() -> Self {
        #[allow(unused_mut)]
        let mut reg = Self::new();
        #[cfg(feature = "openai-provider")]
        if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
            let base_url = std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into());
            reg.register(Arc::new(provider::OpenAiProvider::new(
                provider::OpenAiConfig {
                    api_key,
                    base_url,
                    default_model: "gpt-4o-mini".into(),
                },
            )));
        }
        reg
    }
}

impl Default for LlmProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub use error::LlmError;
pub use language_model::{LanguageModel, RetryPolicy};
#[cfg(feature = "openai-provider")]
pub use provider::{OpenAiConfig, OpenAiProvider};
pub use types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChatRole, CompletionOptions,
    LlmUsage, ModelInfo, ProviderInfo, StreamChunk,
};
