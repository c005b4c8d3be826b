#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use xlinks::llm::{
    ChatCompletionRequest, ChatCompletionResponse, LlmError, LlmProvider, LlmUsage, ProviderInfo,
    StreamChunk,
};
use xlinks::{LanguageModel, RetryPolicy};

/// Route engine logs to the test writer; filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

type Responder = dyn Fn(&ChatCompletionRequest) -> String + Send + Sync;

/// Answers each request with a reply computed from it, and records requests.
pub struct MockProvider {
    respond: Box<Responder>,
    requests: Mutex<Vec<ChatCompletionRequest>>,
}

impl MockProvider {
    pub fn new(
        respond: impl Fn(&ChatCompletionRequest) -> String + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn language_model(self: &Arc<Self>) -> Arc<LanguageModel> {
        Arc::new(LanguageModel::new("mock-model", self.clone()).with_retry(RetryPolicy::none()))
    }

    pub fn requests(&self) -> Vec<ChatCompletionRequest> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

/// The user message of a request, which carries the input payload.
pub fn user_message(request: &ChatCompletionRequest) -> &str {
    request
        .messages
        .last()
        .map(|m| m.content.as_str())
        .unwrap_or_default()
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn id(&self) -> &str {
        "mock"
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: "mock".into(),
            name: "Mock".into(),
            models: vec![],
        }
    }

    async fn chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, LlmError> {
        let content = (self.respond)(&request);
        self.requests.lock().push(request);
        Ok(ChatCompletionResponse {
            content,
            usage: LlmUsage::default(),
            model: "mock-model".into(),
            finish_reason: Some("stop".into()),
        })
    }

    async fn chat_completion_stream(
        &self,
        request: ChatCompletionRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<ChatCompletionResponse, LlmError> {
        let response = self.chat_completion(request).await?;
        let _ = chunk_tx
            .send(StreamChunk {
                delta: response.content.clone(),
                finish_reason: response.finish_reason.clone(),
                usage: None,
            })
            .await;
        Ok(response)
    }
}
