//! Scripted provider shared by unit tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::llm::{
    ChatCompletionRequest, ChatCompletionResponse, LanguageModel, LlmError, LlmProvider,
    LlmUsage, ProviderInfo, RetryPolicy, StreamChunk,
};

/// Replays queued replies in order and records every request.
pub(crate) struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<ChatCompletionRequest>>,
}

impl ScriptedProvider {
    pub(crate) fn new(replies: Vec<&str>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(str::to_string).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn push(&self, reply: &str) {
        self.replies.lock().push_back(reply.to_string());
    }

    pub(crate) fn language_model(self: &Arc<Self>) -> LanguageModel {
        LanguageModel::new("scripted-model", self.clone()).with_retry(RetryPolicy::none())
    }

    pub(crate) fn requests(&self) -> Vec<ChatCompletionRequest> {
        self.requests.lock().clone()
    }

    fn respond(&self, request: ChatCompletionRequest) -> Result<ChatCompletionResponse, LlmError> {
        self.requests.lock().push(request);
        let content = self
            .replies
            .lock()
            .pop_front()
            .ok_or_else(|| LlmError::InvalidRequest("no scripted reply left".into()))?;
        Ok(ChatCompletionResponse {
            content,
            usage: LlmUsage::default(),
            model: "scripted-model".into(),
            finish_reason: Some("stop".into()),
        })
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: "scripted".into(),
            name: "Scripted".into(),
            models: vec![],
        }
    }

    async fn chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, LlmError> {
        self.respond(request)
    }

    async fn chat_completion_stream(
        &self,
        request: ChatCompletionRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<ChatCompletionResponse, LlmError> {
        let response = self.respond(request)?;
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
