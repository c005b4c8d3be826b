use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};

use crate::llm::error::LlmError;
use crate::llm::types::{
    ChatCompletionRequest, ChatCompletionResponse, LlmUsage, ProviderInfo, StreamChunk,
};
use crate::llm::LlmProvider;

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub default_model: String,
}

/// Provider for OpenAI-compatible `/chat/completions` endpoints.
pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn build_headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", self.config.api_key);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).map_err(|e| LlmError::InvalidRequest(e.to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn build_payload(request: &ChatCompletionRequest, stream: bool) -> Value {
        let messages = request
            .messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect::<Vec<_>>();

        let mut payload = json!({
            "model": request.model,
            "messages": messages,
            "stream": stream,
        });

        if let Some(temp) = request.temperature {
            payload["temperature"] = json!(temp);
        }
        if let Some(top_p) = request.top_p {
            payload["top_p"] = json!(top_p);
        }
        if let Some(max_tokens) = request.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        if let Some(schema) = &request.response_schema {
            payload["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "structured_output",
                    "schema": schema,
                    "strict": true,
                },
            });
        }
        if stream {
            payload["stream_options"] = json!({ "include_usage": true });
        }

        payload
    }

    fn parse_usage(body: &Value) -> LlmUsage {
        let usage = body.get("usage").cloned().unwrap_or(Value::Null);
        LlmUsage {
            prompt_tokens: usage
                .get("prompt_tokens")
                .and_then(|v| v.as_i64())
                .unwrap_or(0),
            completion_tokens: usage
                .get("completion_tokens")
                .and_then(|v| v.as_i64())
                .unwrap_or(0),
            total_tokens: usage
                .get("total_tokens")
                .and_then(|v| v.as_i64())
                .unwrap_or(0),
        }
    }

    fn first_choice(body: &Value) -> Option<&Value> {
        body.get("choices")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
    }

    fn parse_response(body: &Value) -> Result<ChatCompletionResponse, LlmError> {
        let choice = Self::first_choice(body)
            .ok_or_else(|| LlmError::InvalidResponse("response has no choices".into()))?;

        let message = choice.get("message");
        if let Some(refusal) = message
            .and_then(|m| m.get("refusal"))
            .and_then(|v| v.as_str())
        {
            return Err(LlmError::InvalidResponse(format!(
                "model refused: {}",
                refusal
            )));
        }

        let content = message
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        let finish_reason = choice
            .get("finish_reason")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let model = body
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();

        Ok(ChatCompletionResponse {
            content,
            usage: Self::parse_usage(body),
            model,
            finish_reason,
        })
    }

    fn parse_stream_chunk(data: &str) -> Result<Option<StreamChunk>, LlmError> {
        if data.trim() == "[DONE]" {
            return Ok(None);
        }
        let value: Value =
            serde_json::from_str(data).map_err(|e| LlmError::SerializationError(e.to_string()))?;
        let choice = Self::first_choice(&value);
        let delta = choice
            .and_then(|c| c.get("delta"))
            .and_then(|d| d.get("content"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let finish_reason = choice
            .and_then(|c| c.get("finish_reason"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let usage = value.get("usage").map(|_| Self::parse_usage(&value));

        Ok(Some(StreamChunk {
            delta,
            finish_reason,
            usage,
        }))
    }

    fn map_error(status: u16, body: &str) -> LlmError {
        if status == 401 || status == 403 {
            return LlmError::AuthenticationError(body.to_string());
        }
        if status == 429 {
            return LlmError::RateLimitExceeded { retry_after: None };
        }
        LlmError::ApiError {
            status,
            message: body.to_string(),
        }
    }

    async fn send(
        &self,
        request: &ChatCompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let payload = Self::build_payload(request, stream);
        self.client
            .post(self.endpoint())
            .headers(self.build_headers()?)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::NetworkError(e.to_string())
                }
            })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn id(&self) -> &str {
        "openai"
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: self.id().to_string(),
            name: "OpenAI".into(),
            models: vec![],
        }
    }

    async fn chat_completion(
        &self,
        mut request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, LlmError> {
        if request.model.is_empty() {
            request.model = self.config.default_model.clone();
        }

        let response = self.send(&request, false).await?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        if !status.is_success() {
            return Err(Self::map_error(status.as_u16(), &text));
        }

        let body: Value =
            serde_json::from_str(&text).map_err(|e| LlmError::SerializationError(e.to_string()))?;
        Self::parse_response(&body)
    }

    async fn chat_completion_stream(
        &self,
        mut request: ChatCompletionRequest,
        chunk_tx: tokio::sync::mpsc::Sender<StreamChunk>,
    ) -> Result<ChatCompletionResponse, LlmError> {
        if request.model.is_empty() {
            request.model = self.config.default_model.clone();
        }

        let response = self.send(&request, true).await?;
        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .map_err(|e| LlmError::NetworkError(e.to_string()))?;
            return Err(Self::map_error(status.as_u16(), &text));
        }

        let mut stream = response.bytes_stream().eventsource();
        let mut content = String::new();
        let mut finish_reason = None;
        let mut usage = LlmUsage::default();

        while let Some(event) = stream.next().await {
            let event = event.map_err(|e| LlmError::StreamError(e.to_string()))?;
            match Self::parse_stream_chunk(&event.data)? {
                Some(chunk) => {
                    content.push_str(&chunk.delta);
                    if chunk.finish_reason.is_some() {
                        finish_reason = chunk.finish_reason.clone();
                    }
                    if let Some(u) = &chunk.usage {
                        usage = u.clone();
                    }
                    // receiver may have gone away; the aggregate is still returned
                    let _ = chunk_tx.send(chunk).await;
                }
                None => break,
            }
        }

        Ok(ChatCompletionResponse {
            content,
            usage,
            model: request.model,
            finish_reason,
        })
    }
}
