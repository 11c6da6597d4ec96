//! OpenAI-compatible HTTP adapters
//!
//! One adapter pair covers every provider speaking the OpenAI wire shape
//! (OpenAI itself, Cerebras, and most gateways): streamed chat completions
//! over SSE and batched embeddings. Anything provider-specific above the
//! wire (schema strictness) is handled by the agent factory, not here.

use std::collections::BTreeMap;

use async_stream::stream;
use futures_util::StreamExt;
use rem_core::{RemError, RemResult};
use serde_json::{json, Value};

use crate::{
    with_backoff, ChatEvent, ChatProvider, ChatRequest, ChatStream, EmbeddingProvider,
    FinishReason, RetryPolicy, ToolCallRequest,
};
use async_trait::async_trait;

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub retry: RetryPolicy,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimensions: 1536,
            retry: RetryPolicy::default(),
        }
    }
}

impl OpenAiConfig {
    /// Load connection settings from environment variables.
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("REM_OPENAI_API_KEY").unwrap_or_default(),
            base_url: std::env::var("REM_OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            embedding_model: std::env::var("REM_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            embedding_dimensions: std::env::var("REM_EMBEDDING_DIMENSIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1536),
            retry: RetryPolicy::default(),
        }
    }
}

// ============================================================================
// CHAT
// ============================================================================

/// Streaming chat over the OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiChatProvider {
    http: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiChatProvider {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn request_body(request: &ChatRequest) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| {
                let mut obj = json!({
                    "role": m.role.as_str(),
                    "content": m.content,
                });
                if let Some(id) = &m.tool_call_id {
                    obj["tool_call_id"] = json!(id);
                }
                if let Some(name) = &m.tool_name {
                    obj["name"] = json!(name);
                }
                obj
            })
            .collect();

        let mut body = json!({
            "model": request.model.model,
            "messages": messages,
            "temperature": request.temperature,
            "stream": true,
        });

        if !request.tools.is_empty() {
            body["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect(),
            );
        }

        if let Some(schema) = &request.output_schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {"name": "output", "schema": schema, "strict": true},
            });
        }

        body
    }
}

/// Tool-call fragments accumulated across deltas, keyed by index.
#[derive(Default)]
struct ToolCallAccumulator {
    calls: BTreeMap<u64, (String, String, String)>, // index -> (id, name, arguments)
}

impl ToolCallAccumulator {
    fn absorb(&mut self, delta: &Value) {
        let Some(fragments) = delta.get("tool_calls").and_then(Value::as_array) else {
            return;
        };
        for fragment in fragments {
            let index = fragment.get("index").and_then(Value::as_u64).unwrap_or(0);
            let entry = self.calls.entry(index).or_default();
            if let Some(id) = fragment.get("id").and_then(Value::as_str) {
                entry.0.push_str(id);
            }
            if let Some(function) = fragment.get("function") {
                if let Some(name) = function.get("name").and_then(Value::as_str) {
                    entry.1.push_str(name);
                }
                if let Some(arguments) = function.get("arguments").and_then(Value::as_str) {
                    entry.2.push_str(arguments);
                }
            }
        }
    }

    fn drain(&mut self) -> Vec<ToolCallRequest> {
        std::mem::take(&mut self.calls)
            .into_values()
            .map(|(id, name, arguments)| ToolCallRequest {
                id,
                name,
                arguments: serde_json::from_str(&arguments).unwrap_or(Value::Null),
            })
            .collect()
    }
}

#[async_trait]
impl ChatProvider for OpenAiChatProvider {
    async fn stream_chat(&self, request: ChatRequest) -> RemResult<ChatStream> {
        let provider = request.model.provider.clone();
        let url = format!("{}/chat/completions", self.config.base_url);
        let body = Self::request_body(&request);

        let http = self.http.clone();
        let api_key = self.config.api_key.clone();
        let retry = self.config.retry;

        // Open the connection with retries; stream body failures are
        // surfaced inline (a half-delivered stream cannot be retried).
        let provider_for_open = provider.clone();
        let response = with_backoff(retry, "chat_completions", || {
            let http = http.clone();
            let url = url.clone();
            let api_key = api_key.clone();
            let body = body.clone();
            let provider = provider_for_open.clone();
            async move {
                let response = http
                    .post(&url)
                    .bearer_auth(&api_key)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| RemError::provider(&provider, e.to_string()))?;
                let status = response.status();
                if !status.is_success() {
                    let detail = response.text().await.unwrap_or_default();
                    return Err(RemError::provider(
                        &provider,
                        format!("status {status}: {detail}"),
                    ));
                }
                Ok(response)
            }
        })
        .await?;

        let stream = stream! {
            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();
            let mut tool_calls = ToolCallAccumulator::default();
            let mut finished = false;

            'outer: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(RemError::provider(&provider, e.to_string()));
                        break;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        if !finished {
                            yield Ok(ChatEvent::Done { finish_reason: FinishReason::Stop });
                        }
                        break 'outer;
                    }
                    let Ok(parsed) = serde_json::from_str::<Value>(data) else {
                        continue;
                    };
                    let Some(choice) = parsed
                        .get("choices")
                        .and_then(Value::as_array)
                        .and_then(|c| c.first())
                    else {
                        continue;
                    };

                    if let Some(delta) = choice.get("delta") {
                        if let Some(content) = delta.get("content").and_then(Value::as_str) {
                            if !content.is_empty() {
                                yield Ok(ChatEvent::ContentDelta(content.to_string()));
                            }
                        }
                        if let Some(reasoning) =
                            delta.get("reasoning_content").and_then(Value::as_str)
                        {
                            if !reasoning.is_empty() {
                                yield Ok(ChatEvent::Reasoning(reasoning.to_string()));
                            }
                        }
                        tool_calls.absorb(delta);
                    }

                    if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
                        let finish_reason = match reason {
                            "tool_calls" => {
                                for call in tool_calls.drain() {
                                    yield Ok(ChatEvent::ToolCall(call));
                                }
                                FinishReason::ToolCalls
                            }
                            "length" => FinishReason::Length,
                            _ => FinishReason::Stop,
                        };
                        finished = true;
                        yield Ok(ChatEvent::Done { finish_reason });
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    fn provider_name(&self) -> &str {
        "openai"
    }
}

// ============================================================================
// EMBEDDINGS
// ============================================================================

/// Batched embeddings over the OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbeddingProvider {
    http: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiEmbeddingProvider {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> RemResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embeddings", self.config.base_url);
        let http = self.http.clone();
        let api_key = self.config.api_key.clone();
        let body = json!({
            "input": texts,
            "model": self.config.embedding_model,
        });

        let response: Value = with_backoff(self.config.retry, "embeddings", || {
            let http = http.clone();
            let url = url.clone();
            let api_key = api_key.clone();
            let body = body.clone();
            async move {
                let response = http
                    .post(&url)
                    .bearer_auth(&api_key)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| RemError::provider("openai", e.to_string()))?;
                let status = response.status();
                if !status.is_success() {
                    let detail = response.text().await.unwrap_or_default();
                    return Err(RemError::provider(
                        "openai",
                        format!("status {status}: {detail}"),
                    ));
                }
                response
                    .json()
                    .await
                    .map_err(|e| RemError::provider("openai", e.to_string()))
            }
        })
        .await?;

        let data = response
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| RemError::provider("openai", "missing data array"))?;

        let mut vectors = Vec::with_capacity(data.len());
        for item in data {
            let embedding = item
                .get("embedding")
                .and_then(Value::as_array)
                .ok_or_else(|| RemError::provider("openai", "missing embedding"))?;
            vectors.push(
                embedding
                    .iter()
                    .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                    .collect(),
            );
        }

        if vectors.len() != texts.len() {
            return Err(RemError::provider(
                "openai",
                format!("expected {} vectors, got {}", texts.len(), vectors.len()),
            ));
        }

        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.config.embedding_dimensions
    }

    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_id(&self) -> &str {
        &self.config.embedding_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatMessage;

    #[test]
    fn test_request_body_shape() {
        let request = ChatRequest::new(
            "openai:gpt-4.1".parse().unwrap(),
            vec![ChatMessage::system("be brief"), ChatMessage::user("hi")],
        );
        let body = OpenAiChatProvider::request_body(&request);
        assert_eq!(body["model"], "gpt-4.1");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_tool_call_accumulator_merges_fragments() {
        let mut acc = ToolCallAccumulator::default();
        acc.absorb(&json!({
            "tool_calls": [{"index": 0, "id": "call_1", "function": {"name": "rem_query", "arguments": "{\"query"}}]
        }));
        acc.absorb(&json!({
            "tool_calls": [{"index": 0, "function": {"arguments": "\": \"LOOKUP a\"}"}}]
        }));
        let calls = acc.drain();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name, "rem_query");
        assert_eq!(calls[0].arguments["query"], "LOOKUP a");
    }
}
