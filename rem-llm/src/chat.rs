//! Chat provider trait and streamed event types

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use rem_core::{MessageRole, RemResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ModelRef;

/// One message in a chat request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    /// Tool-call id this message responds to (tool role only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool name for tool-result messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::of(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::of(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::of(MessageRole::Assistant, content)
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_name: Some(tool_name.into()),
        }
    }

    fn of(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_name: None,
        }
    }
}

/// A tool exposed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub parameters: Value,
}

/// A chat completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: ModelRef,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    /// Output contract; when set the provider is asked for JSON conforming
    /// to this schema and the final text parses as the structured output.
    pub output_schema: Option<Value>,
    pub temperature: f32,
}

impl ChatRequest {
    pub fn new(model: ModelRef, messages: Vec<ChatMessage>) -> Self {
        Self {
            model,
            messages,
            tools: Vec::new(),
            output_schema: None,
            temperature: 0.0,
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Why a stream terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Error,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::Length => "length",
            FinishReason::Error => "error",
        }
    }
}

/// One event in a streamed chat completion, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Text content delta.
    ContentDelta(String),
    /// Internal rationale emitted by reasoning models.
    Reasoning(String),
    /// The model requests a tool invocation.
    ToolCall(ToolCallRequest),
    /// Terminal event.
    Done { finish_reason: FinishReason },
}

/// Boxed stream of chat events.
pub type ChatStream = Pin<Box<dyn Stream<Item = RemResult<ChatEvent>> + Send>>;

/// Async trait for streaming chat providers.
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Open a streamed completion for the request.
    async fn stream_chat(&self, request: ChatRequest) -> RemResult<ChatStream>;

    /// Provider label used in errors and logs.
    fn provider_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let msg = ChatMessage::tool_result("call_1", "rem_query", "{}");
        assert_eq!(msg.role, MessageRole::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));

        let msg = ChatMessage::user("hello");
        assert!(msg.tool_call_id.is_none());
    }

    #[test]
    fn test_finish_reason_serde() {
        let json = serde_json::to_string(&FinishReason::ToolCalls).unwrap();
        assert_eq!(json, "\"tool_calls\"");
    }
}
