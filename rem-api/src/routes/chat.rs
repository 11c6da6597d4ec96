//! OpenAI-compatible chat completions
//!
//! Headers map to the agent context (`X-User-Id`, `X-Tenant-Id`,
//! `X-Session-Id`, `X-Model-Name`, `X-Agent-Schema`); the body's `model`
//! applies when no header override is present. Session history is always
//! loaded with compression when a session id is supplied, and the new
//! turns plus the final assistant output are persisted on completion.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use rem_context::RequestScope;
use rem_core::MessageRole;
use rem_llm::ChatMessage;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::routes::agent_context;
use crate::streaming::{orchestrate, sse_response};
use crate::{ApiError, ApiResult, AppState};

/// Default agent schema when no header selects one.
const DEFAULT_AGENT_SCHEMA: &str = "rem";

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<IncomingMessage>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub role: String,
    pub content: String,
}

pub async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ChatCompletionRequest>,
) -> ApiResult<Response> {
    let mut context = agent_context(&headers);
    if context.model.is_none() {
        context.model = body.model.as_deref().and_then(|m| m.parse().ok());
    }
    let schema = context
        .agent_schema
        .clone()
        .unwrap_or_else(|| DEFAULT_AGENT_SCHEMA.to_string());

    let new_turns: Vec<ChatMessage> = body
        .messages
        .iter()
        .map(|m| ChatMessage {
            role: m.role.parse().unwrap_or(MessageRole::User),
            content: m.content.clone(),
            tool_call_id: None,
            tool_name: None,
        })
        .collect();
    if new_turns.is_empty() {
        return Err(ApiError::bad_request("messages must not be empty"));
    }

    let agent = state.factory.create(&schema, context.clone()).await?;
    let model_label = agent.model().to_string();

    let scope = RequestScope {
        tenant_id: context.tenant_id.clone(),
        user_id: context.user_id.clone(),
        session_id: context.session_id.clone(),
    };
    let assembled = state
        .assembler(&scope.tenant_id)
        .assemble(&scope, Some(agent.system_prompt()), new_turns.clone())
        .await?;

    let request_id = format!("chatcmpl-{}", Uuid::now_v7().simple());

    if body.stream {
        let store = state.session_store(&scope.tenant_id);
        let frames = orchestrate(
            agent,
            assembled,
            new_turns,
            Some(store),
            scope,
            request_id,
            model_label,
        );
        return Ok(sse_response(frames).into_response());
    }

    // Non-streaming: run to completion and return one JSON body.
    let result = agent.run(assembled).await?;

    if let Some(session_id) = &scope.session_id {
        let mut turns = new_turns;
        if !result.text.is_empty() {
            turns.push(ChatMessage::assistant(result.text.clone()));
        }
        state
            .session_store(&scope.tenant_id)
            .store_turns(session_id, scope.user_id.as_deref(), &turns)
            .await?;
    }

    Ok(Json(json!({
        "id": request_id,
        "object": "chat.completion",
        "created": Utc::now().timestamp(),
        "model": model_label,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": result.text},
            "finish_reason": "stop",
        }],
        "usage": {"prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0},
    }))
    .into_response())
}
