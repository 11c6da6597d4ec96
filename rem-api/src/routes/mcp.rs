//! Tool-server endpoint
//!
//! Exposes the in-process tool registry over HTTP: list declarations and
//! invoke by name. Contextual identifiers come from headers, exactly as
//! they do for agent-invoked tools.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use rem_agents::ToolContext;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::routes::agent_context;
use crate::{ApiResult, AppState};

pub async fn list_tools(State(state): State<AppState>) -> Json<Value> {
    let tools: Vec<Value> = state
        .tools
        .names()
        .iter()
        .filter_map(|name| state.tools.get(name))
        .map(|tool| {
            json!({
                "name": tool.name(),
                "description": tool.description(),
                "input_schema": tool.parameters(),
            })
        })
        .collect();
    Json(json!({"tools": tools}))
}

#[derive(Debug, Deserialize)]
pub struct CallToolRequest {
    #[serde(default)]
    pub arguments: Value,
}

pub async fn call_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CallToolRequest>,
) -> ApiResult<Json<Value>> {
    let context = agent_context(&headers);
    let tool = state.tools.require(&name)?;

    let tool_context = ToolContext {
        tenant_id: context.tenant_id,
        user_id: context.user_id,
        session_id: context.session_id,
        event_sink: None,
    };
    let result = tool.invoke(body.arguments, &tool_context).await?;
    Ok(Json(json!({"tool": name, "result": result})))
}
