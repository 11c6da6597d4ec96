//! Route handlers

pub mod auth;
pub mod chat;
pub mod feedback;
pub mod health;
pub mod mcp;
pub mod messages;
pub mod models;
pub mod sessions;

use std::collections::HashMap;

use axum::http::HeaderMap;
use rem_agents::AgentContext;

/// Extract the agent context from request headers.
pub fn agent_context(headers: &HeaderMap) -> AgentContext {
    let map: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    AgentContext::from_headers(&map)
}
