//! Agent execution context
//!
//! Who and what for one agent invocation: identity scope, session, and
//! configuration overrides. Constructed from HTTP headers at the API
//! boundary or directly for CLI and tests; passed to the factory, never
//! stored inside agents.

use std::collections::HashMap;

use rem_core::DEFAULT_TENANT;
use rem_llm::ModelRef;

/// Session and configuration context for agent execution.
#[derive(Debug, Clone)]
pub struct AgentContext {
    /// User identifier; `None` is anonymous scope, never a synthetic id.
    pub user_id: Option<String>,
    pub tenant_id: String,
    pub session_id: Option<String>,
    /// Model override; falls back to the schema's model, then the default.
    pub model: Option<ModelRef>,
    /// Agent schema selected for this invocation.
    pub agent_schema: Option<String>,
}

impl Default for AgentContext {
    fn default() -> Self {
        Self {
            user_id: None,
            tenant_id: DEFAULT_TENANT.to_string(),
            session_id: None,
            model: None,
            agent_schema: None,
        }
    }
}

impl AgentContext {
    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            ..Default::default()
        }
    }

    /// Construct from request headers. Recognized headers:
    /// `X-User-Id`, `X-Tenant-Id`, `X-Session-Id`, `X-Model-Name`,
    /// `X-Agent-Schema`. Lookup is case-insensitive.
    pub fn from_headers(headers: &HashMap<String, String>) -> Self {
        let normalized: HashMap<String, &str> = headers
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.as_str()))
            .collect();

        Self {
            user_id: normalized.get("x-user-id").map(|v| v.to_string()),
            tenant_id: normalized
                .get("x-tenant-id")
                .map(|v| v.to_string())
                .unwrap_or_else(|| DEFAULT_TENANT.to_string()),
            session_id: normalized.get("x-session-id").map(|v| v.to_string()),
            model: normalized
                .get("x-model-name")
                .and_then(|v| v.parse().ok()),
            agent_schema: normalized.get("x-agent-schema").map(|v| v.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_headers_case_insensitive() {
        let mut headers = HashMap::new();
        headers.insert("X-User-Id".to_string(), "sarah-chen".to_string());
        headers.insert("x-tenant-id".to_string(), "acme".to_string());
        headers.insert("X-MODEL-NAME".to_string(), "openai:gpt-4.1".to_string());

        let context = AgentContext::from_headers(&headers);
        assert_eq!(context.user_id.as_deref(), Some("sarah-chen"));
        assert_eq!(context.tenant_id, "acme");
        assert_eq!(context.model.as_ref().unwrap().provider, "openai");
        assert!(context.session_id.is_none());
    }

    #[test]
    fn test_missing_tenant_defaults() {
        let context = AgentContext::from_headers(&HashMap::new());
        assert_eq!(context.tenant_id, DEFAULT_TENANT);
        assert!(context.user_id.is_none());
    }

    #[test]
    fn test_invalid_model_header_ignored() {
        let mut headers = HashMap::new();
        headers.insert("X-Model-Name".to_string(), "not-a-model".to_string());
        let context = AgentContext::from_headers(&headers);
        assert!(context.model.is_none());
    }
}
