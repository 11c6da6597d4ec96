//! Context assembly
//!
//! Builds the full prompt for a turn: a system hint carrying the current
//! date and either a loaded user profile or a LOOKUP hint for it, the
//! compressed session history, then the incoming turns. This is also the
//! single point where user-identity resolution applies: a missing user id
//! means anonymous scope, never a synthetic id.

use chrono::{DateTime, Utc};
use rem_core::RemResult;
use rem_llm::ChatMessage;
use rem_storage::Repository;
use serde_json::{json, Value};

use crate::SessionMessageStore;

/// Identity and session scope for one request.
#[derive(Debug, Clone, Default)]
pub struct RequestScope {
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

/// Assembles prompts from stored state.
#[derive(Clone)]
pub struct ContextAssembler {
    store: SessionMessageStore,
    users: Repository,
    /// Load and inline the user profile instead of emitting a LOOKUP hint.
    auto_inject_profile: bool,
}

impl ContextAssembler {
    pub fn new(store: SessionMessageStore, users: Repository) -> Self {
        Self {
            store,
            users,
            auto_inject_profile: false,
        }
    }

    pub fn with_auto_inject_profile(mut self, enabled: bool) -> Self {
        self.auto_inject_profile = enabled;
        self
    }

    /// Compose system hint + compressed history + new turns.
    pub async fn assemble(
        &self,
        scope: &RequestScope,
        system_prompt: Option<&str>,
        new_turns: Vec<ChatMessage>,
    ) -> RemResult<Vec<ChatMessage>> {
        let profile = match (&scope.user_id, self.auto_inject_profile) {
            (Some(user_id), true) => self.load_profile(user_id).await?,
            _ => None,
        };

        let mut messages = Vec::new();
        messages.push(ChatMessage::system(compose_system_hint(
            Utc::now(),
            system_prompt,
            scope.user_id.as_deref(),
            profile.as_ref(),
        )));

        if let Some(session_id) = &scope.session_id {
            messages.extend(
                self.store
                    .load_session(session_id, scope.user_id.as_deref())
                    .await?,
            );
        }

        messages.extend(new_turns);
        Ok(messages)
    }

    async fn load_profile(&self, user_id: &str) -> RemResult<Option<Value>> {
        let rows = self
            .users
            .fetch_many(&[("user_id", json!(user_id))], None, Some(1))
            .await?;
        Ok(rows.into_iter().next())
    }
}

/// The system hint: current date, the agent's prompt, and user identity
/// (inline profile or on-demand LOOKUP hint).
pub fn compose_system_hint(
    now: DateTime<Utc>,
    system_prompt: Option<&str>,
    user_id: Option<&str>,
    profile: Option<&Value>,
) -> String {
    let mut hint = format!("Current date: {}.", now.format("%Y-%m-%d"));

    if let Some(prompt) = system_prompt {
        if !prompt.trim().is_empty() {
            hint.push_str("\n\n");
            hint.push_str(prompt.trim());
        }
    }

    match (user_id, profile) {
        (Some(_), Some(profile)) => {
            let name = profile.get("name").and_then(Value::as_str).unwrap_or("unknown");
            let summary = profile
                .get("summary")
                .and_then(Value::as_str)
                .unwrap_or("no summary recorded");
            hint.push_str(&format!("\n\nUser profile: {name}. {summary}"));
        }
        (Some(user_id), None) => {
            hint.push_str(&format!(
                "\n\nUser ID: {user_id}. To load the user profile, use REM LOOKUP {user_id}."
            ));
        }
        (None, _) => {
            hint.push_str("\n\nAnonymous session: only shared memory is visible.");
        }
    }
    hint
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_hint_carries_date_and_prompt() {
        let hint = compose_system_hint(at(), Some("You are the REM assistant."), None, None);
        assert!(hint.starts_with("Current date: 2025-03-14."));
        assert!(hint.contains("You are the REM assistant."));
        assert!(hint.contains("Anonymous session"));
    }

    #[test]
    fn test_hint_with_user_emits_lookup_hint() {
        let hint = compose_system_hint(at(), None, Some("sarah-chen"), None);
        assert!(hint.contains("REM LOOKUP sarah-chen"));
    }

    #[test]
    fn test_hint_with_loaded_profile_inlines_it() {
        let profile = json!({"name": "Sarah Chen", "summary": "Staff engineer, likes Rust."});
        let hint = compose_system_hint(at(), None, Some("sarah-chen"), Some(&profile));
        assert!(hint.contains("Sarah Chen"));
        assert!(hint.contains("likes Rust"));
        assert!(!hint.contains("REM LOOKUP"));
    }
}
