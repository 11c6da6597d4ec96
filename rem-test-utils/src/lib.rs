//! Test utilities, generators, and fixtures for REM

use chrono::{Duration, Utc};
use rem_core::{EntityKind, InlineEdge, Message, MessageRole, Moment, Resource, User};
use rem_llm::mock::ScriptedChatProvider;
use rem_query::{MemoryBackend, StoredEntity};

/// A resource with content, keyed by a slug of its name.
pub fn make_resource(name: &str, content: &str) -> Resource {
    let mut resource = Resource::new(name, content);
    resource.uri = Some(rem_core::slugify(name));
    resource
}

/// A user with a derived email key.
pub fn make_user(name: &str) -> User {
    let mut user = User::new(name);
    user.email = Some(format!("{}@example.com", rem_core::slugify(name)));
    user
}

/// A moment covering the last hour.
pub fn make_moment(name: &str, summary: &str) -> Moment {
    let now = Utc::now();
    let mut moment = Moment::new(rem_core::slugify(name), now - Duration::hours(1));
    moment.ends_timestamp = Some(now);
    moment.summary = Some(summary.to_string());
    moment
}

/// A session message with a fixed role.
pub fn make_message(session_id: &str, role: MessageRole, content: &str) -> Message {
    let mut message = Message::new(role, content);
    message.session_id = Some(session_id.to_string());
    message
}

/// An alternating user/assistant conversation of `turns` messages with
/// strictly increasing timestamps.
pub fn make_conversation(session_id: &str, turns: usize) -> Vec<Message> {
    let base = Utc::now() - Duration::minutes(turns as i64);
    (0..turns)
        .map(|n| {
            let role = if n % 2 == 0 {
                MessageRole::User
            } else {
                MessageRole::Assistant
            };
            let mut message = make_message(session_id, role, &format!("turn {n}"));
            message.core.created_at = base + Duration::minutes(n as i64);
            message.core.updated_at = message.core.created_at;
            message
        })
        .collect()
}

/// A memory backend seeded with a small linked document graph:
/// `doc-a -> {ref-1, ref-2, ref-3}` via `references` and
/// `doc-a -> base-doc` via `builds_on`.
pub fn seeded_backend(tenant: &str) -> MemoryBackend {
    let backend = MemoryBackend::new();
    backend.insert(
        StoredEntity::new(tenant, EntityKind::Resource, "doc-a")
            .summary("Primary document")
            .with_edge(InlineEdge::new("ref-1", "references").with_weight(0.9))
            .with_edge(InlineEdge::new("ref-2", "references").with_weight(0.7))
            .with_edge(InlineEdge::new("ref-3", "references").with_weight(0.5))
            .with_edge(InlineEdge::new("base-doc", "builds_on").with_weight(1.0)),
    );
    for key in ["ref-1", "ref-2", "ref-3", "base-doc"] {
        backend.insert(StoredEntity::new(tenant, EntityKind::Resource, key));
    }
    backend
}

/// Scripted planner provider returning one fixed planned query.
pub fn scripted_planner(query: &str, confidence: f64) -> ScriptedChatProvider {
    ScriptedChatProvider::reply_with(&format!(
        r#"{{"query": "{query}", "confidence": {confidence}, "reasoning": ""}}"#
    ))
}
