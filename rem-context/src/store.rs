//! Session message store
//!
//! Persists conversation turns as message rows and loads them back as chat
//! history with read-time compression. Partition markers written by the
//! moment builder come back as ordinary tool-result messages; their content
//! (moment keys plus recap) replaces the compressed-away exchange.

use rem_core::{MessageRole, RemResult};
use rem_llm::ChatMessage;
use rem_storage::Repository;
use serde_json::{json, Value};

use crate::{session_message_key, MessageCompressor};

/// Store and retrieve session messages with compression.
#[derive(Clone)]
pub struct SessionMessageStore {
    messages: Repository,
    tenant_id: String,
    compressor: MessageCompressor,
}

impl SessionMessageStore {
    pub fn new(messages: Repository, tenant_id: impl Into<String>) -> Self {
        Self {
            messages,
            tenant_id: tenant_id.into(),
            compressor: MessageCompressor::default(),
        }
    }

    pub fn with_compressor(mut self, compressor: MessageCompressor) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn compressor(&self) -> &MessageCompressor {
        &self.compressor
    }

    /// Number of live messages in a session.
    pub async fn message_count(&self, session_id: &str, user_id: Option<&str>) -> RemResult<i64> {
        let rows = match user_id {
            Some(user) => {
                self.messages
                    .db()
                    .query(
                        "SELECT COUNT(*) FROM messages \
                         WHERE tenant_id = $1 AND session_id = $2 AND user_id = $3 \
                           AND deleted_at IS NULL",
                        &[&self.tenant_id, &session_id, &user],
                    )
                    .await?
            }
            None => {
                self.messages
                    .db()
                    .query(
                        "SELECT COUNT(*) FROM messages \
                         WHERE tenant_id = $1 AND session_id = $2 AND user_id IS NULL \
                           AND deleted_at IS NULL",
                        &[&self.tenant_id, &session_id],
                    )
                    .await?
            }
        };
        Ok(rows.first().map(|r| r.get::<_, i64>(0)).unwrap_or(0))
    }

    /// Persist a batch of new turns. No content is discarded; long assistant
    /// turns are flagged with their lookup key for compressed retrieval.
    pub async fn store_turns(
        &self,
        session_id: &str,
        user_id: Option<&str>,
        turns: &[ChatMessage],
    ) -> RemResult<Vec<Value>> {
        if turns.is_empty() {
            return Ok(Vec::new());
        }
        let base_index = self.message_count(session_id, user_id).await?;

        let mut entities = Vec::with_capacity(turns.len());
        for (offset, turn) in turns.iter().enumerate() {
            let index = base_index + offset as i64;
            let mut metadata = json!({ "message_index": index });
            if self.compressor.should_compress(turn.role, &turn.content) {
                metadata["entity_key"] = json!(session_message_key(session_id, index));
            }
            if let Some(tool_name) = &turn.tool_name {
                metadata["tool_name"] = json!(tool_name);
            }
            if let Some(tool_call_id) = &turn.tool_call_id {
                metadata["tool_call_id"] = json!(tool_call_id);
            }

            entities.push(json!({
                "tenant_id": self.tenant_id,
                "user_id": user_id,
                "session_id": session_id,
                "message_type": turn.role.as_str(),
                "content": turn.content,
                "metadata": metadata,
            }));
        }

        self.messages.upsert(entities).await
    }

    /// Load session history in order, with long assistant turns compressed
    /// to head + tail plus their lookup hint.
    pub async fn load_session(
        &self,
        session_id: &str,
        user_id: Option<&str>,
    ) -> RemResult<Vec<ChatMessage>> {
        let mut filters: Vec<(&str, Value)> = vec![("session_id", json!(session_id))];
        if let Some(user) = user_id {
            filters.push(("user_id", json!(user)));
        }
        let rows = self
            .messages
            .fetch_many(&filters, Some("created_at ASC"), None)
            .await?;
        Ok(rows_to_chat(&self.compressor, session_id, &rows))
    }

    /// Recover the full content behind a lookup hint.
    pub async fn retrieve(&self, entity_key: &str) -> RemResult<Option<String>> {
        let row = self
            .messages
            .db()
            .query_opt(
                "SELECT content FROM messages \
                 WHERE tenant_id = $1 AND metadata->>'entity_key' = $2 \
                   AND deleted_at IS NULL \
                 LIMIT 1",
                &[&self.tenant_id, &entity_key],
            )
            .await?;
        Ok(row.map(|r| r.get(0)))
    }
}

/// Convert stored message rows to chat history, applying read-time
/// compression. Exposed for tests and the moment builder's transcript path.
pub fn rows_to_chat(
    compressor: &MessageCompressor,
    session_id: &str,
    rows: &[Value],
) -> Vec<ChatMessage> {
    rows.iter()
        .enumerate()
        .map(|(position, row)| {
            let role = row
                .get("message_type")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<MessageRole>().ok())
                .unwrap_or(MessageRole::Assistant);
            let content = row
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let metadata = row.get("metadata").cloned().unwrap_or(Value::Null);

            let content = if compressor.should_compress(role, content) {
                let key = metadata
                    .get("entity_key")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        let index = metadata
                            .get("message_index")
                            .and_then(Value::as_i64)
                            .unwrap_or(position as i64);
                        session_message_key(session_id, index)
                    });
                compressor.compress(content, Some(&key))
            } else {
                content.to_string()
            };

            ChatMessage {
                role,
                content,
                tool_call_id: metadata
                    .get("tool_call_id")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                tool_name: metadata
                    .get("tool_name")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }
        })
        .collect()
}
