//! Moment builder - incremental session compaction
//!
//! Converts raw message streams into durable moments with backward
//! chaining, keeping a lag of recent messages visible for in-flight
//! context. Every step is independently resumable: moments upsert by
//! natural key, the partition marker's id derives from (session, boundary
//! timestamp), and the session counter update is a plain increment.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rem_core::{RemResult, PARTITION_TOOL_NAME};
use rem_storage::Repository;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::{AgentContext, AgentFactory};

/// UUIDv5 namespace for partition-marker ids.
const PARTITION_NAMESPACE: Uuid = Uuid::from_bytes([
    0x52, 0x45, 0x4d, 0x00, 0x70, 0x61, 0x72, 0x74, 0x69, 0x74, 0x69, 0x6f, 0x6e, 0x00, 0x00, 0x02,
]);

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Compaction tuning.
#[derive(Debug, Clone)]
pub struct MomentBuilderConfig {
    /// Minimum number of trailing messages left uncompressed.
    pub lag_messages: usize,
    /// Lag as a fraction of the unprocessed stream; the larger of the two
    /// lags wins.
    pub lag_percentage: f64,
    /// Messages beyond the lag required before a run does anything.
    pub minimum_batch: usize,
    /// How many previous moments to chain from.
    pub chain_window: usize,
    /// Size of the "last N moments" bag written into partition markers.
    pub recent_moment_count: usize,
    pub insert_partition_marker: bool,
}

impl Default for MomentBuilderConfig {
    fn default() -> Self {
        Self {
            lag_messages: 5,
            lag_percentage: 0.1,
            minimum_batch: 5,
            chain_window: 3,
            recent_moment_count: 5,
            insert_partition_marker: true,
        }
    }
}

impl MomentBuilderConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            lag_messages: std::env::var("REM_MOMENT_LAG_MESSAGES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.lag_messages),
            lag_percentage: std::env::var("REM_MOMENT_LAG_PERCENTAGE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.lag_percentage),
            minimum_batch: std::env::var("REM_MOMENT_MINIMUM_BATCH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.minimum_batch),
            chain_window: defaults.chain_window,
            recent_moment_count: std::env::var("REM_MOMENT_RECENT_COUNT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.recent_moment_count),
            insert_partition_marker: std::env::var("REM_MOMENT_PARTITION_MARKER")
                .ok()
                .map(|s| s.to_lowercase() != "false")
                .unwrap_or(defaults.insert_partition_marker),
        }
    }
}

/// Lag arithmetic: how many of `total` unprocessed messages to compress.
///
/// Returns `None` when the stream is too short for a run (a no-op).
pub fn compaction_split(total: usize, config: &MomentBuilderConfig) -> Option<(usize, usize)> {
    let lag_by_percent = (total as f64 * config.lag_percentage) as usize;
    let lag = config.lag_messages.max(lag_by_percent);
    if total < lag + config.minimum_batch {
        return None;
    }
    Some((total - lag, lag))
}

// ============================================================================
// EXTRACTION
// ============================================================================

/// One moment candidate from the extraction agent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MomentCandidate {
    pub name: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub topic_tags: Vec<String>,
    #[serde(default)]
    pub emotion_tags: Vec<String>,
    #[serde(default)]
    pub starts_timestamp: Option<String>,
    #[serde(default)]
    pub ends_timestamp: Option<String>,
}

/// Agent output: zero or more moments plus an optional user-summary delta.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MomentExtraction {
    #[serde(default)]
    pub moments: Vec<MomentCandidate>,
    #[serde(default)]
    pub user_summary_update: Option<String>,
}

/// Extraction seam, mockable in tests.
#[async_trait]
pub trait MomentExtractor: Send + Sync {
    async fn extract(&self, transcript: &str) -> RemResult<MomentExtraction>;
}

/// Extraction via the `moment-builder` agent schema.
pub struct AgentMomentExtractor {
    factory: Arc<AgentFactory>,
    context: AgentContext,
}

impl AgentMomentExtractor {
    pub fn new(factory: Arc<AgentFactory>, context: AgentContext) -> Self {
        Self { factory, context }
    }
}

#[async_trait]
impl MomentExtractor for AgentMomentExtractor {
    async fn extract(&self, transcript: &str) -> RemResult<MomentExtraction> {
        let agent = self
            .factory
            .create("moment-builder", self.context.clone())
            .await?;
        let prompt = format!(
            "Analyze the following conversation messages and create a moment summary.\n\n\
             ## Conversation Messages\n\n{transcript}\n"
        );
        let result = agent.run_prompt(&prompt).await?;
        let output = result.output.unwrap_or_else(|| json!({"moments": []}));
        serde_json::from_value(output).map_err(|e| {
            rem_core::AgentError::OutputContract {
                reason: e.to_string(),
            }
            .into()
        })
    }
}

// ============================================================================
// RESULT
// ============================================================================

/// Structured result of one builder run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MomentBuilderResult {
    pub success: bool,
    pub moments_created: usize,
    pub partition_inserted: bool,
    pub error: Option<String>,
}

impl MomentBuilderResult {
    fn noop() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// One unprocessed message loaded for compaction.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub role: String,
    pub content: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// Incremental compaction of one session's message stream.
pub struct MomentBuilder {
    moments: Repository,
    messages: Repository,
    sessions: Repository,
    users: Repository,
    extractor: Arc<dyn MomentExtractor>,
    config: MomentBuilderConfig,
    tenant_id: String,
}

impl MomentBuilder {
    pub fn new(
        moments: Repository,
        messages: Repository,
        sessions: Repository,
        users: Repository,
        extractor: Arc<dyn MomentExtractor>,
        config: MomentBuilderConfig,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            moments,
            messages,
            sessions,
            users,
            extractor,
            config,
            tenant_id: tenant_id.into(),
        }
    }

    /// Run compaction for one session. Agent errors fail the run; partially
    /// written moments are harmless (they upsert by name on retry).
    ///
    /// At most one run per session: an advisory lock keyed by (tenant,
    /// session) coalesces concurrent triggers into a no-op.
    pub async fn run(&self, session_id: &str, user_id: &str) -> MomentBuilderResult {
        // The lock is connection-scoped, so the guard connection is held
        // for the duration of the run.
        let lock_key = advisory_lock_key(&self.tenant_id, session_id);
        let guard_conn = match self.messages.db().get_conn().await {
            Ok(conn) => conn,
            Err(e) => {
                return MomentBuilderResult {
                    success: false,
                    error: Some(e.to_string()),
                    ..Default::default()
                }
            }
        };
        let locked = guard_conn
            .query_one("SELECT pg_try_advisory_lock($1)", &[&lock_key])
            .await
            .map(|row| row.get::<_, bool>(0))
            .unwrap_or(false);
        if !locked {
            tracing::info!(session_id, "compaction already running, skipping");
            return MomentBuilderResult::noop();
        }

        let result = match self.try_run(session_id, user_id).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(session_id, error = %e, "moment builder run failed");
                MomentBuilderResult {
                    success: false,
                    error: Some(e.to_string()),
                    ..Default::default()
                }
            }
        };

        if let Err(e) = guard_conn
            .execute("SELECT pg_advisory_unlock($1)", &[&lock_key])
            .await
        {
            tracing::warn!(session_id, error = %e, "failed to release advisory lock");
        }
        result
    }

    async fn try_run(&self, session_id: &str, user_id: &str) -> RemResult<MomentBuilderResult> {
        // 1. Unprocessed messages, lag applied.
        let unprocessed = self.load_unprocessed(session_id, user_id).await?;
        let Some((compress_count, lag)) = compaction_split(unprocessed.len(), &self.config) else {
            tracing::info!(
                session_id,
                total = unprocessed.len(),
                "not enough messages for compaction"
            );
            return Ok(MomentBuilderResult::noop());
        };
        let to_compress = &unprocessed[..compress_count];
        let partition_timestamp = to_compress
            .last()
            .map(|m| m.created_at)
            .unwrap_or_else(Utc::now);
        tracing::info!(
            session_id,
            total = unprocessed.len(),
            lag,
            compressing = compress_count,
            "lag mechanism applied"
        );

        // 2. Previous moment keys for backward chaining.
        let previous_keys = self
            .recent_moment_keys(user_id, Some(session_id), self.config.chain_window)
            .await?;

        // 3-4. Extract and persist moments, chained in write order.
        let extraction = self
            .extractor
            .extract(&format_transcript(to_compress))
            .await?;
        if extraction.moments.is_empty() {
            tracing::info!(session_id, "extraction produced no moments");
            return Ok(MomentBuilderResult::noop());
        }

        let entities = build_moment_entities(
            &self.tenant_id,
            user_id,
            session_id,
            &extraction.moments,
            &previous_keys,
            partition_timestamp,
        );
        let moment_keys: Vec<String> = entities
            .iter()
            .filter_map(|m| m.get("name").and_then(Value::as_str).map(str::to_string))
            .collect();
        self.moments.upsert(entities).await?;

        // 5. Partition marker at the backdated boundary.
        let mut partition_inserted = false;
        if self.config.insert_partition_marker {
            let last_n = self
                .recent_moment_keys(user_id, None, self.config.recent_moment_count)
                .await?;
            let recap = self.recent_moments_summary(user_id).await?;
            self.insert_partition_marker(
                session_id,
                user_id,
                &moment_keys,
                &last_n,
                &recap,
                compress_count,
                partition_timestamp,
            )
            .await?;
            partition_inserted = true;
        }

        // 6. Session bookkeeping.
        self.advance_session_index(session_id, user_id, compress_count as i32)
            .await?;

        // 7. User-summary delta.
        if let Some(delta) = &extraction.user_summary_update {
            self.append_user_summary(user_id, delta).await?;
        }

        tracing::info!(
            session_id,
            moments = moment_keys.len(),
            partition_inserted,
            "moment builder completed"
        );
        Ok(MomentBuilderResult {
            success: true,
            moments_created: moment_keys.len(),
            partition_inserted,
            error: None,
        })
    }

    /// Messages written after the last partition marker, oldest first.
    async fn load_unprocessed(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> RemResult<Vec<RawMessage>> {
        let rows = self
            .messages
            .db()
            .query(
                "SELECT message_type, content, metadata, created_at \
                 FROM messages \
                 WHERE tenant_id = $1 AND session_id = $2 AND user_id = $3 \
                   AND deleted_at IS NULL \
                   AND created_at > ( \
                     SELECT COALESCE(MAX(created_at), '1970-01-01'::timestamptz) \
                     FROM messages \
                     WHERE tenant_id = $1 AND session_id = $2 AND user_id = $3 \
                       AND message_type = 'tool' \
                       AND metadata->>'tool_name' = $4 \
                   ) \
                   AND NOT (message_type = 'tool' AND metadata->>'tool_name' = $4) \
                 ORDER BY created_at ASC",
                &[&self.tenant_id, &session_id, &user_id, &PARTITION_TOOL_NAME],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| RawMessage {
                role: row
                    .try_get::<_, Option<String>>(0)
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| "assistant".to_string()),
                content: row.get(1),
                metadata: row
                    .try_get::<_, Option<Value>>(2)
                    .ok()
                    .flatten()
                    .unwrap_or(Value::Null),
                created_at: row.get(3),
            })
            .collect())
    }

    /// Most recent moment keys, newest first, optionally per session.
    async fn recent_moment_keys(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        limit: usize,
    ) -> RemResult<Vec<String>> {
        let limit = limit as i64;
        let rows = match session_id {
            Some(session) => {
                self.moments
                    .db()
                    .query(
                        "SELECT name FROM moments \
                         WHERE tenant_id = $1 AND user_id = $2 AND source_session_id = $3 \
                           AND deleted_at IS NULL \
                         ORDER BY starts_timestamp DESC LIMIT $4",
                        &[&self.tenant_id, &user_id, &session, &limit],
                    )
                    .await?
            }
            None => {
                self.moments
                    .db()
                    .query(
                        "SELECT name FROM moments \
                         WHERE tenant_id = $1 AND user_id = $2 AND deleted_at IS NULL \
                         ORDER BY starts_timestamp DESC LIMIT $3",
                        &[&self.tenant_id, &user_id, &limit],
                    )
                    .await?
            }
        };
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    /// Dated oldest-to-newest narrative over the newest few moments.
    async fn recent_moments_summary(&self, user_id: &str) -> RemResult<String> {
        let limit = self.config.recent_moment_count as i64;
        let rows = self
            .moments
            .db()
            .query(
                "SELECT name, summary, topic_tags, starts_timestamp FROM moments \
                 WHERE tenant_id = $1 AND user_id = $2 AND deleted_at IS NULL \
                 ORDER BY starts_timestamp DESC LIMIT $3",
                &[&self.tenant_id, &user_id, &limit],
            )
            .await?;

        if rows.is_empty() {
            return Ok("No previous moments recorded.".to_string());
        }

        let mut parts = Vec::with_capacity(rows.len());
        for row in rows.iter().rev() {
            let summary: Option<String> = row.get(1);
            let topics: Option<Vec<String>> = row.try_get(2).ok();
            let starts: Option<DateTime<Utc>> = row.try_get(3).ok().flatten();

            let date = starts
                .map(|ts| ts.format("%b %d").to_string())
                .unwrap_or_else(|| "recently".to_string());
            let topics = topics
                .filter(|t| !t.is_empty())
                .map(|t| t.into_iter().take(3).collect::<Vec<_>>().join(", "))
                .unwrap_or_else(|| "general discussion".to_string());
            let summary = summary
                .map(|s| rem_core::summarize(&s, 100))
                .unwrap_or_else(|| "conversation segment".to_string());
            parts.push(format!("{date}: {summary} ({topics})"));
        }
        Ok(format!("Recent journey: {}", parts.join("; ")))
    }

    /// Insert the partition marker message at the backdated timestamp of
    /// the last compressed message. Id derives from (session, timestamp),
    /// so a retried run rewrites the same row.
    #[allow(clippy::too_many_arguments)]
    async fn insert_partition_marker(
        &self,
        session_id: &str,
        user_id: &str,
        moment_keys: &[String],
        last_n_moment_keys: &[String],
        recap: &str,
        messages_compressed: usize,
        partition_timestamp: DateTime<Utc>,
    ) -> RemResult<()> {
        let content = partition_content(
            user_id,
            moment_keys,
            last_n_moment_keys,
            recap,
            messages_compressed,
            partition_timestamp,
        );

        let marker_id = Uuid::new_v5(
            &PARTITION_NAMESPACE,
            format!(
                "{}:{}:{}",
                self.tenant_id,
                session_id,
                partition_timestamp.to_rfc3339()
            )
            .as_bytes(),
        );

        self.messages
            .upsert_one(json!({
                "id": marker_id.to_string(),
                "tenant_id": self.tenant_id,
                "user_id": user_id,
                "session_id": session_id,
                "message_type": "tool",
                "content": content.to_string(),
                "metadata": {
                    "tool_name": PARTITION_TOOL_NAME,
                    "tool_result": content,
                },
                "created_at": partition_timestamp.to_rfc3339(),
            }))
            .await?;

        tracing::info!(
            session_id,
            at = %partition_timestamp,
            "inserted partition marker (backdated by lag)"
        );
        Ok(())
    }

    /// Advance the session's processed-message counter, preserving the rest
    /// of the session row.
    async fn advance_session_index(
        &self,
        session_id: &str,
        user_id: &str,
        processed: i32,
    ) -> RemResult<()> {
        let existing = self
            .sessions
            .fetch_many(&[("name", json!(session_id))], None, Some(1))
            .await?;

        let mut session = existing
            .into_iter()
            .find(|s| s.get("tenant_id").and_then(Value::as_str) == Some(self.tenant_id.as_str()))
            .unwrap_or_else(|| {
                json!({
                    "tenant_id": self.tenant_id,
                    "user_id": user_id,
                    "name": session_id,
                    "last_processed_index": 0,
                })
            });

        let last = session
            .get("last_processed_index")
            .and_then(Value::as_i64)
            .unwrap_or(0) as i32;
        if let Value::Object(object) = &mut session {
            object.insert(
                "last_processed_index".to_string(),
                json!(last + processed),
            );
        }
        self.sessions.upsert_one(session).await?;
        Ok(())
    }

    /// Append the agent's delta to the owning user's evolving summary.
    async fn append_user_summary(&self, user_id: &str, delta: &str) -> RemResult<()> {
        let updated = self
            .users
            .db()
            .execute(
                "UPDATE users \
                 SET summary = COALESCE(summary, '') || E'\\n' || $1, updated_at = NOW() \
                 WHERE tenant_id = $2 AND user_id = $3 AND deleted_at IS NULL",
                &[&delta, &self.tenant_id, &user_id],
            )
            .await?;
        if updated == 0 {
            tracing::debug!(user_id, "no user row for summary delta");
        }
        Ok(())
    }
}

// ============================================================================
// PURE PIECES
// ============================================================================

/// Format messages as a readable transcript, preserving tool metadata.
pub fn format_transcript(messages: &[RawMessage]) -> String {
    let mut lines = Vec::with_capacity(messages.len());
    for message in messages {
        let timestamp = message.created_at.to_rfc3339();
        let tool_name = message
            .metadata
            .get("tool_name")
            .and_then(Value::as_str);
        let tool_calls = message.metadata.get("tool_calls");

        if let Some(tool_name) = tool_name {
            let result = message
                .metadata
                .get("tool_result")
                .map(Value::to_string)
                .unwrap_or_else(|| message.content.clone());
            lines.push(format!("[{timestamp}] TOOL ({tool_name}): {result}"));
        } else if let Some(calls) = tool_calls {
            lines.push(format!("[{timestamp}] ASSISTANT (tool calls): {calls}"));
        } else {
            lines.push(format!(
                "[{timestamp}] {}: {}",
                message.role.to_uppercase(),
                message.content
            ));
        }
    }
    lines.join("\n")
}

/// Build moment entity rows from candidates, chaining `previous_moment_keys`
/// through the batch in write order.
pub fn build_moment_entities(
    tenant_id: &str,
    user_id: &str,
    session_id: &str,
    candidates: &[MomentCandidate],
    previous_keys: &[String],
    fallback_timestamp: DateTime<Utc>,
) -> Vec<Value> {
    let mut previous: Vec<String> = previous_keys.to_vec();
    let mut entities = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        let key = rem_core::slugify(&candidate.name);
        if key.is_empty() {
            continue;
        }
        let starts = candidate
            .starts_timestamp
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(fallback_timestamp);
        let ends = candidate
            .ends_timestamp
            .as_deref()
            .and_then(parse_timestamp)
            // A moment's end never precedes its start.
            .filter(|e| *e >= starts);

        entities.push(json!({
            "tenant_id": tenant_id,
            "user_id": user_id,
            "name": key,
            "summary": candidate.summary,
            "topic_tags": candidate.topic_tags,
            "emotion_tags": candidate.emotion_tags,
            "starts_timestamp": starts.to_rfc3339(),
            "ends_timestamp": ends.map(|e| e.to_rfc3339()),
            "previous_moment_keys": previous.clone(),
            "source_session_id": session_id,
            "category": "session-compression",
        }));
        previous = vec![key];
    }
    entities
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Stable advisory-lock key for one session's compaction.
pub fn advisory_lock_key(tenant_id: &str, session_id: &str) -> i64 {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(b"rem:compaction:");
    hasher.update(tenant_id.as_bytes());
    hasher.update(b":");
    hasher.update(session_id.as_bytes());
    let digest = hasher.finalize();
    i64::from_be_bytes(digest[..8].try_into().expect("8-byte slice"))
}

/// The partition marker's content: keys just written, a recency bag, a
/// recap, and a recovery hint for the agent.
pub fn partition_content(
    user_id: &str,
    moment_keys: &[String],
    last_n_moment_keys: &[String],
    recap: &str,
    messages_compressed: usize,
    partition_timestamp: DateTime<Utc>,
) -> Value {
    // User ids are caller-supplied text; truncate on char boundaries.
    let short_id: String = user_id.chars().take(8).collect();
    let user_key = format!("user-{short_id}");
    let mut content = Map::new();
    content.insert("partition_type".to_string(), json!("moment_compression"));
    content.insert(
        "created_at".to_string(),
        json!(partition_timestamp.to_rfc3339()),
    );
    content.insert("user_key".to_string(), json!(user_key));
    content.insert("moment_keys".to_string(), json!(moment_keys));
    content.insert("last_n_moment_keys".to_string(), json!(last_n_moment_keys));
    content.insert("recent_moments_summary".to_string(), json!(recap));
    content.insert(
        "messages_compressed".to_string(),
        json!(messages_compressed),
    );
    content.insert(
        "summary".to_string(),
        json!(format!(
            "Compressed {messages_compressed} messages into {} moments. \
             Use REM LOOKUP on the moment keys for full context.",
            moment_keys.len()
        )),
    );
    content.insert(
        "recovery_hint".to_string(),
        json!(
            "This is a memory checkpoint. The conversation history before this \
             point has been summarized into moments. To recover detailed context, \
             use REM LOOKUP on the moment_keys above. You can chain backwards \
             through previous_moment_keys on each moment for deeper history."
        ),
    );
    Value::Object(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config() -> MomentBuilderConfig {
        MomentBuilderConfig::default()
    }

    #[test]
    fn test_compaction_split_thirty_messages() {
        // lag = max(5, 30 * 0.1) = 5 -> compress the first 25.
        assert_eq!(compaction_split(30, &config()), Some((25, 5)));
    }

    #[test]
    fn test_compaction_split_percentage_dominates() {
        // lag = max(5, 100 * 0.1) = 10 -> compress 90.
        assert_eq!(compaction_split(100, &config()), Some((90, 10)));
    }

    #[test]
    fn test_compaction_split_noop_below_threshold() {
        // Needs at least lag + minimum_batch = 10 messages.
        assert_eq!(compaction_split(9, &config()), None);
        assert_eq!(compaction_split(0, &config()), None);
        assert_eq!(compaction_split(10, &config()), Some((5, 5)));
    }

    #[test]
    fn test_format_transcript_variants() {
        let at = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let messages = vec![
            RawMessage {
                role: "user".to_string(),
                content: "hello".to_string(),
                metadata: Value::Null,
                created_at: at,
            },
            RawMessage {
                role: "assistant".to_string(),
                content: String::new(),
                metadata: json!({"tool_calls": [{"name": "rem_query"}]}),
                created_at: at,
            },
            RawMessage {
                role: "tool".to_string(),
                content: "fallback".to_string(),
                metadata: json!({"tool_name": "rem_query", "tool_result": {"count": 1}}),
                created_at: at,
            },
        ];

        let transcript = format_transcript(&messages);
        let lines: Vec<&str> = transcript.lines().collect();
        assert!(lines[0].contains("USER: hello"));
        assert!(lines[1].contains("ASSISTANT (tool calls)"));
        assert!(lines[2].contains("TOOL (rem_query)"));
        assert!(lines[2].contains("\"count\":1"));
    }

    #[test]
    fn test_moment_entities_chain_within_batch() {
        let fallback = Utc::now();
        let candidates = vec![
            MomentCandidate {
                name: "API Security Session".to_string(),
                summary: "JWT and CORS work".to_string(),
                ..Default::default()
            },
            MomentCandidate {
                name: "Deployment Planning".to_string(),
                summary: "AWS rollout".to_string(),
                ..Default::default()
            },
        ];
        let previous = vec!["earlier-moment".to_string()];

        let entities =
            build_moment_entities("acme", "u-1", "s-1", &candidates, &previous, fallback);
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0]["name"], "api-security-session");
        assert_eq!(entities[0]["previous_moment_keys"], json!(["earlier-moment"]));
        // The second moment chains from the first, not from the old batch.
        assert_eq!(
            entities[1]["previous_moment_keys"],
            json!(["api-security-session"])
        );
        assert_eq!(entities[0]["source_session_id"], "s-1");
    }

    #[test]
    fn test_moment_entities_drop_inverted_end() {
        let starts = "2025-01-02T10:00:00Z";
        let ends_before = "2025-01-02T09:00:00Z";
        let candidates = vec![MomentCandidate {
            name: "inverted".to_string(),
            starts_timestamp: Some(starts.to_string()),
            ends_timestamp: Some(ends_before.to_string()),
            ..Default::default()
        }];
        let entities =
            build_moment_entities("acme", "u-1", "s-1", &candidates, &[], Utc::now());
        assert_eq!(entities[0]["ends_timestamp"], Value::Null);
    }

    #[test]
    fn test_partition_content_user_key_is_char_safe() {
        let at = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        // Multi-byte ids must truncate on char boundaries, not byte offsets.
        let content = partition_content("日本語xyzabc", &[], &[], "", 0, at);
        assert_eq!(content["user_key"], "user-日本語xyzab");

        // Short ids pass through whole.
        let content = partition_content("u-1", &[], &[], "", 0, at);
        assert_eq!(content["user_key"], "user-u-1");
    }

    #[test]
    fn test_advisory_lock_key_stable_and_distinct() {
        let a = advisory_lock_key("acme", "sess-1");
        assert_eq!(a, advisory_lock_key("acme", "sess-1"));
        assert_ne!(a, advisory_lock_key("acme", "sess-2"));
        assert_ne!(a, advisory_lock_key("other", "sess-1"));
    }

    #[test]
    fn test_partition_content_shape() {
        let at = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let content = partition_content(
            "0a1b2c3d4e5f",
            &["m1".to_string(), "m2".to_string()],
            &["m2".to_string(), "m1".to_string(), "m0".to_string()],
            "Recent journey: ...",
            25,
            at,
        );

        assert_eq!(content["partition_type"], "moment_compression");
        assert_eq!(content["user_key"], "user-0a1b2c3d");
        assert_eq!(content["moment_keys"], json!(["m1", "m2"]));
        assert_eq!(content["messages_compressed"], 25);
        assert!(content["summary"]
            .as_str()
            .unwrap()
            .contains("Compressed 25 messages into 2 moments"));
        assert!(content["recovery_hint"].as_str().unwrap().contains("LOOKUP"));
    }
}
