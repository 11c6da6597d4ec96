//! Entity structs for the seven persisted kinds
//!
//! Every entity embeds the common [`Envelope`](crate::Envelope) and adds its
//! own fields. The natural key named in each doc comment is what outside
//! callers pass to LOOKUP; it is distinct from the internal `id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Envelope, EntityKind, FileStatus, MessageRole, UserTier};

/// Chunked document or captured conversation content.
///
/// Natural key: (`uri`, `ordinal`). Large documents are split into chunks
/// sharing a `uri`, distinguished by `ordinal`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(flatten)]
    pub core: Envelope,
    /// Human-readable resource name (used as graph label).
    pub name: String,
    /// Content URI or identifier (file path, URL, etc.).
    #[serde(default)]
    pub uri: Option<String>,
    /// Chunk ordinal; 0 for single-chunk resources.
    #[serde(default)]
    pub ordinal: i32,
    #[serde(default)]
    pub content: String,
    /// Content creation/publication time (distinct from row timestamps).
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub category: Option<String>,
    /// Extracted entities (people, projects, concepts) with metadata.
    #[serde(default)]
    pub related_entities: Vec<Value>,
}

impl Resource {
    pub const KIND: EntityKind = EntityKind::Resource;

    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            core: Envelope::default(),
            name: name.into(),
            uri: None,
            ordinal: 0,
            content: content.into(),
            timestamp: Utc::now(),
            category: None,
            related_entities: Vec::new(),
        }
    }
}

/// One turn of a conversation. Natural key: `id`.
///
/// Partition markers written by the moment builder are ordinary tool
/// messages whose metadata carries `tool_name = "session_partition"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(flatten)]
    pub core: Envelope,
    pub content: String,
    /// Turn role; stored as text in the `message_type` column.
    #[serde(default)]
    pub message_type: Option<MessageRole>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Metadata key flagging a message as a compaction partition marker.
pub const PARTITION_TOOL_NAME: &str = "session_partition";

impl Message {
    pub const KIND: EntityKind = EntityKind::Message;

    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            core: Envelope::default(),
            content: content.into(),
            message_type: Some(role),
            session_id: None,
        }
    }

    /// Whether this message is a compaction partition marker.
    pub fn is_partition_marker(&self) -> bool {
        self.message_type == Some(MessageRole::Tool)
            && self.core.metadata_str("tool_name") == Some(PARTITION_TOOL_NAME)
    }
}

/// Person reference inside a moment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    /// Person entity natural key.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// Compressed narrative of a session window. Natural key: `name`.
///
/// Moments form a DAG via `previous_moment_keys`; chains are written by the
/// moment builder in run order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Moment {
    #[serde(flatten)]
    pub core: Envelope,
    pub name: String,
    /// Classification (meeting, coding-session, conversation, ...).
    #[serde(default)]
    pub moment_type: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub starts_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub ends_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub present_persons: Vec<Person>,
    #[serde(default)]
    pub emotion_tags: Vec<String>,
    #[serde(default)]
    pub topic_tags: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
    /// Backward chain to the moments preceding this one.
    #[serde(default)]
    pub previous_moment_keys: Vec<String>,
    /// Session this moment was compressed from.
    #[serde(default)]
    pub source_session_id: Option<String>,
    #[serde(default)]
    pub source_resource_ids: Vec<String>,
}

impl Moment {
    pub const KIND: EntityKind = EntityKind::Moment;

    pub fn new(name: impl Into<String>, starts_timestamp: DateTime<Utc>) -> Self {
        Self {
            core: Envelope::default(),
            name: name.into(),
            moment_type: None,
            category: None,
            starts_timestamp,
            ends_timestamp: None,
            present_persons: Vec::new(),
            emotion_tags: Vec::new(),
            topic_tags: Vec::new(),
            summary: None,
            previous_moment_keys: Vec::new(),
            source_session_id: None,
            source_resource_ids: Vec::new(),
        }
    }
}

/// Account identity. Natural key: `email`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(flatten)]
    pub core: Envelope,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub tier: UserTier,
    /// Evolving narrative summary maintained by the moment builder.
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub interests: Vec<String>,
    /// Anonymous ids this user was known by before authenticating.
    #[serde(default)]
    pub anonymous_ids: Vec<String>,
}

impl User {
    pub const KIND: EntityKind = EntityKind::User;

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: Envelope::default(),
            name: name.into(),
            email: None,
            tier: UserTier::default(),
            summary: None,
            interests: Vec::new(),
            anonymous_ids: Vec::new(),
        }
    }
}

/// Pointer to an uploaded binary. Natural key: `uri`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct File {
    #[serde(flatten)]
    pub core: Envelope,
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size_bytes: i64,
    #[serde(default)]
    pub processing_status: FileStatus,
}

impl File {
    pub const KIND: EntityKind = EntityKind::File;
}

/// Agent definition. Natural key: `name`.
///
/// `spec` is a JSON Schema whose `description` carries the system prompt,
/// whose `properties` define the output contract, and whose
/// `json_schema_extra` block declares tool and resource bindings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(flatten)]
    pub core: Envelope,
    pub name: String,
    /// Markdown documentation for the schema.
    #[serde(default)]
    pub content: String,
    pub spec: Value,
    #[serde(default)]
    pub category: Option<String>,
}

impl Schema {
    pub const KIND: EntityKind = EntityKind::Schema;
}

/// Conversation session bookkeeping. Natural key: `name` (the session id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(flatten)]
    pub core: Envelope,
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Count of messages already consumed by the moment builder.
    #[serde(default)]
    pub last_processed_index: i32,
    /// Agent schema driving this session, when pinned.
    #[serde(default)]
    pub agent_schema: Option<String>,
}

impl Session {
    pub const KIND: EntityKind = EntityKind::Session;

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: Envelope::default(),
            name: name.into(),
            title: None,
            last_processed_index: 0,
            agent_schema: None,
        }
    }
}
