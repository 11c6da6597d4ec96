//! Enumerations shared across the REM workspace

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ValidationError;

// ============================================================================
// ENTITY KIND
// ============================================================================

/// The first-class entity kinds REM persists.
///
/// Every kind has a dedicated table and a natural key distinct from its
/// internal id (see the entity structs for which field that is).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Resource,
    Message,
    Moment,
    User,
    File,
    Schema,
    Session,
}

impl EntityKind {
    /// Stable lowercase label used in the key-store and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Resource => "resource",
            EntityKind::Message => "message",
            EntityKind::Moment => "moment",
            EntityKind::User => "user",
            EntityKind::File => "file",
            EntityKind::Schema => "schema",
            EntityKind::Session => "session",
        }
    }

    /// Table backing this entity kind.
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityKind::Resource => "resources",
            EntityKind::Message => "messages",
            EntityKind::Moment => "moments",
            EntityKind::User => "users",
            EntityKind::File => "files",
            EntityKind::Schema => "schemas",
            EntityKind::Session => "sessions",
        }
    }

    /// All kinds, in registry order.
    pub fn all() -> [EntityKind; 7] {
        [
            EntityKind::Resource,
            EntityKind::Message,
            EntityKind::Moment,
            EntityKind::User,
            EntityKind::File,
            EntityKind::Schema,
            EntityKind::Session,
        ]
    }

    /// Resolve a kind from its table name.
    pub fn from_table_name(table: &str) -> Option<EntityKind> {
        EntityKind::all()
            .into_iter()
            .find(|k| k.table_name() == table)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::all()
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidValue {
                field: "entity_kind".to_string(),
                reason: format!("unknown kind '{s}'"),
            })
    }
}

// ============================================================================
// MESSAGE ROLE
// ============================================================================

/// Role of a conversation turn. Stored as `message_type` on message rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "tool" => Ok(MessageRole::Tool),
            other => Err(ValidationError::InvalidValue {
                field: "message_type".to_string(),
                reason: format!("unknown role '{other}'"),
            }),
        }
    }
}

// ============================================================================
// FILE PROCESSING STATUS
// ============================================================================

/// File ingestion state machine: pending -> processing -> completed | failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Processing => "processing",
            FileStatus::Completed => "completed",
            FileStatus::Failed => "failed",
        }
    }

    /// Whether `next` is a legal transition from this state.
    pub fn can_transition_to(&self, next: FileStatus) -> bool {
        matches!(
            (self, next),
            (FileStatus::Pending, FileStatus::Processing)
                | (FileStatus::Processing, FileStatus::Completed)
                | (FileStatus::Processing, FileStatus::Failed)
        )
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// USER TIER
// ============================================================================

/// Account tier for user entities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserTier {
    #[default]
    Free,
    Pro,
    Enterprise,
}

// ============================================================================
// QUERY KIND
// ============================================================================

/// The five REM query modes. The textual dialect dispatches on these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryKind {
    Lookup,
    Fuzzy,
    Search,
    Sql,
    Traverse,
}

impl QueryKind {
    /// The dialect keyword for this mode.
    pub fn keyword(&self) -> &'static str {
        match self {
            QueryKind::Lookup => "LOOKUP",
            QueryKind::Fuzzy => "FUZZY",
            QueryKind::Search => "SEARCH",
            QueryKind::Sql => "SQL",
            QueryKind::Traverse => "TRAVERSE",
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for QueryKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOOKUP" => Ok(QueryKind::Lookup),
            "FUZZY" => Ok(QueryKind::Fuzzy),
            "SEARCH" => Ok(QueryKind::Search),
            "SQL" => Ok(QueryKind::Sql),
            "TRAVERSE" => Ok(QueryKind::Traverse),
            other => Err(ValidationError::UnknownQueryMode {
                mode: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_table_roundtrip() {
        for kind in EntityKind::all() {
            assert_eq!(EntityKind::from_table_name(kind.table_name()), Some(kind));
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_entity_kind_serde_lowercase() {
        let json = serde_json::to_string(&EntityKind::Moment).unwrap();
        assert_eq!(json, "\"moment\"");
    }

    #[test]
    fn test_query_kind_case_insensitive_parse() {
        assert_eq!("lookup".parse::<QueryKind>().unwrap(), QueryKind::Lookup);
        assert_eq!("Traverse".parse::<QueryKind>().unwrap(), QueryKind::Traverse);
        assert!("EXPLAIN".parse::<QueryKind>().is_err());
    }

    #[test]
    fn test_file_status_transitions() {
        assert!(FileStatus::Pending.can_transition_to(FileStatus::Processing));
        assert!(FileStatus::Processing.can_transition_to(FileStatus::Failed));
        assert!(!FileStatus::Completed.can_transition_to(FileStatus::Pending));
        assert!(!FileStatus::Pending.can_transition_to(FileStatus::Completed));
    }
}
