//! Common entity envelope
//!
//! Every persisted entity carries the same system fields: identity, tenancy,
//! soft-deletion timestamps, free-form metadata, tags, and inline graph
//! edges. Entity structs embed this with `#[serde(flatten)]` so rows
//! round-trip as flat JSON objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::InlineEdge;

/// Tenant used when no isolation scope is supplied.
pub const DEFAULT_TENANT: &str = "default";

/// System fields shared by all entity kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Opaque stable identifier. Assigned on first persist when absent.
    #[serde(default)]
    pub id: Option<Uuid>,
    /// Isolation scope; every query is constrained by it.
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
    /// Optional owner. `None` denotes shared/anonymous data, not a synthetic id.
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    /// Deletion is soft: live queries filter `deleted_at IS NULL`.
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Free-form attribute mapping.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Ordered sequence of short labels.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Inline graph edges originating at this entity.
    #[serde(default)]
    pub graph_edges: Vec<InlineEdge>,
}

fn default_tenant() -> String {
    DEFAULT_TENANT.to_string()
}

impl Default for Envelope {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: None,
            tenant_id: default_tenant(),
            user_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            metadata: Map::new(),
            tags: Vec::new(),
            graph_edges: Vec::new(),
        }
    }
}

impl Envelope {
    /// Envelope scoped to a tenant.
    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            ..Default::default()
        }
    }

    /// Envelope scoped to a tenant and owned by a user.
    pub fn for_user(tenant_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    /// Whether this entity has been soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Read a string metadata value.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_tenant() {
        let envelope = Envelope::default();
        assert_eq!(envelope.tenant_id, DEFAULT_TENANT);
        assert!(envelope.user_id.is_none());
        assert!(!envelope.is_deleted());
    }

    #[test]
    fn test_deserialize_with_missing_fields() {
        let envelope: Envelope = serde_json::from_value(json!({})).unwrap();
        assert_eq!(envelope.tenant_id, DEFAULT_TENANT);
        assert!(envelope.id.is_none());
        assert!(envelope.graph_edges.is_empty());
    }

    #[test]
    fn test_metadata_str() {
        let mut envelope = Envelope::for_user("acme", "u-1");
        envelope
            .metadata
            .insert("tool_name".to_string(), json!("session_partition"));
        assert_eq!(envelope.metadata_str("tool_name"), Some("session_partition"));
        assert_eq!(envelope.metadata_str("missing"), None);
    }
}
