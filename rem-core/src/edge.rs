//! Inline graph edges
//!
//! REM stores graph edges inline on the source row rather than in a separate
//! edge table, which removes a join from the forward-traversal hot path.
//! Destinations are human-readable natural keys, never internal ids, so an
//! agent can follow an edge with a plain LOOKUP. Dangling edges are legal:
//! the destination may not exist yet.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Property key conventionally carrying the destination's display name.
pub const EDGE_PROP_DST_NAME: &str = "dst_name";

/// Property key conventionally carrying the destination's entity kind.
pub const EDGE_PROP_DST_ENTITY_TYPE: &str = "dst_entity_type";

/// A directed, weighted, typed reference from the containing entity to a
/// destination identified by natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineEdge {
    /// Destination natural key (e.g. "sarah-chen", "docs://getting-started.md").
    pub dst: String,
    /// Relationship label (e.g. "references", "authored_by").
    pub rel_type: String,
    /// Relationship strength in [0, 1].
    #[serde(default = "default_weight")]
    pub weight: f32,
    /// Free-form properties; see `EDGE_PROP_DST_NAME` / `EDGE_PROP_DST_ENTITY_TYPE`.
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_weight() -> f32 {
    0.5
}

impl InlineEdge {
    /// Create an edge with the default weight. The weight is clamped to [0, 1].
    pub fn new(dst: impl Into<String>, rel_type: impl Into<String>) -> Self {
        Self {
            dst: dst.into(),
            rel_type: rel_type.into(),
            weight: default_weight(),
            properties: Map::new(),
            created_at: Utc::now(),
        }
    }

    /// Set the edge weight, clamped to [0, 1].
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight.clamp(0.0, 1.0);
        self
    }

    /// Attach a property value.
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Destination display name, if the convention property is present.
    pub fn dst_name(&self) -> Option<&str> {
        self.properties.get(EDGE_PROP_DST_NAME).and_then(Value::as_str)
    }

    /// Destination entity kind label, if the convention property is present.
    pub fn dst_entity_type(&self) -> Option<&str> {
        self.properties
            .get(EDGE_PROP_DST_ENTITY_TYPE)
            .and_then(Value::as_str)
    }
}

/// Filter edges to those whose `rel_type` is in `rel_types`.
pub fn filter_by_rel_type<'a>(edges: &'a [InlineEdge], rel_types: &[String]) -> Vec<&'a InlineEdge> {
    edges
        .iter()
        .filter(|e| rel_types.iter().any(|t| t == &e.rel_type))
        .collect()
}

/// Filter edges to those at or above `min_weight`.
pub fn filter_by_weight(edges: &[InlineEdge], min_weight: f32) -> Vec<&InlineEdge> {
    edges.iter().filter(|e| e.weight >= min_weight).collect()
}
