//! Query parameter and result types for the five REM modes
//!
//! These are the typed shapes behind the textual dialect. The parser in
//! `rem-dsl` produces a [`RemQuery`]; the engine in `rem-query` executes it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{EntityKind, QueryKind};

// ============================================================================
// DEFAULTS
// ============================================================================

/// Default trigram similarity threshold for FUZZY.
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.3;

/// Default result limit for FUZZY and SEARCH.
pub const DEFAULT_QUERY_LIMIT: i64 = 10;

/// Default minimum cosine similarity for SEARCH.
pub const DEFAULT_MIN_SIMILARITY: f64 = 0.7;

/// Default result cap for the SQL mode.
pub const DEFAULT_SQL_LIMIT: i64 = 100;

/// Traversal depth ceiling; deeper requests are clamped.
pub const MAX_TRAVERSE_DEPTH: i32 = 5;

// ============================================================================
// PARAMETERS
// ============================================================================

/// Exact key-store lookup. Multiple keys resolve in one round-trip; results
/// concatenate in request order. Unknown keys yield empty results, not errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupParams {
    pub keys: Vec<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl LookupParams {
    pub fn single(key: impl Into<String>) -> Self {
        Self {
            keys: vec![key.into()],
            user_id: None,
        }
    }
}

/// Trigram text similarity against the key-store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuzzyParams {
    pub query_text: String,
    #[serde(default = "default_fuzzy_threshold")]
    pub threshold: f64,
    #[serde(default = "default_query_limit")]
    pub limit: i64,
    #[serde(default)]
    pub user_id: Option<String>,
}

fn default_fuzzy_threshold() -> f64 {
    DEFAULT_FUZZY_THRESHOLD
}

fn default_query_limit() -> i64 {
    DEFAULT_QUERY_LIMIT
}

impl FuzzyParams {
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            threshold: DEFAULT_FUZZY_THRESHOLD,
            limit: DEFAULT_QUERY_LIMIT,
            user_id: None,
        }
    }
}

/// Semantic vector search over one embeddable field of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    pub query_text: String,
    pub table_name: String,
    /// Defaults to `content` when the table has one.
    #[serde(default)]
    pub field_name: Option<String>,
    #[serde(default)]
    pub min_similarity: Option<f64>,
    #[serde(default)]
    pub limit: Option<i64>,
    /// Embedding provider; must match the provider used at write time.
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl SearchParams {
    pub fn new(query_text: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            table_name: table_name.into(),
            field_name: None,
            min_similarity: None,
            limit: None,
            provider: None,
            user_id: None,
        }
    }
}

/// Structured filter over one entity table. The where clause is appended
/// under parentheses with tenant isolation and soft-delete conjuncts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlParams {
    pub table_name: String,
    #[serde(default)]
    pub where_clause: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// Graph traversal from a start key. Depth 0 is PLAN mode: a summary of
/// outgoing edge types without expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraverseParams {
    pub start_key: String,
    /// Edge type filter; empty or `["*"]` means all.
    #[serde(default)]
    pub edge_types: Vec<String>,
    #[serde(default = "default_traverse_depth")]
    pub max_depth: i32,
    #[serde(default)]
    pub user_id: Option<String>,
}

fn default_traverse_depth() -> i32 {
    1
}

impl TraverseParams {
    pub fn new(start_key: impl Into<String>) -> Self {
        Self {
            start_key: start_key.into(),
            edge_types: Vec::new(),
            max_depth: 1,
            user_id: None,
        }
    }

    /// Whether the edge filter matches everything.
    pub fn follows_all_edges(&self) -> bool {
        self.edge_types.is_empty() || self.edge_types.iter().any(|t| t == "*")
    }
}

/// Typed parameters for one of the five modes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "query_type", content = "parameters", rename_all = "UPPERCASE")]
pub enum QueryParams {
    Lookup(LookupParams),
    Fuzzy(FuzzyParams),
    Search(SearchParams),
    Sql(SqlParams),
    Traverse(TraverseParams),
}

impl QueryParams {
    pub fn kind(&self) -> QueryKind {
        match self {
            QueryParams::Lookup(_) => QueryKind::Lookup,
            QueryParams::Fuzzy(_) => QueryKind::Fuzzy,
            QueryParams::Search(_) => QueryKind::Search,
            QueryParams::Sql(_) => QueryKind::Sql,
            QueryParams::Traverse(_) => QueryKind::Traverse,
        }
    }
}

/// A fully-bound REM query: tenant scope plus typed parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemQuery {
    pub tenant_id: String,
    #[serde(flatten)]
    pub params: QueryParams,
}

impl RemQuery {
    pub fn new(tenant_id: impl Into<String>, params: QueryParams) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            params,
        }
    }

    pub fn kind(&self) -> QueryKind {
        self.params.kind()
    }
}

// ============================================================================
// RESULTS
// ============================================================================

/// One key-store row. Wire-stable for cross-tool consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyStoreEntry {
    pub entity_key: String,
    pub entity_kind: EntityKind,
    pub entity_id: Uuid,
    pub user_id: Option<String>,
    pub content_summary: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

/// FUZZY match: key-store row plus trigram similarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuzzyHit {
    #[serde(flatten)]
    pub entry: KeyStoreEntry,
    pub similarity: f64,
}

/// SEARCH match: entity reference plus cosine similarity in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub entity_key: String,
    pub entity_kind: EntityKind,
    pub entity_id: Uuid,
    pub similarity: f64,
    pub content_summary: Option<String>,
}

/// One node reached by TRAVERSE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraverseNode {
    pub depth: i32,
    pub entity_key: String,
    pub entity_kind: EntityKind,
    pub entity_id: Uuid,
    /// Relationship that reached this node.
    pub rel_type: String,
    pub weight: f32,
    /// Keys from the start node to this node, inclusive.
    pub path: Vec<String>,
    pub content_summary: Option<String>,
}

/// PLAN-mode summary of one outgoing edge type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeTypeSummary {
    pub rel_type: String,
    pub count: i64,
}

/// Result of executing a [`RemQuery`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "query_type", rename_all = "UPPERCASE")]
pub enum QueryOutput {
    Lookup { entries: Vec<KeyStoreEntry> },
    Fuzzy { hits: Vec<FuzzyHit> },
    Search { hits: Vec<SearchHit> },
    Sql { rows: Vec<Value> },
    Traverse { nodes: Vec<TraverseNode> },
    /// Depth-0 traversal: edge-type cardinalities, no expansion.
    TraversePlan {
        start_key: String,
        edge_types: Vec<EdgeTypeSummary>,
    },
}

impl QueryOutput {
    /// Number of result rows (PLAN counts edge-type summaries).
    pub fn count(&self) -> usize {
        match self {
            QueryOutput::Lookup { entries } => entries.len(),
            QueryOutput::Fuzzy { hits } => hits.len(),
            QueryOutput::Search { hits } => hits.len(),
            QueryOutput::Sql { rows } => rows.len(),
            QueryOutput::Traverse { nodes } => nodes.len(),
            QueryOutput::TraversePlan { edge_types, .. } => edge_types.len(),
        }
    }

    pub fn kind(&self) -> QueryKind {
        match self {
            QueryOutput::Lookup { .. } => QueryKind::Lookup,
            QueryOutput::Fuzzy { .. } => QueryKind::Fuzzy,
            QueryOutput::Search { .. } => QueryKind::Search,
            QueryOutput::Sql { .. } => QueryKind::Sql,
            QueryOutput::Traverse { .. } | QueryOutput::TraversePlan { .. } => QueryKind::Traverse,
        }
    }

    /// Flat JSON rows for tool consumers.
    pub fn rows_json(&self) -> Vec<Value> {
        match self {
            QueryOutput::Lookup { entries } => entries
                .iter()
                .map(|e| serde_json::to_value(e).unwrap_or(Value::Null))
                .collect(),
            QueryOutput::Fuzzy { hits } => hits
                .iter()
                .map(|h| serde_json::to_value(h).unwrap_or(Value::Null))
                .collect(),
            QueryOutput::Search { hits } => hits
                .iter()
                .map(|h| serde_json::to_value(h).unwrap_or(Value::Null))
                .collect(),
            QueryOutput::Sql { rows } => rows.clone(),
            QueryOutput::Traverse { nodes } => nodes
                .iter()
                .map(|n| serde_json::to_value(n).unwrap_or(Value::Null))
                .collect(),
            QueryOutput::TraversePlan { edge_types, .. } => edge_types
                .iter()
                .map(|s| serde_json::to_value(s).unwrap_or(Value::Null))
                .collect(),
        }
    }
}

/// A moment's timestamps must be ordered; helper shared by builder and tests.
pub fn timestamps_ordered(starts: DateTime<Utc>, ends: Option<DateTime<Utc>>) -> bool {
    match ends {
        Some(e) => starts <= e,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_params_kind() {
        let q = QueryParams::Lookup(LookupParams::single("sarah-chen"));
        assert_eq!(q.kind(), QueryKind::Lookup);

        let q = QueryParams::Traverse(TraverseParams::new("doc-a"));
        assert_eq!(q.kind(), QueryKind::Traverse);
    }

    #[test]
    fn test_wildcard_edge_filter() {
        let mut params = TraverseParams::new("doc-a");
        assert!(params.follows_all_edges());
        params.edge_types = vec!["*".to_string()];
        assert!(params.follows_all_edges());
        params.edge_types = vec!["references".to_string()];
        assert!(!params.follows_all_edges());
    }

    #[test]
    fn test_fuzzy_defaults_from_json() {
        let params: FuzzyParams =
            serde_json::from_value(serde_json::json!({"query_text": "arcitecture"})).unwrap();
        assert_eq!(params.threshold, DEFAULT_FUZZY_THRESHOLD);
        assert_eq!(params.limit, DEFAULT_QUERY_LIMIT);
    }

    #[test]
    fn test_output_count() {
        let output = QueryOutput::TraversePlan {
            start_key: "doc-a".to_string(),
            edge_types: vec![
                EdgeTypeSummary {
                    rel_type: "references".to_string(),
                    count: 3,
                },
                EdgeTypeSummary {
                    rel_type: "builds_on".to_string(),
                    count: 1,
                },
            ],
        };
        assert_eq!(output.count(), 2);
        assert_eq!(output.kind(), QueryKind::Traverse);
    }

    #[test]
    fn test_query_serde_tagging() {
        let query = RemQuery::new(
            "acme",
            QueryParams::Fuzzy(FuzzyParams::new("Sara")),
        );
        let value = serde_json::to_value(&query).unwrap();
        assert_eq!(value["query_type"], "FUZZY");
        assert_eq!(value["tenant_id"], "acme");
        let back: RemQuery = serde_json::from_value(value).unwrap();
        assert_eq!(back, query);
    }
}
