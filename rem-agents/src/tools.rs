//! Tool registry and the REM tool set
//!
//! Tools expose REM operations to agents with typed argument schemas. The
//! registry is populated from a static manifest at process start and is
//! read-only afterwards; registration is idempotent. Contextual identifiers
//! (tenant, user, session) are injected from the invocation context, never
//! taken from model-supplied arguments.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use rem_core::{AgentError, InlineEdge, RemError, RemQuery, RemResult, ValidationError};
use rem_query::RemEngine;
use rem_storage::Repository;
use serde_json::{json, Value};

use crate::EventSink;

// ============================================================================
// TOOL TRAIT & CONTEXT
// ============================================================================

/// Invocation scope injected into every tool call.
#[derive(Clone, Default)]
pub struct ToolContext {
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    /// Sink for events from child agents spawned inside a tool.
    pub event_sink: Option<EventSink>,
}

impl ToolContext {
    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            ..Default::default()
        }
    }
}

/// An invokable tool with a typed argument schema.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Description the agent uses to decide when to invoke the tool.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's arguments.
    fn parameters(&self) -> Value;

    async fn invoke(&self, arguments: Value, context: &ToolContext) -> RemResult<Value>;
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Startup-registered, read-only map of tool names to implementations.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Idempotent: re-registering a name replaces the
    /// previous entry with a debug log, so repeated manifest application
    /// is harmless.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        let mut tools = self.tools.write().expect("tool registry lock");
        if tools.insert(name.clone(), tool).is_some() {
            tracing::debug!(tool = %name, "tool re-registered");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().expect("tool registry lock").get(name).cloned()
    }

    /// Resolve a tool or fail with the typed agent error.
    pub fn require(&self, name: &str) -> RemResult<Arc<dyn Tool>> {
        self.get(name).ok_or_else(|| {
            AgentError::ToolNotFound {
                name: name.to_string(),
            }
            .into()
        })
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .read()
            .expect("tool registry lock")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

// ============================================================================
// ARGUMENT HELPERS
// ============================================================================

fn require_str(arguments: &Value, name: &str) -> RemResult<String> {
    arguments
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            ValidationError::MissingParameter {
                name: name.to_string(),
            }
            .into()
        })
}

// ============================================================================
// QUERY TOOLS
// ============================================================================

/// Execute a REM dialect query string.
pub struct RemQueryTool {
    engine: RemEngine,
}

impl RemQueryTool {
    pub fn new(engine: RemEngine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Tool for RemQueryTool {
    fn name(&self) -> &str {
        "rem_query"
    }

    fn description(&self) -> &str {
        "Execute a REM query. Modes: LOOKUP <key> (exact), FUZZY <text> (typo-tolerant), \
         SEARCH <text> table=<name> (semantic), SQL table=<name> where=\"...\" (filters), \
         TRAVERSE <key> depth=<n> (graph; depth=0 previews edge types)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "REM dialect query string, e.g. 'LOOKUP sarah-chen'",
                }
            },
            "required": ["query"],
            "additionalProperties": false,
        })
    }

    async fn invoke(&self, arguments: Value, context: &ToolContext) -> RemResult<Value> {
        let query_text = require_str(&arguments, "query")?;
        let mut params = rem_dsl::parse(&query_text)?;

        // Inject caller scope; model-supplied user ids are not trusted.
        inject_user_scope(&mut params, context.user_id.as_deref());
        let output = self
            .engine
            .execute(&RemQuery::new(context.tenant_id.clone(), params))
            .await?;

        Ok(json!({
            "query_type": output.kind().keyword(),
            "count": output.count(),
            "results": output.rows_json(),
        }))
    }
}

pub(crate) fn inject_user_scope(params: &mut rem_core::QueryParams, user_id: Option<&str>) {
    let user_id = user_id.map(str::to_string);
    match params {
        rem_core::QueryParams::Lookup(p) => p.user_id = user_id,
        rem_core::QueryParams::Fuzzy(p) => p.user_id = user_id,
        rem_core::QueryParams::Search(p) => p.user_id = user_id,
        rem_core::QueryParams::Traverse(p) => p.user_id = user_id,
        rem_core::QueryParams::Sql(_) => {}
    }
}

// ============================================================================
// WRITE TOOLS
// ============================================================================

/// Create a resource with content.
pub struct CreateResourceTool {
    resources: Repository,
}

impl CreateResourceTool {
    pub fn new(resources: Repository) -> Self {
        Self { resources }
    }
}

#[async_trait]
impl Tool for CreateResourceTool {
    fn name(&self) -> &str {
        "create_resource"
    }

    fn description(&self) -> &str {
        "Store a new resource (document, note, captured content) in memory. \
         Returns the persisted entity including its key."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "description": "Human-readable resource name"},
                "uri": {"type": "string", "description": "Stable URI; defaults to a slug of the name"},
                "content": {"type": "string"},
                "category": {"type": "string"},
                "tags": {"type": "array", "items": {"type": "string"}},
            },
            "required": ["name", "content"],
            "additionalProperties": false,
        })
    }

    async fn invoke(&self, arguments: Value, context: &ToolContext) -> RemResult<Value> {
        let name = require_str(&arguments, "name")?;
        let content = require_str(&arguments, "content")?;
        let uri = arguments
            .get("uri")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| rem_core::slugify(&name));

        self.resources
            .upsert_one(json!({
                "tenant_id": context.tenant_id,
                "user_id": context.user_id,
                "name": name,
                "uri": uri,
                "ordinal": 0,
                "content": content,
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "category": arguments.get("category").cloned().unwrap_or(Value::Null),
                "tags": arguments.get("tags").cloned().unwrap_or(json!([])),
            }))
            .await
    }
}

/// Create a moment directly (outside the compaction pipeline).
pub struct CreateMomentTool {
    moments: Repository,
}

impl CreateMomentTool {
    pub fn new(moments: Repository) -> Self {
        Self { moments }
    }
}

#[async_trait]
impl Tool for CreateMomentTool {
    fn name(&self) -> &str {
        "create_moment"
    }

    fn description(&self) -> &str {
        "Record a moment: a named temporal narrative (meeting, session, event) \
         with tags and a time range."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "summary": {"type": "string"},
                "moment_type": {"type": "string"},
                "topic_tags": {"type": "array", "items": {"type": "string"}},
                "emotion_tags": {"type": "array", "items": {"type": "string"}},
                "starts_timestamp": {"type": "string", "description": "ISO timestamp"},
                "ends_timestamp": {"type": "string", "description": "ISO timestamp"},
            },
            "required": ["name", "summary", "starts_timestamp"],
            "additionalProperties": false,
        })
    }

    async fn invoke(&self, arguments: Value, context: &ToolContext) -> RemResult<Value> {
        let name = require_str(&arguments, "name")?;
        let summary = require_str(&arguments, "summary")?;
        let starts = require_str(&arguments, "starts_timestamp")?;

        self.moments
            .upsert_one(json!({
                "tenant_id": context.tenant_id,
                "user_id": context.user_id,
                "name": rem_core::slugify(&name),
                "summary": summary,
                "moment_type": arguments.get("moment_type").cloned().unwrap_or(Value::Null),
                "topic_tags": arguments.get("topic_tags").cloned().unwrap_or(json!([])),
                "emotion_tags": arguments.get("emotion_tags").cloned().unwrap_or(json!([])),
                "starts_timestamp": starts,
                "ends_timestamp": arguments.get("ends_timestamp").cloned().unwrap_or(Value::Null),
                "source_session_id": context.session_id,
            }))
            .await
    }
}

/// Add or update inline edges on an entity.
pub struct UpdateGraphEdgesTool {
    repositories: HashMap<String, Repository>,
}

impl UpdateGraphEdgesTool {
    pub fn new(repositories: HashMap<String, Repository>) -> Self {
        Self { repositories }
    }
}

#[async_trait]
impl Tool for UpdateGraphEdgesTool {
    fn name(&self) -> &str {
        "update_graph_edges"
    }

    fn description(&self) -> &str {
        "Attach graph edges to an entity. Each edge points at a destination \
         natural key with a relationship type and a weight in [0,1]. Existing \
         edges to the same (dst, rel_type) are replaced."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "table": {"type": "string", "description": "Entity table, e.g. 'resources'"},
                "entity_key": {"type": "string", "description": "Natural key of the source entity"},
                "edges": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "dst": {"type": "string"},
                            "rel_type": {"type": "string"},
                            "weight": {"type": "number"},
                        },
                        "required": ["dst", "rel_type"],
                    },
                },
            },
            "required": ["table", "entity_key", "edges"],
            "additionalProperties": false,
        })
    }

    async fn invoke(&self, arguments: Value, context: &ToolContext) -> RemResult<Value> {
        let table = require_str(&arguments, "table")?;
        let entity_key = require_str(&arguments, "entity_key")?;
        let new_edges: Vec<InlineEdge> = serde_json::from_value(
            arguments.get("edges").cloned().unwrap_or(json!([])),
        )
        .map_err(|e| ValidationError::InvalidValue {
            field: "edges".to_string(),
            reason: e.to_string(),
        })?;

        let repository = self
            .repositories
            .get(&table)
            .ok_or(ValidationError::UnknownTable { table: table.clone() })?;
        let key_field = repository.descriptor().entity_key_field.clone();

        let mut rows = repository
            .fetch_many(&[(key_field.as_str(), json!(entity_key))], None, Some(1))
            .await?;
        let Some(mut row) = rows.pop() else {
            return Err(rem_core::NotFoundError::Key { key: entity_key }.into());
        };
        if row.get("tenant_id").and_then(Value::as_str) != Some(context.tenant_id.as_str()) {
            return Err(rem_core::NotFoundError::Key { key: entity_key }.into());
        }

        let mut edges: Vec<InlineEdge> = row
            .get("graph_edges")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        for new_edge in new_edges {
            edges.retain(|e| !(e.dst == new_edge.dst && e.rel_type == new_edge.rel_type));
            edges.push(new_edge);
        }
        let edge_count = edges.len();

        if let Value::Object(object) = &mut row {
            object.insert("graph_edges".to_string(), serde_json::to_value(&edges)?);
        }
        let persisted = repository.upsert_one(row).await?;
        Ok(json!({
            "entity_key": entity_key,
            "edge_count": edge_count,
            "entity_id": persisted.get("id").cloned().unwrap_or(Value::Null),
        }))
    }
}

// ============================================================================
// FILE TOOLS
// ============================================================================

/// Narrow interface to a binary store; the cloud adapters live outside the
/// core and implement this.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn store(&self, name: &str, bytes: &[u8]) -> RemResult<String>;
    async fn fetch(&self, uri: &str) -> RemResult<Vec<u8>>;
}

/// Filesystem-backed store for development and tests.
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn store(&self, name: &str, bytes: &[u8]) -> RemResult<String> {
        let safe_name = rem_core::slugify(name);
        let path = self.root.join(&safe_name);
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| RemError::query_execution(e.to_string()))?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| RemError::query_execution(e.to_string()))?;
        Ok(format!("file://{}", path.display()))
    }

    async fn fetch(&self, uri: &str) -> RemResult<Vec<u8>> {
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        tokio::fs::read(path)
            .await
            .map_err(|e| RemError::query_execution(e.to_string()))
    }
}

/// Upload a file and register its entity row.
pub struct UploadFileTool {
    files: Repository,
    store: Arc<dyn FileStore>,
}

impl UploadFileTool {
    pub fn new(files: Repository, store: Arc<dyn FileStore>) -> Self {
        Self { files, store }
    }
}

#[async_trait]
impl Tool for UploadFileTool {
    fn name(&self) -> &str {
        "upload_file"
    }

    fn description(&self) -> &str {
        "Upload base64-encoded file content. Returns the file entity with its URI."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "content_base64": {"type": "string"},
                "mime_type": {"type": "string"},
            },
            "required": ["name", "content_base64"],
            "additionalProperties": false,
        })
    }

    async fn invoke(&self, arguments: Value, context: &ToolContext) -> RemResult<Value> {
        let name = require_str(&arguments, "name")?;
        let encoded = require_str(&arguments, "content_base64")?;
        let bytes = base64_decode(&encoded).ok_or_else(|| ValidationError::InvalidValue {
            field: "content_base64".to_string(),
            reason: "invalid base64".to_string(),
        })?;

        let uri = self.store.store(&name, &bytes).await?;
        self.files
            .upsert_one(json!({
                "tenant_id": context.tenant_id,
                "user_id": context.user_id,
                "uri": uri,
                "name": name,
                "mime_type": arguments.get("mime_type").cloned().unwrap_or(Value::Null),
                "size_bytes": bytes.len() as i64,
                "processing_status": "pending",
            }))
            .await
    }
}

/// Download a previously uploaded file.
pub struct DownloadFileTool {
    store: Arc<dyn FileStore>,
}

impl DownloadFileTool {
    pub fn new(store: Arc<dyn FileStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for DownloadFileTool {
    fn name(&self) -> &str {
        "download_file"
    }

    fn description(&self) -> &str {
        "Download a file by URI; returns base64-encoded content."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"uri": {"type": "string"}},
            "required": ["uri"],
            "additionalProperties": false,
        })
    }

    async fn invoke(&self, arguments: Value, _context: &ToolContext) -> RemResult<Value> {
        let uri = require_str(&arguments, "uri")?;
        let bytes = self.store.fetch(&uri).await?;
        Ok(json!({
            "uri": uri,
            "size_bytes": bytes.len(),
            "content_base64": base64_encode(&bytes),
        }))
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn base64_decode(text: &str) -> Option<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(text.trim()).ok()
}
