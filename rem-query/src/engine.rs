//! Query engine dispatch
//!
//! One dispatch path per mode. SEARCH validates against the entity
//! descriptors before touching the store; TRAVERSE runs breadth-first in
//! the engine, one edge-batch round-trip per depth level.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use rem_core::{
    EntityKind, FuzzyParams, KeyStoreEntry, LookupParams, ModelRegistry, QueryOutput, QueryParams,
    RemError, RemQuery, RemResult, SearchParams, SqlParams, TraverseNode, TraverseParams,
    ValidationError, DEFAULT_MIN_SIMILARITY, DEFAULT_QUERY_LIMIT, DEFAULT_SQL_LIMIT,
    EdgeTypeSummary, MAX_TRAVERSE_DEPTH,
};
use rem_llm::EmbeddingProvider;
use uuid::Uuid;

use crate::QueryBackend;

/// The REM query engine.
///
/// Holds the backend, the descriptor registry for validation, and the
/// embedding provider used to embed SEARCH query text with the same
/// provider used at write time.
#[derive(Clone)]
pub struct RemEngine {
    backend: Arc<dyn QueryBackend>,
    registry: Arc<ModelRegistry>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl RemEngine {
    pub fn new(
        backend: Arc<dyn QueryBackend>,
        registry: Arc<ModelRegistry>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            backend,
            registry,
            embedder,
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Execute a bound query.
    pub async fn execute(&self, query: &RemQuery) -> RemResult<QueryOutput> {
        let tenant_id = query.tenant_id.as_str();
        match &query.params {
            QueryParams::Lookup(params) => self.execute_lookup(params, tenant_id).await,
            QueryParams::Fuzzy(params) => self.execute_fuzzy(params, tenant_id).await,
            QueryParams::Search(params) => self.execute_search(params, tenant_id).await,
            QueryParams::Sql(params) => self.execute_sql(params, tenant_id).await,
            QueryParams::Traverse(params) => self.execute_traverse(params, tenant_id).await,
        }
    }

    // ========================================================================
    // LOOKUP
    // ========================================================================

    /// O(1) per key; all keys resolve in a single round-trip and results
    /// concatenate in request order. Unknown keys yield nothing.
    async fn execute_lookup(
        &self,
        params: &LookupParams,
        tenant_id: &str,
    ) -> RemResult<QueryOutput> {
        if params.keys.is_empty() {
            return Ok(QueryOutput::Lookup { entries: Vec::new() });
        }

        let found = self
            .backend
            .lookup(&params.keys, tenant_id, params.user_id.as_deref())
            .await?;

        let mut entries = Vec::with_capacity(found.len());
        for key in &params.keys {
            entries.extend(found.iter().filter(|e| &e.entity_key == key).cloned());
        }
        Ok(QueryOutput::Lookup { entries })
    }

    // ========================================================================
    // FUZZY
    // ========================================================================

    async fn execute_fuzzy(&self, params: &FuzzyParams, tenant_id: &str) -> RemResult<QueryOutput> {
        if !(0.0..=1.0).contains(&params.threshold) {
            return Err(ValidationError::InvalidValue {
                field: "threshold".to_string(),
                reason: format!("must be in [0, 1], got {}", params.threshold),
            }
            .into());
        }
        let hits = self
            .backend
            .fuzzy(
                &params.query_text,
                params.threshold,
                params.limit.max(0),
                tenant_id,
                params.user_id.as_deref(),
            )
            .await?;
        Ok(QueryOutput::Fuzzy { hits })
    }

    // ========================================================================
    // SEARCH
    // ========================================================================

    async fn execute_search(
        &self,
        params: &SearchParams,
        tenant_id: &str,
    ) -> RemResult<QueryOutput> {
        let descriptor = self.registry.require(&params.table_name)?;

        // Default to `content` when the table has one.
        let field_name = match &params.field_name {
            Some(field) => field.clone(),
            None => {
                if descriptor.has_field("content") {
                    "content".to_string()
                } else {
                    return Err(RemError::ContentFieldNotFound {
                        table: descriptor.table_name.clone(),
                        available: descriptor.field_names(),
                    });
                }
            }
        };

        if !descriptor.has_field(&field_name) {
            return Err(RemError::FieldNotFound {
                table: descriptor.table_name.clone(),
                field: field_name,
                available: descriptor.field_names(),
            });
        }
        let embeddable = descriptor.embeddable_fields();
        if !embeddable.contains(&field_name) {
            return Err(RemError::EmbeddingFieldNotFound {
                table: descriptor.table_name.clone(),
                field: field_name,
                embeddable,
            });
        }

        // Query embedding must come from the provider used at write time.
        let provider = params
            .provider
            .clone()
            .unwrap_or_else(|| self.embedder.provider_name().to_string());
        let vectors = self
            .embedder
            .embed_batch(std::slice::from_ref(&params.query_text))
            .await?;
        let embedding = vectors
            .into_iter()
            .next()
            .ok_or_else(|| RemError::provider(&provider, "empty embedding batch"))?;

        let hits = self
            .backend
            .vector_search(
                &embedding,
                &params.table_name,
                &field_name,
                &provider,
                params.min_similarity.unwrap_or(DEFAULT_MIN_SIMILARITY),
                params.limit.unwrap_or(DEFAULT_QUERY_LIMIT).max(0),
                tenant_id,
                params.user_id.as_deref(),
            )
            .await?;
        Ok(QueryOutput::Search { hits })
    }

    // ========================================================================
    // SQL
    // ========================================================================

    /// Structured filters the other modes cannot express. The table comes
    /// from the allow-list; the clause is appended under parentheses with
    /// implicit tenant and soft-delete conjuncts. Identifiers are never
    /// interpolated from input, and a clause that could close the wrapping
    /// parentheses (detaching the tenant conjuncts) is rejected.
    async fn execute_sql(&self, params: &SqlParams, tenant_id: &str) -> RemResult<QueryOutput> {
        let descriptor = self.registry.require(&params.table_name)?;

        let clause = params.where_clause.as_deref().unwrap_or("1=1").trim();
        let clause = if clause.is_empty() { "1=1" } else { clause };
        if clause.contains(';') {
            return Err(ValidationError::InvalidValue {
                field: "where".to_string(),
                reason: "statement separators are not allowed".to_string(),
            }
            .into());
        }
        if clause_escapes_parens(clause) {
            return Err(ValidationError::InvalidValue {
                field: "where".to_string(),
                reason: "unbalanced parentheses or string literal".to_string(),
            }
            .into());
        }

        let rows = self
            .backend
            .sql_filter(
                &descriptor.table_name,
                clause,
                params.limit.unwrap_or(DEFAULT_SQL_LIMIT).max(0),
                tenant_id,
            )
            .await?;
        Ok(QueryOutput::Sql { rows })
    }

    // ========================================================================
    // TRAVERSE
    // ========================================================================

    async fn execute_traverse(
        &self,
        params: &TraverseParams,
        tenant_id: &str,
    ) -> RemResult<QueryOutput> {
        let max_depth = params.max_depth.min(MAX_TRAVERSE_DEPTH);

        // A start key that parses as a UUID resolves through the key-store.
        let start = match Uuid::parse_str(&params.start_key) {
            Ok(id) => self.backend.lookup_by_id(id, tenant_id).await?,
            Err(_) => self
                .backend
                .lookup(
                    std::slice::from_ref(&params.start_key),
                    tenant_id,
                    params.user_id.as_deref(),
                )
                .await?
                .into_iter()
                .next(),
        };

        let Some(start) = start else {
            // Unknown start behaves like an unknown LOOKUP key.
            return Ok(if max_depth == 0 {
                QueryOutput::TraversePlan {
                    start_key: params.start_key.clone(),
                    edge_types: Vec::new(),
                }
            } else {
                QueryOutput::Traverse { nodes: Vec::new() }
            });
        };

        if max_depth == 0 {
            return self.traverse_plan(params, &start, tenant_id).await;
        }
        self.traverse_bfs(params, start, max_depth, tenant_id).await
    }

    /// PLAN mode: edge types and cardinalities at the start node, nothing
    /// followed. Lets an agent pick a selective filter before expanding.
    async fn traverse_plan(
        &self,
        params: &TraverseParams,
        start: &KeyStoreEntry,
        tenant_id: &str,
    ) -> RemResult<QueryOutput> {
        let edges = self
            .outgoing_edges(start.entity_kind, &[start.entity_key.clone()], tenant_id)
            .await?;

        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        for (_, edge) in edges {
            if self.edge_selected(params, &edge.rel_type) {
                *counts.entry(edge.rel_type).or_insert(0) += 1;
            }
        }

        let mut edge_types: Vec<EdgeTypeSummary> = counts
            .into_iter()
            .map(|(rel_type, count)| EdgeTypeSummary { rel_type, count })
            .collect();
        edge_types.sort_by(|a, b| b.count.cmp(&a.count).then(a.rel_type.cmp(&b.rel_type)));

        Ok(QueryOutput::TraversePlan {
            start_key: start.entity_key.clone(),
            edge_types,
        })
    }

    /// Breadth-first expansion with cycle detection keyed by (kind, key).
    /// One edge-batch round-trip per (depth level, entity kind); soft-deleted
    /// and dangling destinations are skipped, not expanded through.
    async fn traverse_bfs(
        &self,
        params: &TraverseParams,
        start: KeyStoreEntry,
        max_depth: i32,
        tenant_id: &str,
    ) -> RemResult<QueryOutput> {
        let mut visited: HashSet<(EntityKind, String)> = HashSet::new();
        visited.insert((start.entity_kind, start.entity_key.clone()));

        let mut nodes: Vec<TraverseNode> = Vec::new();
        let start_path = vec![start.entity_key.clone()];
        let mut frontier: Vec<(KeyStoreEntry, Vec<String>)> = vec![(start, start_path)];

        for depth in 1..=max_depth {
            if frontier.is_empty() {
                break;
            }

            // Group frontier keys by kind for batched edge fetches.
            let mut keys_by_kind: BTreeMap<EntityKind, Vec<String>> = BTreeMap::new();
            for (entry, _) in &frontier {
                keys_by_kind
                    .entry(entry.entity_kind)
                    .or_default()
                    .push(entry.entity_key.clone());
            }

            let mut edges_by_source: BTreeMap<String, Vec<rem_core::InlineEdge>> = BTreeMap::new();
            for (kind, keys) in &keys_by_kind {
                for (source, edge) in self.outgoing_edges(*kind, keys, tenant_id).await? {
                    edges_by_source.entry(source).or_default().push(edge);
                }
            }

            // Candidate edges in deterministic order: frontier order, then
            // weight descending, rel_type ascending, destination ascending.
            let mut candidates: Vec<(Vec<String>, rem_core::InlineEdge)> = Vec::new();
            let mut dst_keys: Vec<String> = Vec::new();
            for (entry, path) in &frontier {
                let Some(mut edges) = edges_by_source.remove(&entry.entity_key) else {
                    continue;
                };
                edges.retain(|e| self.edge_selected(params, &e.rel_type));
                edges.sort_by(|a, b| {
                    b.weight
                        .partial_cmp(&a.weight)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.rel_type.cmp(&b.rel_type))
                        .then_with(|| a.dst.cmp(&b.dst))
                });
                for edge in edges {
                    dst_keys.push(edge.dst.clone());
                    candidates.push((path.clone(), edge));
                }
            }

            if candidates.is_empty() {
                break;
            }

            // Resolve destinations in one round-trip. Dangling edges and
            // tombstoned targets simply fail to resolve here.
            dst_keys.sort();
            dst_keys.dedup();
            let resolved = self
                .backend
                .lookup(&dst_keys, tenant_id, params.user_id.as_deref())
                .await?;
            let mut by_key: BTreeMap<&str, Vec<&KeyStoreEntry>> = BTreeMap::new();
            for entry in &resolved {
                by_key.entry(entry.entity_key.as_str()).or_default().push(entry);
            }

            let mut next_frontier: Vec<(KeyStoreEntry, Vec<String>)> = Vec::new();
            for (path, edge) in candidates {
                let Some(matches) = by_key.get(edge.dst.as_str()) else {
                    continue;
                };
                for entry in matches {
                    // An edge may pin the destination kind via properties;
                    // otherwise every kind sharing the key matches.
                    if let Some(kind_hint) = edge.dst_entity_type() {
                        if kind_hint != entry.entity_kind.as_str() {
                            continue;
                        }
                    }
                    if !visited.insert((entry.entity_kind, entry.entity_key.clone())) {
                        continue;
                    }
                    let mut node_path = path.clone();
                    node_path.push(entry.entity_key.clone());
                    nodes.push(TraverseNode {
                        depth,
                        entity_key: entry.entity_key.clone(),
                        entity_kind: entry.entity_kind,
                        entity_id: entry.entity_id,
                        rel_type: edge.rel_type.clone(),
                        weight: edge.weight,
                        path: node_path.clone(),
                        content_summary: entry.content_summary.clone(),
                    });
                    next_frontier.push(((*entry).clone(), node_path));
                }
            }
            frontier = next_frontier;
        }

        Ok(QueryOutput::Traverse { nodes })
    }

    /// Whether an edge passes the traversal filter.
    fn edge_selected(&self, params: &TraverseParams, rel_type: &str) -> bool {
        params.follows_all_edges() || params.edge_types.iter().any(|t| t == rel_type)
    }

    /// Outgoing edges for keys of one kind, tagged with their source key.
    async fn outgoing_edges(
        &self,
        kind: EntityKind,
        keys: &[String],
        tenant_id: &str,
    ) -> RemResult<Vec<(String, rem_core::InlineEdge)>> {
        let Some(descriptor) = self.registry.get_by_kind(kind) else {
            return Ok(Vec::new());
        };
        let key_field = descriptor
            .fields
            .iter()
            .find(|f| f.entity_key)
            .map(|f| f.name.as_str())
            .unwrap_or("id");

        let pairs = self
            .backend
            .edges_for(&descriptor.table_name, key_field, keys, tenant_id)
            .await?;

        Ok(pairs
            .into_iter()
            .flat_map(|(key, edges)| edges.into_iter().map(move |e| (key.clone(), e)))
            .collect())
    }
}

/// Whether a where clause could escape its enclosing parentheses.
///
/// The clause is appended as `AND (<clause>)`; a prefix that closes more
/// parens than it opened (`1=1) OR (1=1`) would turn the tenant and
/// soft-delete conjuncts into one alternative of an OR. Parens inside
/// single-quoted SQL string literals are ignored (`''` escapes a quote);
/// unbalanced clauses and unterminated literals are rejected too.
fn clause_escapes_parens(clause: &str) -> bool {
    let mut depth: i64 = 0;
    let mut chars = clause.chars().peekable();
    let mut in_string = false;

    while let Some(ch) = chars.next() {
        if in_string {
            if ch == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                } else {
                    in_string = false;
                }
            }
            continue;
        }
        match ch {
            '\'' => in_string = true,
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return true;
                }
            }
            _ => {}
        }
    }
    depth != 0 || in_string
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryBackend, StoredEntity};
    use rem_core::{InlineEdge, QueryParams};
    use rem_llm::mock::MockEmbeddingProvider;
    use serde_json::json;

    const TENANT: &str = "acme";

    fn engine_with(backend: MemoryBackend) -> RemEngine {
        RemEngine::new(
            Arc::new(backend),
            Arc::new(ModelRegistry::core()),
            Arc::new(MockEmbeddingProvider::new(32)),
        )
    }

    fn edge(dst: &str, rel_type: &str, weight: f32) -> InlineEdge {
        InlineEdge::new(dst, rel_type).with_weight(weight)
    }

    async fn run(engine: &RemEngine, params: QueryParams) -> QueryOutput {
        engine
            .execute(&RemQuery::new(TENANT, params))
            .await
            .unwrap()
    }

    // ========================================================================
    // LOOKUP
    // ========================================================================

    #[tokio::test]
    async fn test_lookup_known_key() {
        let backend = MemoryBackend::new();
        backend.insert(
            StoredEntity::new(TENANT, EntityKind::User, "sarah-chen")
                .summary("Sarah Chen, staff engineer"),
        );
        let engine = engine_with(backend);

        let output = run(
            &engine,
            QueryParams::Lookup(LookupParams::single("sarah-chen")),
        )
        .await;
        match output {
            QueryOutput::Lookup { entries } => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].entity_kind, EntityKind::User);
                assert!(entries[0]
                    .content_summary
                    .as_deref()
                    .unwrap()
                    .contains("Sarah Chen"));
            }
            other => panic!("wrong output {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_lookup_mixed_known_unknown_returns_known_only() {
        let backend = MemoryBackend::new();
        backend.insert(StoredEntity::new(TENANT, EntityKind::User, "sarah-chen"));
        let engine = engine_with(backend);

        let output = run(
            &engine,
            QueryParams::Lookup(LookupParams {
                keys: vec!["no-such-key".to_string(), "sarah-chen".to_string()],
                user_id: None,
            }),
        )
        .await;
        match output {
            QueryOutput::Lookup { entries } => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].entity_key, "sarah-chen");
            }
            other => panic!("wrong output {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_lookup_empty_and_unknown_are_empty_not_errors() {
        let engine = engine_with(MemoryBackend::new());
        let output = run(
            &engine,
            QueryParams::Lookup(LookupParams {
                keys: vec![],
                user_id: None,
            }),
        )
        .await;
        assert_eq!(output.count(), 0);

        let output = run(
            &engine,
            QueryParams::Lookup(LookupParams::single("missing")),
        )
        .await;
        assert_eq!(output.count(), 0);
    }

    #[tokio::test]
    async fn test_lookup_results_follow_request_order() {
        let backend = MemoryBackend::new();
        backend.insert(StoredEntity::new(TENANT, EntityKind::Resource, "doc-b"));
        backend.insert(StoredEntity::new(TENANT, EntityKind::Resource, "doc-a"));
        let engine = engine_with(backend);

        let output = run(
            &engine,
            QueryParams::Lookup(LookupParams {
                keys: vec!["doc-b".to_string(), "doc-a".to_string()],
                user_id: None,
            }),
        )
        .await;
        match output {
            QueryOutput::Lookup { entries } => {
                assert_eq!(entries[0].entity_key, "doc-b");
                assert_eq!(entries[1].entity_key, "doc-a");
            }
            other => panic!("wrong output {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_lookup_tenant_isolation() {
        let backend = MemoryBackend::new();
        backend.insert(StoredEntity::new("other-tenant", EntityKind::User, "sarah-chen"));
        let engine = engine_with(backend);

        let output = run(
            &engine,
            QueryParams::Lookup(LookupParams::single("sarah-chen")),
        )
        .await;
        assert_eq!(output.count(), 0);
    }

    #[tokio::test]
    async fn test_lookup_user_scoping() {
        let backend = MemoryBackend::new();
        backend.insert(StoredEntity::new(TENANT, EntityKind::Resource, "shared-doc"));
        backend.insert(
            StoredEntity::new(TENANT, EntityKind::Resource, "private-doc").owned_by("u-1"),
        );
        let engine = engine_with(backend);

        // Anonymous scope sees only shared rows.
        let output = run(
            &engine,
            QueryParams::Lookup(LookupParams {
                keys: vec!["shared-doc".to_string(), "private-doc".to_string()],
                user_id: None,
            }),
        )
        .await;
        assert_eq!(output.count(), 1);

        // The owner sees both.
        let output = run(
            &engine,
            QueryParams::Lookup(LookupParams {
                keys: vec!["shared-doc".to_string(), "private-doc".to_string()],
                user_id: Some("u-1".to_string()),
            }),
        )
        .await;
        assert_eq!(output.count(), 2);
    }

    // ========================================================================
    // FUZZY
    // ========================================================================

    #[tokio::test]
    async fn test_fuzzy_ranks_typo_above_unrelated() {
        let backend = MemoryBackend::new();
        backend.insert(StoredEntity::new(TENANT, EntityKind::Resource, "architecture-guide"));
        backend.insert(StoredEntity::new(TENANT, EntityKind::Resource, "arxiv-refs"));
        let engine = engine_with(backend);

        let output = run(
            &engine,
            QueryParams::Fuzzy(FuzzyParams {
                query_text: "arcitecture".to_string(),
                threshold: 0.3,
                limit: 5,
                user_id: None,
            }),
        )
        .await;
        match output {
            QueryOutput::Fuzzy { hits } => {
                assert!(!hits.is_empty());
                assert_eq!(hits[0].entry.entity_key, "architecture-guide");
                assert!(hits[0].similarity >= 0.3);
                assert!(!hits.iter().any(|h| h.entry.entity_key == "arxiv-refs"));
            }
            other => panic!("wrong output {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fuzzy_zero_threshold_returns_up_to_limit() {
        let backend = MemoryBackend::new();
        for n in 0..5 {
            backend.insert(StoredEntity::new(
                TENANT,
                EntityKind::Resource,
                format!("doc-{n}"),
            ));
        }
        let engine = engine_with(backend);

        let output = run(
            &engine,
            QueryParams::Fuzzy(FuzzyParams {
                query_text: "doc".to_string(),
                threshold: 0.0,
                limit: 3,
                user_id: None,
            }),
        )
        .await;
        assert_eq!(output.count(), 3);
    }

    // ========================================================================
    // SEARCH
    // ========================================================================

    #[tokio::test]
    async fn test_search_validates_embeddable_field() {
        let engine = engine_with(MemoryBackend::new());

        // `name` exists on resources but is not embeddable.
        let err = engine
            .execute(&RemQuery::new(
                TENANT,
                QueryParams::Search(SearchParams {
                    field_name: Some("name".to_string()),
                    ..SearchParams::new("database migration", "resources")
                }),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, RemError::EmbeddingFieldNotFound { .. }));

        // A field that does not exist at all.
        let err = engine
            .execute(&RemQuery::new(
                TENANT,
                QueryParams::Search(SearchParams {
                    field_name: Some("title".to_string()),
                    ..SearchParams::new("database migration", "resources")
                }),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, RemError::FieldNotFound { .. }));

        // An unknown table fails validation before any storage access.
        let err = engine
            .execute(&RemQuery::new(
                TENANT,
                QueryParams::Search(SearchParams::new("text", "widgets")),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, RemError::Validation(_)));
    }

    #[tokio::test]
    async fn test_search_defaults_to_content_field() {
        // Files have no content field, so omitting field fails loudly.
        let engine = engine_with(MemoryBackend::new());
        let err = engine
            .execute(&RemQuery::new(
                TENANT,
                QueryParams::Search(SearchParams::new("query", "files")),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, RemError::ContentFieldNotFound { .. }));
    }

    #[tokio::test]
    async fn test_search_exact_content_has_unit_similarity() {
        let embedder = MockEmbeddingProvider::new(32);
        let content = "database migration planning".to_string();
        let vector = embedder.embed_batch(&[content.clone()]).await.unwrap().remove(0);
        let other = embedder
            .embed_batch(&["cooking recipes".to_string()])
            .await
            .unwrap()
            .remove(0);

        let backend = MemoryBackend::new();
        backend.insert(
            StoredEntity::new(TENANT, EntityKind::Resource, "migration-doc")
                .summary(&content)
                .with_embedding("content", "mock", vector),
        );
        backend.insert(
            StoredEntity::new(TENANT, EntityKind::Resource, "cookbook")
                .with_embedding("content", "mock", other),
        );
        let engine = engine_with(backend);

        // min_similarity = 1.0 keeps only the exact-embedding match.
        let output = run(
            &engine,
            QueryParams::Search(SearchParams {
                min_similarity: Some(0.999),
                limit: Some(3),
                ..SearchParams::new(content.clone(), "resources")
            }),
        )
        .await;
        match output {
            QueryOutput::Search { hits } => {
                assert_eq!(hits.len(), 1);
                assert_eq!(hits[0].entity_key, "migration-doc");
                assert!(hits[0].similarity > 0.999);
            }
            other => panic!("wrong output {other:?}"),
        }
    }

    // ========================================================================
    // SQL
    // ========================================================================

    #[tokio::test]
    async fn test_sql_rejects_unknown_table_and_separators() {
        let engine = engine_with(MemoryBackend::new());

        let err = engine
            .execute(&RemQuery::new(
                TENANT,
                QueryParams::Sql(SqlParams {
                    table_name: "pg_catalog".to_string(),
                    where_clause: None,
                    limit: None,
                }),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, RemError::Validation(_)));

        let err = engine
            .execute(&RemQuery::new(
                TENANT,
                QueryParams::Sql(SqlParams {
                    table_name: "moments".to_string(),
                    where_clause: Some("1=1; DROP TABLE moments".to_string()),
                    limit: None,
                }),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, RemError::Validation(_)));
    }

    #[tokio::test]
    async fn test_sql_rejects_paren_breakout() {
        let engine = engine_with(MemoryBackend::new());

        // Closing the wrapping paren would OR away the tenant conjuncts.
        for clause in [
            "1=1) OR (1=1",
            ") OR tenant_id IS NOT NULL AND (1=1",
            "((1=1)",       // unbalanced open
            "name='open",   // unterminated string literal
        ] {
            let err = engine
                .execute(&RemQuery::new(
                    TENANT,
                    QueryParams::Sql(SqlParams {
                        table_name: "moments".to_string(),
                        where_clause: Some(clause.to_string()),
                        limit: None,
                    }),
                ))
                .await
                .unwrap_err();
            assert!(matches!(err, RemError::Validation(_)), "accepted: {clause}");
        }
    }

    #[tokio::test]
    async fn test_sql_allows_balanced_parens_and_quoted_parens() {
        let backend = MemoryBackend::new();
        backend.insert(
            StoredEntity::new(TENANT, EntityKind::Moment, "q4-retro")
                .with_field("name", json!("q4-retro"))
                .with_field("moment_type", json!("meeting")),
        );
        let engine = engine_with(backend);

        // Balanced grouping parens are legitimate filter syntax.
        let output = run(
            &engine,
            QueryParams::Sql(SqlParams {
                table_name: "moments".to_string(),
                where_clause: Some("(moment_type='meeting')".to_string()),
                limit: Some(10),
            }),
        )
        .await;
        assert_eq!(output.count(), 1);

        // Parens inside string literals do not count against the depth.
        let output = run(
            &engine,
            QueryParams::Sql(SqlParams {
                table_name: "moments".to_string(),
                where_clause: Some("name='retro (q4)'".to_string()),
                limit: Some(10),
            }),
        )
        .await;
        assert_eq!(output.count(), 0);
    }

    #[test]
    fn test_clause_escapes_parens() {
        assert!(clause_escapes_parens("1=1) OR (1=1"));
        assert!(clause_escapes_parens(")"));
        assert!(clause_escapes_parens("(1=1"));
        assert!(clause_escapes_parens("name='unterminated"));

        assert!(!clause_escapes_parens("1=1"));
        assert!(!clause_escapes_parens("(a='x' OR b='y') AND c='z'"));
        assert!(!clause_escapes_parens("name='retro (q4)'"));
        // '' escapes a quote inside a literal; the ) stays inside it.
        assert!(!clause_escapes_parens("name='it''s (fine)'"));
    }

    #[tokio::test]
    async fn test_sql_filters_rows() {
        let backend = MemoryBackend::new();
        backend.insert(
            StoredEntity::new(TENANT, EntityKind::Moment, "q4-retro")
                .with_field("name", json!("q4-retro"))
                .with_field("moment_type", json!("meeting")),
        );
        backend.insert(
            StoredEntity::new(TENANT, EntityKind::Moment, "pairing-session")
                .with_field("name", json!("pairing-session"))
                .with_field("moment_type", json!("coding-session")),
        );
        let engine = engine_with(backend);

        let output = run(
            &engine,
            QueryParams::Sql(SqlParams {
                table_name: "moments".to_string(),
                where_clause: Some("moment_type='meeting'".to_string()),
                limit: Some(10),
            }),
        )
        .await;
        match output {
            QueryOutput::Sql { rows } => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0]["name"], "q4-retro");
            }
            other => panic!("wrong output {other:?}"),
        }
    }

    // ========================================================================
    // TRAVERSE
    // ========================================================================

    fn traversal_backend() -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend.insert(
            StoredEntity::new(TENANT, EntityKind::Resource, "doc-a")
                .with_edge(edge("ref-1", "references", 0.9))
                .with_edge(edge("ref-2", "references", 0.7))
                .with_edge(edge("ref-3", "references", 0.5))
                .with_edge(edge("base-doc", "builds_on", 1.0)),
        );
        backend.insert(StoredEntity::new(TENANT, EntityKind::Resource, "ref-1"));
        backend.insert(StoredEntity::new(TENANT, EntityKind::Resource, "ref-2"));
        backend.insert(StoredEntity::new(TENANT, EntityKind::Resource, "ref-3"));
        backend.insert(StoredEntity::new(TENANT, EntityKind::Resource, "base-doc"));
        backend
    }

    #[tokio::test]
    async fn test_traverse_depth_zero_is_plan_mode() {
        let engine = engine_with(traversal_backend());

        let output = run(
            &engine,
            QueryParams::Traverse(TraverseParams {
                max_depth: 0,
                ..TraverseParams::new("doc-a")
            }),
        )
        .await;
        match output {
            QueryOutput::TraversePlan {
                start_key,
                edge_types,
            } => {
                assert_eq!(start_key, "doc-a");
                assert_eq!(edge_types.len(), 2);
                assert_eq!(edge_types[0].rel_type, "references");
                assert_eq!(edge_types[0].count, 3);
                assert_eq!(edge_types[1].rel_type, "builds_on");
                assert_eq!(edge_types[1].count, 1);
            }
            other => panic!("wrong output {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_traverse_filtered_expansion() {
        let engine = engine_with(traversal_backend());

        let output = run(
            &engine,
            QueryParams::Traverse(TraverseParams {
                edge_types: vec!["references".to_string()],
                max_depth: 1,
                ..TraverseParams::new("doc-a")
            }),
        )
        .await;
        match output {
            QueryOutput::Traverse { nodes } => {
                assert_eq!(nodes.len(), 3);
                assert!(nodes.iter().all(|n| n.depth == 1));
                assert!(nodes.iter().all(|n| n.rel_type == "references"));
                // Within a level: weight descending.
                assert_eq!(nodes[0].entity_key, "ref-1");
                assert_eq!(nodes[1].entity_key, "ref-2");
                assert_eq!(nodes[2].entity_key, "ref-3");
                // Paths include start and destination.
                assert_eq!(nodes[0].path, vec!["doc-a", "ref-1"]);
            }
            other => panic!("wrong output {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_traverse_cycle_detection_and_depth_bound() {
        let backend = MemoryBackend::new();
        backend.insert(
            StoredEntity::new(TENANT, EntityKind::Resource, "a")
                .with_edge(edge("b", "references", 0.9)),
        );
        backend.insert(
            StoredEntity::new(TENANT, EntityKind::Resource, "b")
                .with_edge(edge("a", "references", 0.9))
                .with_edge(edge("c", "references", 0.5)),
        );
        backend.insert(StoredEntity::new(TENANT, EntityKind::Resource, "c"));
        let engine = engine_with(backend);

        let output = run(
            &engine,
            QueryParams::Traverse(TraverseParams {
                max_depth: 4,
                ..TraverseParams::new("a")
            }),
        )
        .await;
        match output {
            QueryOutput::Traverse { nodes } => {
                // a -> b (depth 1) -> c (depth 2); the back-edge to a is cut.
                assert_eq!(nodes.len(), 2);
                let mut seen = std::collections::HashSet::new();
                for node in &nodes {
                    assert!(node.depth <= 4);
                    assert!(node.path.len() as i32 <= node.depth + 1);
                    assert!(seen.insert((node.entity_kind, node.entity_key.clone())));
                }
            }
            other => panic!("wrong output {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_traverse_skips_tombstoned_and_dangling_targets() {
        let backend = MemoryBackend::new();
        backend.insert(
            StoredEntity::new(TENANT, EntityKind::Resource, "doc-a")
                .with_edge(edge("gone", "references", 0.9))
                .with_edge(edge("never-existed", "references", 0.8))
                .with_edge(edge("alive", "references", 0.5)),
        );
        backend.insert(StoredEntity::new(TENANT, EntityKind::Resource, "gone").deleted());
        backend.insert(StoredEntity::new(TENANT, EntityKind::Resource, "alive"));
        let engine = engine_with(backend);

        let output = run(
            &engine,
            QueryParams::Traverse(TraverseParams {
                max_depth: 1,
                ..TraverseParams::new("doc-a")
            }),
        )
        .await;
        match output {
            QueryOutput::Traverse { nodes } => {
                assert_eq!(nodes.len(), 1);
                assert_eq!(nodes[0].entity_key, "alive");
            }
            other => panic!("wrong output {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_traverse_depth_clamped_to_ceiling() {
        let engine = engine_with(traversal_backend());
        // Requesting an absurd depth still terminates (clamped internally).
        let output = run(
            &engine,
            QueryParams::Traverse(TraverseParams {
                max_depth: 1000,
                ..TraverseParams::new("doc-a")
            }),
        )
        .await;
        match output {
            QueryOutput::Traverse { nodes } => {
                assert!(nodes.iter().all(|n| n.depth <= MAX_TRAVERSE_DEPTH));
            }
            other => panic!("wrong output {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_traverse_unknown_start_is_empty() {
        let engine = engine_with(MemoryBackend::new());
        let output = run(
            &engine,
            QueryParams::Traverse(TraverseParams::new("nowhere")),
        )
        .await;
        assert_eq!(output.count(), 0);
    }
}
