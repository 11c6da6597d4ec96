//! Storage backend trait for the query engine

use async_trait::async_trait;
use rem_core::{FuzzyHit, InlineEdge, KeyStoreEntry, RemResult, SearchHit};
use serde_json::Value;
use uuid::Uuid;

/// Storage primitives the engine dispatches to.
///
/// Implementations provide tenant- and user-scoped access to the key-store,
/// similarity operators, entity tables, and inline edges. User scoping is
/// uniform: `None` matches only shared rows (`user_id IS NULL`); `Some(u)`
/// matches shared rows plus rows owned by `u`.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Resolve keys against the key-store. Order of the result is
    /// unspecified; the engine re-orders per request order.
    async fn lookup(
        &self,
        keys: &[String],
        tenant_id: &str,
        user_id: Option<&str>,
    ) -> RemResult<Vec<KeyStoreEntry>>;

    /// Resolve a key-store entry by internal entity id.
    async fn lookup_by_id(
        &self,
        entity_id: Uuid,
        tenant_id: &str,
    ) -> RemResult<Option<KeyStoreEntry>>;

    /// Trigram similarity over key-store keys, ranked highest first, ties
    /// broken by recency.
    async fn fuzzy(
        &self,
        query_text: &str,
        threshold: f64,
        limit: i64,
        tenant_id: &str,
        user_id: Option<&str>,
    ) -> RemResult<Vec<FuzzyHit>>;

    /// Cosine top-K against the sibling embeddings table, joined back to the
    /// entity table for display. Similarity is already translated to [0, 1].
    #[allow(clippy::too_many_arguments)]
    async fn vector_search(
        &self,
        embedding: &[f32],
        table_name: &str,
        field_name: &str,
        provider: &str,
        min_similarity: f64,
        limit: i64,
        tenant_id: &str,
        user_id: Option<&str>,
    ) -> RemResult<Vec<SearchHit>>;

    /// Filtered scan of one entity table. The where clause arrives already
    /// validated by the engine and is appended under parentheses with the
    /// tenant and soft-delete conjuncts.
    async fn sql_filter(
        &self,
        table_name: &str,
        where_clause: &str,
        limit: i64,
        tenant_id: &str,
    ) -> RemResult<Vec<Value>>;

    /// Outgoing inline edges for live rows of `table_name` whose
    /// `key_field` is in `keys`. Returns (key, edges) pairs.
    async fn edges_for(
        &self,
        table_name: &str,
        key_field: &str,
        keys: &[String],
        tenant_id: &str,
    ) -> RemResult<Vec<(String, Vec<InlineEdge>)>>;
}
