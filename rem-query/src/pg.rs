//! Postgres query backend
//!
//! Delegates the similarity operators to the store: `similarity()` from
//! pg_trgm for FUZZY and the pgvector cosine distance operator for SEARCH.
//! No N²-scan fallbacks exist here; if the store cannot serve the operator,
//! the query fails.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use rem_core::{
    EntityKind, FuzzyHit, InlineEdge, KeyStoreEntry, ModelRegistry, RemError, RemResult, SearchHit,
};
use rem_storage::{row_to_value, vector_literal, Db};
use serde_json::Value;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::QueryBackend;

/// Query backend over the Postgres adapter.
#[derive(Clone)]
pub struct PgBackend {
    db: Db,
    registry: Arc<ModelRegistry>,
}

impl PgBackend {
    pub fn new(db: Db, registry: Arc<ModelRegistry>) -> Self {
        Self { db, registry }
    }

    /// Parse one kv_store row; rows with an unknown kind are dropped with a
    /// warning rather than failing the whole query.
    fn kv_entry(row: &Row) -> Option<KeyStoreEntry> {
        let kind_label: String = row.get("entity_type");
        let entity_kind = match EntityKind::from_str(&kind_label) {
            Ok(kind) => kind,
            Err(_) => {
                tracing::warn!(kind = %kind_label, "unknown entity kind in kv_store");
                return None;
            }
        };
        Some(KeyStoreEntry {
            entity_key: row.get("entity_key"),
            entity_kind,
            entity_id: row.get("entity_id"),
            user_id: row.get("user_id"),
            content_summary: row.get("content_summary"),
            metadata: row
                .try_get::<_, Option<Value>>("metadata")
                .ok()
                .flatten()
                .unwrap_or(Value::Null),
        })
    }
}

#[async_trait]
impl QueryBackend for PgBackend {
    async fn lookup(
        &self,
        keys: &[String],
        tenant_id: &str,
        user_id: Option<&str>,
    ) -> RemResult<Vec<KeyStoreEntry>> {
        let keys: Vec<String> = keys.to_vec();
        let rows = match user_id {
            Some(user) => {
                self.db
                    .query(
                        "SELECT entity_key, entity_type, entity_id, user_id, content_summary, metadata \
                         FROM kv_store \
                         WHERE tenant_id = $1 AND entity_key = ANY($2) \
                           AND (user_id IS NULL OR user_id = $3)",
                        &[&tenant_id, &keys, &user],
                    )
                    .await?
            }
            None => {
                self.db
                    .query(
                        "SELECT entity_key, entity_type, entity_id, user_id, content_summary, metadata \
                         FROM kv_store \
                         WHERE tenant_id = $1 AND entity_key = ANY($2) \
                           AND user_id IS NULL",
                        &[&tenant_id, &keys],
                    )
                    .await?
            }
        };
        Ok(rows.iter().filter_map(Self::kv_entry).collect())
    }

    async fn lookup_by_id(
        &self,
        entity_id: Uuid,
        tenant_id: &str,
    ) -> RemResult<Option<KeyStoreEntry>> {
        let row = self
            .db
            .query_opt(
                "SELECT entity_key, entity_type, entity_id, user_id, content_summary, metadata \
                 FROM kv_store WHERE tenant_id = $1 AND entity_id = $2",
                &[&tenant_id, &entity_id],
            )
            .await?;
        Ok(row.as_ref().and_then(Self::kv_entry))
    }

    async fn fuzzy(
        &self,
        query_text: &str,
        threshold: f64,
        limit: i64,
        tenant_id: &str,
        user_id: Option<&str>,
    ) -> RemResult<Vec<FuzzyHit>> {
        let threshold = threshold as f32;
        let rows = match user_id {
            Some(user) => {
                self.db
                    .query(
                        "SELECT entity_key, entity_type, entity_id, user_id, content_summary, metadata, \
                                similarity(entity_key, $2)::float8 AS similarity_score \
                         FROM kv_store \
                         WHERE tenant_id = $1 \
                           AND similarity(entity_key, $2) >= $3 \
                           AND (user_id IS NULL OR user_id = $4) \
                         ORDER BY similarity_score DESC, updated_at DESC \
                         LIMIT $5",
                        &[&tenant_id, &query_text, &threshold, &user, &limit],
                    )
                    .await?
            }
            None => {
                self.db
                    .query(
                        "SELECT entity_key, entity_type, entity_id, user_id, content_summary, metadata, \
                                similarity(entity_key, $2)::float8 AS similarity_score \
                         FROM kv_store \
                         WHERE tenant_id = $1 \
                           AND similarity(entity_key, $2) >= $3 \
                           AND user_id IS NULL \
                         ORDER BY similarity_score DESC, updated_at DESC \
                         LIMIT $4",
                        &[&tenant_id, &query_text, &threshold, &limit],
                    )
                    .await?
            }
        };

        Ok(rows
            .iter()
            .filter_map(|row| {
                let entry = Self::kv_entry(row)?;
                Some(FuzzyHit {
                    entry,
                    similarity: row.get::<_, f64>("similarity_score"),
                })
            })
            .collect())
    }

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
    ) -> RemResult<Vec<SearchHit>> {
        let descriptor = self.registry.require(table_name)?;
        let embeddings_table = descriptor.embeddings_table();
        let literal = vector_literal(embedding);

        // Cosine distance from the store, translated to similarity in [0, 1].
        let user_scope = match user_id {
            Some(_) => "(t.user_id IS NULL OR t.user_id = $7)",
            None => "t.user_id IS NULL",
        };
        let sql = format!(
            "SELECT k.entity_key, k.entity_type, e.entity_id, \
                    (1 - (e.embedding <=> $1::vector))::float8 AS similarity, \
                    k.content_summary \
             FROM {embeddings_table} e \
             JOIN {table} t ON t.id = e.entity_id \
             JOIN kv_store k ON k.entity_id = e.entity_id AND k.tenant_id = t.tenant_id \
             WHERE t.tenant_id = $2 AND t.deleted_at IS NULL \
               AND e.field_name = $3 AND e.provider = $4 \
               AND (1 - (e.embedding <=> $1::vector)) >= $5 \
               AND {user_scope} \
             ORDER BY e.embedding <=> $1::vector ASC, k.entity_key ASC \
             LIMIT $6",
            table = descriptor.table_name,
        );

        let rows = match user_id {
            Some(user) => {
                self.db
                    .query(
                        &sql,
                        &[
                            &literal,
                            &tenant_id,
                            &field_name,
                            &provider,
                            &min_similarity,
                            &limit,
                            &user,
                        ],
                    )
                    .await?
            }
            None => {
                self.db
                    .query(
                        &sql,
                        &[&literal, &tenant_id, &field_name, &provider, &min_similarity, &limit],
                    )
                    .await?
            }
        };

        Ok(rows
            .iter()
            .filter_map(|row| {
                let kind_label: String = row.get("entity_type");
                let entity_kind = EntityKind::from_str(&kind_label).ok()?;
                Some(SearchHit {
                    entity_key: row.get("entity_key"),
                    entity_kind,
                    entity_id: row.get("entity_id"),
                    similarity: row.get("similarity"),
                    content_summary: row.get("content_summary"),
                })
            })
            .collect())
    }

    async fn sql_filter(
        &self,
        table_name: &str,
        where_clause: &str,
        limit: i64,
        tenant_id: &str,
    ) -> RemResult<Vec<Value>> {
        let descriptor = self.registry.require(table_name)?;
        // Table name comes from the allow-list, the clause is parenthesized
        // under the tenant and soft-delete conjuncts.
        let sql = format!(
            "SELECT * FROM {table} WHERE tenant_id = $1 AND deleted_at IS NULL AND ({where_clause}) LIMIT {limit}",
            table = descriptor.table_name,
            limit = limit.max(0),
        );
        let rows = self.db.query(&sql, &[&tenant_id]).await?;
        Ok(rows.iter().map(|row| row_to_value(row, descriptor)).collect())
    }

    async fn edges_for(
        &self,
        table_name: &str,
        key_field: &str,
        keys: &[String],
        tenant_id: &str,
    ) -> RemResult<Vec<(String, Vec<InlineEdge>)>> {
        let descriptor = self.registry.require(table_name)?;
        if key_field != "id" && !descriptor.has_field(key_field) {
            return Err(RemError::FieldNotFound {
                table: descriptor.table_name.clone(),
                field: key_field.to_string(),
                available: descriptor.field_names(),
            });
        }

        let rows = if key_field == "id" {
            let ids: Vec<Uuid> = keys
                .iter()
                .filter_map(|k| Uuid::parse_str(k).ok())
                .collect();
            let sql = format!(
                "SELECT id::text AS key, graph_edges FROM {table} \
                 WHERE tenant_id = $1 AND deleted_at IS NULL AND id = ANY($2)",
                table = descriptor.table_name,
            );
            self.db.query(&sql, &[&tenant_id, &ids]).await?
        } else {
            let keys: Vec<String> = keys.to_vec();
            let sql = format!(
                "SELECT {key_field}::text AS key, graph_edges FROM {table} \
                 WHERE tenant_id = $1 AND deleted_at IS NULL AND {key_field} = ANY($2)",
                table = descriptor.table_name,
            );
            self.db.query(&sql, &[&tenant_id, &keys]).await?
        };

        Ok(rows
            .iter()
            .filter_map(|row| {
                let key: String = row.get("key");
                let edges: Value = row.try_get("graph_edges").ok()?;
                let edges: Vec<InlineEdge> = serde_json::from_value(edges).ok()?;
                Some((key, edges))
            })
            .collect())
    }
}
