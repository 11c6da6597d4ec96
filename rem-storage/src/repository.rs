//! Descriptor-driven repository
//!
//! One repository per entity table. The upsert path assigns ids, serializes
//! composite fields through the codec, resolves conflicts on the natural-key
//! index, and enqueues embedding tasks for embeddable fields after commit.
//! Callers never distinguish single-item from batch: everything is a slice.

use chrono::Utc;
use rem_core::{EntityDescriptor, FieldType, RemError, RemResult};
use serde_json::{Map, Value};
use tokio_postgres::types::ToSql;
use uuid::Uuid;

use crate::{normalize_pg_error, row_to_value, value_to_param, Db, EmbeddingQueue, EmbeddingTask};

/// UUIDv5 namespace for deterministic ids derived from natural keys.
const ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x52, 0x45, 0x4d, 0x00, 0x6b, 0x65, 0x79, 0x73, 0x74, 0x6f, 0x72, 0x65, 0x00, 0x00, 0x00, 0x01,
]);

/// Repository for one entity table.
#[derive(Clone)]
pub struct Repository {
    db: Db,
    descriptor: EntityDescriptor,
    embedding_queue: Option<EmbeddingQueue>,
}

impl Repository {
    pub fn new(db: Db, descriptor: EntityDescriptor) -> Self {
        Self {
            db,
            descriptor,
            embedding_queue: None,
        }
    }

    /// Attach the embedding queue; upserts then enqueue tasks for
    /// embeddable fields after the transaction commits.
    pub fn with_embedding_queue(mut self, queue: EmbeddingQueue) -> Self {
        self.embedding_queue = Some(queue);
        self
    }

    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn table_name(&self) -> &str {
        &self.descriptor.table_name
    }

    /// Upsert one entity; see [`Repository::upsert`].
    pub async fn upsert_one(&self, entity: Value) -> RemResult<Value> {
        let mut rows = self.upsert(vec![entity]).await?;
        rows.pop()
            .ok_or_else(|| RemError::query_execution("upsert returned no row"))
    }

    /// Upsert a batch of entities on one connection inside a transaction.
    ///
    /// Assigns ids where absent (deterministic from the natural key when one
    /// exists, so retries are idempotent), bumps `updated_at`, and returns
    /// the persisted rows with server-assigned values.
    pub async fn upsert(&self, entities: Vec<Value>) -> RemResult<Vec<Value>> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }

        let sql = self.upsert_sql();
        let mut prepared = Vec::with_capacity(entities.len());
        for entity in entities {
            prepared.push(self.normalize(entity)?);
        }

        let mut conn = self.db.get_conn().await?;
        let tx = conn
            .transaction()
            .await
            .map_err(normalize_pg_error)?;
        let statement = tx.prepare_cached(&sql).await.map_err(normalize_pg_error)?;

        let mut persisted = Vec::with_capacity(prepared.len());
        for entity in &prepared {
            let params = self.bind_params(entity)?;
            let refs: Vec<&(dyn ToSql + Sync)> =
                params.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect();
            let row = tx
                .query_one(&statement, &refs)
                .await
                .map_err(normalize_pg_error)?;
            persisted.push(row_to_value(&row, &self.descriptor));
        }

        tx.commit().await.map_err(normalize_pg_error)?;

        // Post-commit hook: embedding generation must not gate write latency.
        if let Some(queue) = &self.embedding_queue {
            for entity in &persisted {
                self.enqueue_embeddings(queue, entity);
            }
        }

        Ok(persisted)
    }

    /// Fetch a live row by id.
    pub async fn fetch_one(&self, id: Uuid) -> RemResult<Option<Value>> {
        let sql = format!(
            "SELECT * FROM {} WHERE id = $1 AND deleted_at IS NULL",
            self.descriptor.table_name
        );
        Ok(self
            .db
            .query_opt(&sql, &[&id])
            .await?
            .map(|row| row_to_value(&row, &self.descriptor)))
    }

    /// Fetch live rows matching equality filters, validated against the
    /// descriptor so arbitrary identifiers never reach the SQL text.
    pub async fn fetch_many(
        &self,
        filters: &[(&str, Value)],
        order_by: Option<&str>,
        limit: Option<i64>,
    ) -> RemResult<Vec<Value>> {
        let mut sql = format!(
            "SELECT * FROM {} WHERE deleted_at IS NULL",
            self.descriptor.table_name
        );
        let mut params: Vec<crate::SqlParam> = Vec::new();

        for (column, value) in filters {
            let field = self.descriptor.field(column).ok_or_else(|| {
                RemError::FieldNotFound {
                    table: self.descriptor.table_name.clone(),
                    field: column.to_string(),
                    available: self.descriptor.field_names(),
                }
            })?;
            params.push(value_to_param(column, value, field.field_type)?);
            sql.push_str(&format!(" AND {} = ${}", column, params.len()));
        }

        if let Some(order) = order_by {
            sql.push_str(&format!(" ORDER BY {}", self.validate_order_by(order)?));
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit.max(0)));
        }

        let refs: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect();
        let rows = self.db.query(&sql, &refs).await?;
        Ok(rows
            .iter()
            .map(|row| row_to_value(row, &self.descriptor))
            .collect())
    }

    /// Soft-delete a row. The key-store trigger removes its entry.
    pub async fn soft_delete(&self, id: Uuid) -> RemResult<bool> {
        let sql = format!(
            "UPDATE {} SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
            self.descriptor.table_name
        );
        Ok(self.db.execute(&sql, &[&id]).await? > 0)
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    /// Validate an `ORDER BY` expression: a known column plus direction.
    fn validate_order_by(&self, order: &str) -> RemResult<String> {
        let mut parts = order.split_whitespace();
        let column = parts.next().unwrap_or_default();
        let direction = parts.next().unwrap_or("ASC").to_ascii_uppercase();

        if !self.descriptor.has_field(column) {
            return Err(RemError::FieldNotFound {
                table: self.descriptor.table_name.clone(),
                field: column.to_string(),
                available: self.descriptor.field_names(),
            });
        }
        if direction != "ASC" && direction != "DESC" {
            return Err(RemError::query_execution(format!(
                "invalid sort direction '{direction}'"
            )));
        }
        Ok(format!("{column} {direction}"))
    }

    /// Fill in id and timestamps; reject non-object payloads.
    fn normalize(&self, entity: Value) -> RemResult<Map<String, Value>> {
        let Value::Object(mut object) = entity else {
            return Err(RemError::query_execution("entity payload must be an object"));
        };

        let now = Utc::now().to_rfc3339();
        if object.get("created_at").map_or(true, Value::is_null) {
            object.insert("created_at".to_string(), Value::String(now.clone()));
        }
        object.insert("updated_at".to_string(), Value::String(now));

        if object.get("id").map_or(true, Value::is_null) {
            object.insert(
                "id".to_string(),
                Value::String(self.assign_id(&object).to_string()),
            );
        }

        Ok(object)
    }

    /// Deterministic id from (table, tenant, natural key) when a natural key
    /// value is present; fresh v7 otherwise.
    fn assign_id(&self, object: &Map<String, Value>) -> Uuid {
        let key_fields = self.descriptor.natural_key_fields();
        let key_values: Vec<String> = key_fields
            .iter()
            .filter_map(|f| object.get(f))
            .filter(|v| !v.is_null())
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();

        if key_fields.is_empty() || key_values.is_empty() {
            return Uuid::now_v7();
        }

        let tenant = object
            .get("tenant_id")
            .and_then(Value::as_str)
            .unwrap_or(rem_core::DEFAULT_TENANT);
        let seed = format!(
            "{}:{}:{}",
            self.descriptor.table_name,
            tenant,
            key_values.join("\u{1f}")
        );
        Uuid::new_v5(&ID_NAMESPACE, seed.as_bytes())
    }

    /// Column list in descriptor order for the insert statement.
    fn bind_params(&self, entity: &Map<String, Value>) -> RemResult<Vec<crate::SqlParam>> {
        self.descriptor
            .fields
            .iter()
            .map(|field| {
                let raw = entity.get(&field.name).cloned().unwrap_or(Value::Null);
                // Composite defaults keep NOT NULL columns satisfied.
                let value = match raw {
                    Value::Null if field.field_type == FieldType::Json && field.name == "metadata" => {
                        Value::Object(Map::new())
                    }
                    Value::Null if field.field_type == FieldType::Json && field.name == "graph_edges" => {
                        Value::Array(Vec::new())
                    }
                    other => other,
                };
                value_to_param(&field.name, &value, field.field_type)
            })
            .collect()
    }

    /// INSERT ... ON CONFLICT statement for this descriptor.
    fn upsert_sql(&self) -> String {
        let columns: Vec<&str> = self
            .descriptor
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();

        let natural_keys = self.descriptor.natural_key_fields();
        let (conflict_target, conflict_predicate) = if natural_keys.is_empty() {
            ("id".to_string(), String::new())
        } else {
            (
                format!("tenant_id, {}", natural_keys.join(", ")),
                " WHERE deleted_at IS NULL".to_string(),
            )
        };

        let updates: Vec<String> = columns
            .iter()
            .filter(|c| !matches!(**c, "id" | "tenant_id" | "created_at"))
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect();

        format!(
            "INSERT INTO {table} ({columns}) VALUES ({placeholders}) \
             ON CONFLICT ({conflict_target}){conflict_predicate} DO UPDATE SET {updates} \
             RETURNING *",
            table = self.descriptor.table_name,
            columns = columns.join(", "),
            placeholders = placeholders.join(", "),
        updates = updates.join(", "),
        )
    }

    /// Queue embedding tasks for embeddable fields with non-empty content.
    fn enqueue_embeddings(&self, queue: &EmbeddingQueue, entity: &Value) {
        let Some(id) = entity.get("id").and_then(Value::as_str) else {
            return;
        };
        for field in self.descriptor.embeddable_fields() {
            let Some(content) = entity.get(&field).and_then(Value::as_str) else {
                continue;
            };
            if content.trim().is_empty() {
                continue;
            }
            queue.queue_task(EmbeddingTask {
                task_id: Uuid::now_v7().to_string(),
                entity_id: id.to_string(),
                table_name: self.descriptor.table_name.clone(),
                field_name: field.clone(),
                content: content.to_string(),
                provider: queue.provider_label().to_string(),
                model: queue.model_label().to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rem_core::{EntityKind, ModelRegistry};

    fn moments_repo() -> Repository {
        let registry = ModelRegistry::core();
        let descriptor = registry.get_by_kind(EntityKind::Moment).unwrap().clone();
        // Pool construction is config-only; no connection is made until use.
        let db = Db::from_config(&crate::DbConfig::default()).unwrap();
        Repository::new(db, descriptor)
    }

    #[test]
    fn test_upsert_sql_uses_natural_key_conflict() {
        let repo = moments_repo();
        let sql = repo.upsert_sql();
        assert!(sql.contains("INSERT INTO moments"));
        assert!(sql.contains("ON CONFLICT (tenant_id, name) WHERE deleted_at IS NULL"));
        assert!(sql.contains("RETURNING *"));
        // Identity and creation time never move on conflict.
        assert!(!sql.contains("id = EXCLUDED.id"));
        assert!(!sql.contains("created_at = EXCLUDED.created_at"));
        assert!(sql.contains("summary = EXCLUDED.summary"));
    }

    #[test]
    fn test_messages_conflict_on_id() {
        let registry = ModelRegistry::core();
        let descriptor = registry.get_by_kind(EntityKind::Message).unwrap().clone();
        let db = Db::from_config(&crate::DbConfig::default()).unwrap();
        let repo = Repository::new(db, descriptor);
        assert!(repo.upsert_sql().contains("ON CONFLICT (id) DO UPDATE"));
    }

    #[test]
    fn test_assign_id_deterministic_for_natural_key() {
        let repo = moments_repo();
        let mut object = Map::new();
        object.insert("tenant_id".to_string(), Value::String("acme".to_string()));
        object.insert("name".to_string(), Value::String("moment-a".to_string()));

        let a = repo.assign_id(&object);
        let b = repo.assign_id(&object);
        assert_eq!(a, b);

        object.insert("name".to_string(), Value::String("moment-b".to_string()));
        assert_ne!(a, repo.assign_id(&object));
    }

    #[test]
    fn test_normalize_sets_id_and_timestamps() {
        let repo = moments_repo();
        let normalized = repo
            .normalize(serde_json::json!({"name": "m1", "tenant_id": "acme"}))
            .unwrap();
        assert!(normalized.get("id").is_some());
        assert!(normalized.get("created_at").is_some());
        assert!(normalized.get("updated_at").is_some());
    }

    #[test]
    fn test_order_by_validation() {
        let repo = moments_repo();
        assert!(repo.validate_order_by("starts_timestamp DESC").is_ok());
        assert!(repo.validate_order_by("no_such_column ASC").is_err());
        assert!(repo.validate_order_by("name SIDEWAYS").is_err());
    }
}
