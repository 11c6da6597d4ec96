//! In-memory query backend
//!
//! Mirrors the Postgres backend's semantics (trigram similarity, cosine
//! search, user scoping, soft deletion) over process-local state. Used by
//! engine tests and anywhere a live store is unavailable.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rem_core::{
    EntityKind, FuzzyHit, InlineEdge, KeyStoreEntry, RemResult, SearchHit, ValidationError,
};
use rem_llm::cosine_similarity;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::QueryBackend;

/// One seeded entity with everything the backend needs to serve queries.
#[derive(Debug, Clone)]
pub struct StoredEntity {
    pub tenant_id: String,
    pub user_id: Option<String>,
    pub table_name: String,
    pub entry: KeyStoreEntry,
    pub updated_at: DateTime<Utc>,
    pub edges: Vec<InlineEdge>,
    pub fields: Map<String, Value>,
    /// (field_name, provider) -> vector
    pub embeddings: HashMap<(String, String), Vec<f32>>,
    pub deleted: bool,
}

impl StoredEntity {
    pub fn new(tenant_id: impl Into<String>, kind: EntityKind, key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            tenant_id: tenant_id.into(),
            user_id: None,
            table_name: kind.table_name().to_string(),
            entry: KeyStoreEntry {
                entity_key: key,
                entity_kind: kind,
                entity_id: Uuid::now_v7(),
                user_id: None,
                content_summary: None,
                metadata: Value::Object(Map::new()),
            },
            updated_at: Utc::now(),
            edges: Vec::new(),
            fields: Map::new(),
            embeddings: HashMap::new(),
            deleted: false,
        }
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.entry.content_summary = Some(summary.into());
        self
    }

    pub fn owned_by(mut self, user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        self.user_id = Some(user_id.clone());
        self.entry.user_id = Some(user_id);
        self
    }

    pub fn with_edge(mut self, edge: InlineEdge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn with_embedding(
        mut self,
        field: impl Into<String>,
        provider: impl Into<String>,
        vector: Vec<f32>,
    ) -> Self {
        self.embeddings.insert((field.into(), provider.into()), vector);
        self
    }

    pub fn updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = at;
        self
    }

    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }
}

/// In-memory backend over seeded entities.
#[derive(Default)]
pub struct MemoryBackend {
    entities: RwLock<Vec<StoredEntity>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entity: StoredEntity) {
        self.entities.write().expect("memory backend lock").push(entity);
    }

    fn visible(entity: &StoredEntity, tenant_id: &str, user_id: Option<&str>) -> bool {
        !entity.deleted && entity.tenant_id == tenant_id && user_scope(entity.user_id.as_deref(), user_id)
    }
}

/// Anonymous scope matches only shared rows; a user sees shared rows plus
/// their own.
fn user_scope(row_user: Option<&str>, query_user: Option<&str>) -> bool {
    match query_user {
        None => row_user.is_none(),
        Some(user) => row_user.is_none() || row_user == Some(user),
    }
}

// ============================================================================
// TRIGRAM SIMILARITY
// ============================================================================

/// pg_trgm-style trigram set: lowercase words padded with two leading and
/// one trailing space.
fn trigrams(text: &str) -> HashSet<String> {
    let mut grams = HashSet::new();
    for word in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        let padded: Vec<char> = format!("  {word} ").chars().collect();
        for window in padded.windows(3) {
            grams.insert(window.iter().collect());
        }
    }
    grams
}

/// Jaccard similarity of trigram sets, as pg_trgm's `similarity()`.
pub fn trigram_similarity(a: &str, b: &str) -> f64 {
    let ta = trigrams(a);
    let tb = trigrams(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let shared = ta.intersection(&tb).count();
    let total = ta.union(&tb).count();
    shared as f64 / total as f64
}

#[async_trait]
impl QueryBackend for MemoryBackend {
    async fn lookup(
        &self,
        keys: &[String],
        tenant_id: &str,
        user_id: Option<&str>,
    ) -> RemResult<Vec<KeyStoreEntry>> {
        let entities = self.entities.read().expect("memory backend lock");
        Ok(entities
            .iter()
            .filter(|e| Self::visible(e, tenant_id, user_id))
            .filter(|e| keys.contains(&e.entry.entity_key))
            .map(|e| e.entry.clone())
            .collect())
    }

    async fn lookup_by_id(
        &self,
        entity_id: Uuid,
        tenant_id: &str,
    ) -> RemResult<Option<KeyStoreEntry>> {
        let entities = self.entities.read().expect("memory backend lock");
        Ok(entities
            .iter()
            .filter(|e| !e.deleted && e.tenant_id == tenant_id)
            .find(|e| e.entry.entity_id == entity_id)
            .map(|e| e.entry.clone()))
    }

    async fn fuzzy(
        &self,
        query_text: &str,
        threshold: f64,
        limit: i64,
        tenant_id: &str,
        user_id: Option<&str>,
    ) -> RemResult<Vec<FuzzyHit>> {
        let entities = self.entities.read().expect("memory backend lock");
        let mut hits: Vec<(FuzzyHit, DateTime<Utc>)> = entities
            .iter()
            .filter(|e| Self::visible(e, tenant_id, user_id))
            .filter_map(|e| {
                let similarity = trigram_similarity(query_text, &e.entry.entity_key);
                (similarity >= threshold).then(|| {
                    (
                        FuzzyHit {
                            entry: e.entry.clone(),
                            similarity,
                        },
                        e.updated_at,
                    )
                })
            })
            .collect();

        // Highest similarity first, recency breaks ties.
        hits.sort_by(|(a, a_at), (b, b_at)| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b_at.cmp(a_at))
        });
        hits.truncate(limit.max(0) as usize);
        Ok(hits.into_iter().map(|(hit, _)| hit).collect())
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
        let entities = self.entities.read().expect("memory backend lock");
        let slot = (field_name.to_string(), provider.to_string());
        let mut hits: Vec<SearchHit> = entities
            .iter()
            .filter(|e| Self::visible(e, tenant_id, user_id) && e.table_name == table_name)
            .filter_map(|e| {
                let vector = e.embeddings.get(&slot)?;
                let similarity = cosine_similarity(embedding, vector) as f64;
                (similarity >= min_similarity).then(|| SearchHit {
                    entity_key: e.entry.entity_key.clone(),
                    entity_kind: e.entry.entity_kind,
                    entity_id: e.entry.entity_id,
                    similarity,
                    content_summary: e.entry.content_summary.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entity_key.cmp(&b.entity_key))
        });
        hits.truncate(limit.max(0) as usize);
        Ok(hits)
    }

    async fn sql_filter(
        &self,
        table_name: &str,
        where_clause: &str,
        limit: i64,
        tenant_id: &str,
    ) -> RemResult<Vec<Value>> {
        let conditions = parse_clause(where_clause)?;
        let entities = self.entities.read().expect("memory backend lock");
        let mut rows: Vec<Value> = entities
            .iter()
            .filter(|e| !e.deleted && e.tenant_id == tenant_id && e.table_name == table_name)
            .filter(|e| conditions.iter().all(|c| c.matches(&e.fields)))
            .map(|e| Value::Object(e.fields.clone()))
            .collect();
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn edges_for(
        &self,
        table_name: &str,
        _key_field: &str,
        keys: &[String],
        tenant_id: &str,
    ) -> RemResult<Vec<(String, Vec<InlineEdge>)>> {
        let entities = self.entities.read().expect("memory backend lock");
        let mut result: BTreeMap<String, Vec<InlineEdge>> = BTreeMap::new();
        for entity in entities.iter().filter(|e| {
            !e.deleted
                && e.tenant_id == tenant_id
                && e.table_name == table_name
                && keys.contains(&e.entry.entity_key)
        }) {
            result
                .entry(entity.entry.entity_key.clone())
                .or_default()
                .extend(entity.edges.iter().cloned());
        }
        Ok(result.into_iter().collect())
    }
}

// ============================================================================
// MINIMAL WHERE-CLAUSE EVALUATION
// ============================================================================

/// The subset of SQL the in-memory backend evaluates: `1=1` and
/// `col OP 'value'` conjunctions joined by AND.
#[derive(Debug)]
enum Condition {
    True,
    Compare {
        column: String,
        op: String,
        value: String,
    },
}

impl Condition {
    fn matches(&self, fields: &Map<String, Value>) -> bool {
        match self {
            Condition::True => true,
            Condition::Compare { column, op, value } => {
                let Some(actual) = fields.get(column) else {
                    return false;
                };
                let actual = match actual {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                match op.as_str() {
                    "=" => actual == *value,
                    "!=" | "<>" => actual != *value,
                    ">=" => actual.as_str() >= value.as_str(),
                    "<=" => actual.as_str() <= value.as_str(),
                    ">" => actual.as_str() > value.as_str(),
                    "<" => actual.as_str() < value.as_str(),
                    _ => false,
                }
            }
        }
    }
}

fn parse_clause(clause: &str) -> RemResult<Vec<Condition>> {
    let mut conditions = Vec::new();
    for part in clause.split(" AND ") {
        let part = part.trim().trim_start_matches('(').trim_end_matches(')').trim();
        if part == "1=1" || part.is_empty() {
            conditions.push(Condition::True);
            continue;
        }
        let op_idx = ["!=", "<>", ">=", "<=", "=", ">", "<"]
            .iter()
            .find_map(|op| part.find(op).map(|i| (i, *op)));
        let Some((idx, op)) = op_idx else {
            return Err(ValidationError::InvalidValue {
                field: "where".to_string(),
                reason: format!("unsupported condition '{part}'"),
            }
            .into());
        };
        let column = part[..idx].trim().to_string();
        let value = part[idx + op.len()..].trim().trim_matches('\'').to_string();
        conditions.push(Condition::Compare {
            column,
            op: op.to_string(),
            value,
        });
    }
    Ok(conditions)
}
