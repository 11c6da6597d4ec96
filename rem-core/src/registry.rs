//! Entity descriptors and the model registry
//!
//! A descriptor is the single source of truth for one entity kind: its table,
//! natural-key fields, and column types. The schema generator derives DDL
//! from descriptors and the query engine validates SEARCH/SQL against them,
//! so the two can never disagree about what a table looks like.

use std::collections::BTreeMap;

use crate::{EntityKind, ValidationError};

/// Field names that are embeddable by default when no explicit flag is set.
pub const DEFAULT_EMBED_FIELDS: [&str; 7] = [
    "content",
    "description",
    "summary",
    "text",
    "body",
    "message",
    "notes",
];

/// Column type for a descriptor field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Uuid,
    Text,
    Int,
    BigInt,
    Float,
    Bool,
    Timestamp,
    Json,
    TextArray,
}

impl FieldType {
    /// PostgreSQL column type for this field.
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::Uuid => "UUID",
            FieldType::Text => "TEXT",
            FieldType::Int => "INTEGER",
            FieldType::BigInt => "BIGINT",
            FieldType::Float => "DOUBLE PRECISION",
            FieldType::Bool => "BOOLEAN",
            FieldType::Timestamp => "TIMESTAMPTZ",
            FieldType::Json => "JSONB",
            FieldType::TextArray => "TEXT[]",
        }
    }
}

/// One column of an entity table.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
    /// Explicit embeddability flag; `None` falls back to the
    /// `DEFAULT_EMBED_FIELDS` convention for text fields.
    pub embeddable: Option<bool>,
    /// Whether this field is the natural key (or part of it).
    pub entity_key: bool,
    /// Additional member of a composite natural-key constraint.
    pub composite_key: bool,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: false,
            embeddable: None,
            entity_key: false,
            composite_key: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn embeddable(mut self, flag: bool) -> Self {
        self.embeddable = Some(flag);
        self
    }

    pub fn entity_key(mut self) -> Self {
        self.entity_key = true;
        self
    }

    pub fn composite_key(mut self) -> Self {
        self.composite_key = true;
        self
    }

    /// Resolved embeddability: explicit flag, else the naming convention.
    pub fn is_embeddable(&self) -> bool {
        match self.embeddable {
            Some(flag) => flag,
            None => {
                self.field_type == FieldType::Text
                    && DEFAULT_EMBED_FIELDS.contains(&self.name.as_str())
            }
        }
    }
}

/// Descriptor for one entity kind: table, natural key, and columns.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDescriptor {
    pub kind: EntityKind,
    pub table_name: String,
    /// Primary natural-key field, resolved at registration.
    pub entity_key_field: String,
    pub fields: Vec<FieldDescriptor>,
}

impl EntityDescriptor {
    /// Build a descriptor; the envelope columns are prepended automatically.
    pub fn new(kind: EntityKind, fields: Vec<FieldDescriptor>) -> Self {
        let entity_key_field = fields
            .iter()
            .find(|f| f.entity_key)
            .map(|f| f.name.clone())
            .unwrap_or_else(|| "id".to_string());

        let mut all_fields = envelope_fields();
        all_fields.extend(fields);

        Self {
            kind,
            table_name: kind.table_name().to_string(),
            entity_key_field,
            fields: all_fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Fields that get sibling embeddings.
    pub fn embeddable_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.is_embeddable())
            .map(|f| f.name.clone())
            .collect()
    }

    /// Natural-key columns for the composite unique constraint, in
    /// declaration order (entity key first).
    pub fn natural_key_fields(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .fields
            .iter()
            .filter(|f| f.entity_key)
            .map(|f| f.name.clone())
            .collect();
        keys.extend(
            self.fields
                .iter()
                .filter(|f| f.composite_key)
                .map(|f| f.name.clone()),
        );
        keys
    }

    /// Name of the sibling embeddings table.
    pub fn embeddings_table(&self) -> String {
        format!("embeddings_{}", self.table_name)
    }
}

/// Envelope columns shared by every entity table.
fn envelope_fields() -> Vec<FieldDescriptor> {
    vec![
        FieldDescriptor::new("id", FieldType::Uuid),
        FieldDescriptor::new("tenant_id", FieldType::Text),
        FieldDescriptor::new("user_id", FieldType::Text).nullable(),
        FieldDescriptor::new("created_at", FieldType::Timestamp),
        FieldDescriptor::new("updated_at", FieldType::Timestamp),
        FieldDescriptor::new("deleted_at", FieldType::Timestamp).nullable(),
        FieldDescriptor::new("metadata", FieldType::Json),
        FieldDescriptor::new("tags", FieldType::TextArray),
        FieldDescriptor::new("graph_edges", FieldType::Json),
    ]
}

/// Process-wide set of entity descriptors, populated at startup.
///
/// Write-once: built before the server starts serving and read-only after.
/// Keyed by table name; iteration order is deterministic (BTreeMap) so the
/// schema generator emits byte-identical output for the same registry.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    tables: BTreeMap<String, EntityDescriptor>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry containing the seven core entity kinds.
    pub fn core() -> Self {
        let mut registry = Self::new();
        for descriptor in core_descriptors() {
            registry.register(descriptor);
        }
        registry
    }

    /// Register a descriptor, replacing any existing one for the same table.
    pub fn register(&mut self, descriptor: EntityDescriptor) {
        self.tables.insert(descriptor.table_name.clone(), descriptor);
    }

    pub fn get(&self, table_name: &str) -> Option<&EntityDescriptor> {
        self.tables.get(table_name)
    }

    /// Descriptor for a table, or a validation error naming it.
    pub fn require(&self, table_name: &str) -> Result<&EntityDescriptor, ValidationError> {
        self.get(table_name)
            .ok_or_else(|| ValidationError::UnknownTable {
                table: table_name.to_string(),
            })
    }

    pub fn get_by_kind(&self, kind: EntityKind) -> Option<&EntityDescriptor> {
        self.tables.values().find(|d| d.kind == kind)
    }

    /// Allow-list of entity tables for the SQL query mode.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Descriptors for the core entity kinds.
fn core_descriptors() -> Vec<EntityDescriptor> {
    vec![
        EntityDescriptor::new(
            EntityKind::Resource,
            vec![
                FieldDescriptor::new("name", FieldType::Text),
                FieldDescriptor::new("uri", FieldType::Text).nullable().entity_key(),
                FieldDescriptor::new("ordinal", FieldType::Int).composite_key(),
                FieldDescriptor::new("content", FieldType::Text),
                FieldDescriptor::new("timestamp", FieldType::Timestamp),
                FieldDescriptor::new("category", FieldType::Text).nullable(),
                FieldDescriptor::new("related_entities", FieldType::Json),
            ],
        ),
        EntityDescriptor::new(
            EntityKind::Message,
            vec![
                FieldDescriptor::new("content", FieldType::Text),
                FieldDescriptor::new("message_type", FieldType::Text).nullable(),
                FieldDescriptor::new("session_id", FieldType::Text).nullable(),
            ],
        ),
        EntityDescriptor::new(
            EntityKind::Moment,
            vec![
                FieldDescriptor::new("name", FieldType::Text).entity_key(),
                FieldDescriptor::new("moment_type", FieldType::Text).nullable(),
                FieldDescriptor::new("category", FieldType::Text).nullable(),
                FieldDescriptor::new("starts_timestamp", FieldType::Timestamp),
                FieldDescriptor::new("ends_timestamp", FieldType::Timestamp).nullable(),
                FieldDescriptor::new("present_persons", FieldType::Json),
                FieldDescriptor::new("emotion_tags", FieldType::TextArray),
                FieldDescriptor::new("topic_tags", FieldType::TextArray),
                FieldDescriptor::new("summary", FieldType::Text).nullable(),
                FieldDescriptor::new("previous_moment_keys", FieldType::TextArray),
                FieldDescriptor::new("source_session_id", FieldType::Text).nullable(),
                FieldDescriptor::new("source_resource_ids", FieldType::TextArray),
            ],
        ),
        EntityDescriptor::new(
            EntityKind::User,
            vec![
                FieldDescriptor::new("name", FieldType::Text),
                FieldDescriptor::new("email", FieldType::Text).nullable().entity_key(),
                FieldDescriptor::new("tier", FieldType::Text),
                FieldDescriptor::new("summary", FieldType::Text).nullable(),
                FieldDescriptor::new("interests", FieldType::TextArray),
                FieldDescriptor::new("anonymous_ids", FieldType::TextArray),
            ],
        ),
        EntityDescriptor::new(
            EntityKind::File,
            vec![
                FieldDescriptor::new("uri", FieldType::Text).entity_key(),
                FieldDescriptor::new("name", FieldType::Text),
                FieldDescriptor::new("mime_type", FieldType::Text).nullable(),
                FieldDescriptor::new("size_bytes", FieldType::BigInt),
                FieldDescriptor::new("processing_status", FieldType::Text),
            ],
        ),
        EntityDescriptor::new(
            EntityKind::Schema,
            vec![
                FieldDescriptor::new("name", FieldType::Text).entity_key(),
                FieldDescriptor::new("content", FieldType::Text),
                FieldDescriptor::new("spec", FieldType::Json),
                FieldDescriptor::new("category", FieldType::Text).nullable(),
            ],
        ),
        EntityDescriptor::new(
            EntityKind::Session,
            vec![
                FieldDescriptor::new("name", FieldType::Text).entity_key(),
                FieldDescriptor::new("title", FieldType::Text).nullable(),
                FieldDescriptor::new("last_processed_index", FieldType::Int),
                FieldDescriptor::new("agent_schema", FieldType::Text).nullable(),
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_registry_contains_all_kinds() {
        let registry = ModelRegistry::core();
        assert_eq!(registry.len(), 7);
        for kind in EntityKind::all() {
            assert!(registry.get_by_kind(kind).is_some(), "missing {kind}");
        }
    }

    #[test]
    fn test_resource_natural_key_is_composite() {
        let registry = ModelRegistry::core();
        let resources = registry.get("resources").unwrap();
        assert_eq!(resources.entity_key_field, "uri");
        assert_eq!(
            resources.natural_key_fields(),
            vec!["uri".to_string(), "ordinal".to_string()]
        );
    }

    #[test]
    fn test_default_embeddable_convention() {
        let registry = ModelRegistry::core();
        let resources = registry.get("resources").unwrap();
        let embeddable = resources.embeddable_fields();
        assert!(embeddable.contains(&"content".to_string()));
        assert!(!embeddable.contains(&"name".to_string()));

        let moments = registry.get("moments").unwrap();
        assert!(moments.embeddable_fields().contains(&"summary".to_string()));
    }

    #[test]
    fn test_explicit_embed_flag_overrides_convention() {
        let field = FieldDescriptor::new("content", FieldType::Text).embeddable(false);
        assert!(!field.is_embeddable());

        let field = FieldDescriptor::new("headline", FieldType::Text).embeddable(true);
        assert!(field.is_embeddable());
    }

    #[test]
    fn test_unknown_table_is_validation_error() {
        let registry = ModelRegistry::core();
        let err = registry.require("widgets").unwrap_err();
        assert!(matches!(err, ValidationError::UnknownTable { .. }));
    }

    #[test]
    fn test_envelope_columns_present_everywhere() {
        let registry = ModelRegistry::core();
        for descriptor in registry.descriptors() {
            for col in ["id", "tenant_id", "deleted_at", "graph_edges"] {
                assert!(descriptor.has_field(col), "{} missing {col}", descriptor.table_name);
            }
        }
    }
}
