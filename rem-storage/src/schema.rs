//! Schema generation from the model registry
//!
//! Derives, per entity kind: the primary table, the `embeddings_<table>`
//! sibling, the key-store trigger, and foreground indexes. Vector indexes
//! are emitted separately so bulk loads are not blocked behind index builds.
//!
//! The generator is deterministic: the same registry produces byte-identical
//! output (registry iteration order is a BTreeMap; nothing here consults a
//! clock or RNG).

use rem_core::{EntityDescriptor, FieldType, ModelRegistry};

/// Infrastructure tables excluded from generation and diffing.
pub const INFRA_TABLES: [&str; 2] = ["kv_store", "rem_migrations"];

/// Content-summary source fields in priority order.
const SUMMARY_SOURCES: [&str; 4] = ["content", "summary", "description", "name"];

/// Generates DDL from entity descriptors.
pub struct SchemaGenerator {
    registry: ModelRegistry,
    embedding_dimensions: usize,
}

impl SchemaGenerator {
    pub fn new(registry: ModelRegistry) -> Self {
        Self {
            registry,
            embedding_dimensions: 1536,
        }
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.embedding_dimensions = dimensions;
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Infrastructure DDL: extensions, the key-store, and the migration log.
    /// Applied once before entity tables.
    pub fn install_sql(&self) -> String {
        let mut sql = String::new();
        sql.push_str("-- REM install: extensions and infrastructure tables\n\n");
        sql.push_str("CREATE EXTENSION IF NOT EXISTS vector;\n");
        sql.push_str("CREATE EXTENSION IF NOT EXISTS pg_trgm;\n\n");

        sql.push_str(
            "CREATE TABLE IF NOT EXISTS kv_store (\n\
             \x20   tenant_id TEXT NOT NULL,\n\
             \x20   entity_key TEXT NOT NULL,\n\
             \x20   entity_type TEXT NOT NULL,\n\
             \x20   entity_id UUID NOT NULL,\n\
             \x20   user_id TEXT,\n\
             \x20   content_summary TEXT,\n\
             \x20   metadata JSONB NOT NULL DEFAULT '{}'::jsonb,\n\
             \x20   created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),\n\
             \x20   updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),\n\
             \x20   PRIMARY KEY (tenant_id, entity_key, entity_type)\n\
             );\n\n",
        );
        sql.push_str(
            "CREATE INDEX IF NOT EXISTS idx_kv_store_key_trgm ON kv_store USING gin (entity_key gin_trgm_ops);\n",
        );
        sql.push_str(
            "CREATE INDEX IF NOT EXISTS idx_kv_store_entity_id ON kv_store (entity_id);\n\n",
        );

        sql.push_str(
            "CREATE TABLE IF NOT EXISTS rem_migrations (\n\
             \x20   name TEXT PRIMARY KEY,\n\
             \x20   type TEXT NOT NULL,\n\
             \x20   version TEXT NOT NULL,\n\
             \x20   applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),\n\
             \x20   applied_by TEXT NOT NULL DEFAULT CURRENT_USER\n\
             );\n",
        );
        sql
    }

    /// Full entity schema: tables, embeddings siblings, key-store triggers,
    /// foreground indexes, and the migration record.
    pub fn generate(&self) -> String {
        let mut sql = String::new();
        sql.push_str("-- REM model schema\n");
        sql.push_str("-- Generated from the entity descriptor registry\n\n");

        for descriptor in self.registry.descriptors() {
            sql.push_str(&format!(
                "-- ============================================================================\n\
                 -- {}\n\
                 -- ============================================================================\n\n",
                descriptor.table_name.to_uppercase()
            ));
            sql.push_str(&self.table_sql(descriptor));
            sql.push('\n');
            sql.push_str(&self.embeddings_sql(descriptor));
            sql.push('\n');
            sql.push_str(&self.indexes_sql(descriptor));
            sql.push('\n');
            sql.push_str(&self.kv_trigger_sql(descriptor));
            sql.push('\n');
        }

        sql.push_str(
            "INSERT INTO rem_migrations (name, type, version)\n\
             VALUES ('install_models.sql', 'models', '1.0.0')\n\
             ON CONFLICT (name) DO UPDATE\n\
             SET applied_at = NOW(),\n\
             \x20   applied_by = CURRENT_USER;\n",
        );
        sql
    }

    /// Vector indexes, emitted separately and built concurrently so bulk
    /// loads are not blocked.
    pub fn background_indexes(&self) -> String {
        let mut sql = String::new();
        sql.push_str("-- Background index creation\n");
        sql.push_str("-- Run AFTER initial data load to avoid blocking writes\n\n");
        for descriptor in self.registry.descriptors() {
            if descriptor.embeddable_fields().is_empty() {
                continue;
            }
            let table = descriptor.embeddings_table();
            sql.push_str(&format!(
                "CREATE INDEX CONCURRENTLY IF NOT EXISTS idx_{table}_vector_hnsw\n\
                 ON {table}\n\
                 USING hnsw (embedding vector_cosine_ops);\n\n"
            ));
        }
        sql
    }

    // ========================================================================
    // PER-TABLE DDL
    // ========================================================================

    pub(crate) fn table_sql(&self, descriptor: &EntityDescriptor) -> String {
        let mut columns = Vec::new();
        for field in &descriptor.fields {
            let mut column = format!("    {} {}", field.name, field.field_type.sql_type());
            match field.name.as_str() {
                "id" => column.push_str(" PRIMARY KEY"),
                "tenant_id" => column.push_str(" NOT NULL DEFAULT 'default'"),
                "created_at" | "updated_at" => column.push_str(" NOT NULL DEFAULT NOW()"),
                "metadata" => column.push_str(" NOT NULL DEFAULT '{}'::jsonb"),
                "tags" => column.push_str(" NOT NULL DEFAULT '{}'"),
                "graph_edges" => column.push_str(" NOT NULL DEFAULT '[]'::jsonb"),
                _ => {
                    if field.field_type == FieldType::Json {
                        if field.nullable {
                            // nullable JSON stays bare
                        } else if field.name == "spec" {
                            column.push_str(" NOT NULL");
                        } else {
                            column.push_str(" NOT NULL DEFAULT '[]'::jsonb");
                        }
                    } else if field.field_type == FieldType::TextArray {
                        column.push_str(" NOT NULL DEFAULT '{}'");
                    } else if !field.nullable {
                        column.push_str(" NOT NULL");
                    }
                }
            }
            columns.push(column);
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n);\n",
            descriptor.table_name,
            columns.join(",\n")
        )
    }

    pub(crate) fn embeddings_sql(&self, descriptor: &EntityDescriptor) -> String {
        if descriptor.embeddable_fields().is_empty() {
            return String::new();
        }
        let table = descriptor.embeddings_table();
        format!(
            "-- Embeddings for {src}\n\
             CREATE TABLE IF NOT EXISTS {table} (\n\
             \x20   id UUID PRIMARY KEY,\n\
             \x20   entity_id UUID NOT NULL,\n\
             \x20   field_name TEXT NOT NULL,\n\
             \x20   provider TEXT NOT NULL,\n\
             \x20   model TEXT,\n\
             \x20   embedding vector({dims}),\n\
             \x20   created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),\n\
             \x20   updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),\n\
             \x20   UNIQUE (entity_id, field_name, provider)\n\
             );\n",
            src = descriptor.table_name,
            table = table,
            dims = self.embedding_dimensions,
        )
    }

    pub(crate) fn indexes_sql(&self, descriptor: &EntityDescriptor) -> String {
        let table = &descriptor.table_name;
        let mut sql = String::new();

        let natural_keys = descriptor.natural_key_fields();
        if !natural_keys.is_empty() {
            sql.push_str(&format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS uq_{table}_natural_key ON {table} (tenant_id, {keys}) WHERE deleted_at IS NULL;\n",
                keys = natural_keys.join(", ")
            ));
        }
        sql.push_str(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_tenant ON {table} (tenant_id);\n"
        ));
        sql.push_str(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_created_at ON {table} (created_at);\n"
        ));
        sql.push_str(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_metadata ON {table} USING gin (metadata jsonb_path_ops);\n"
        ));
        // Reverse traversal: (dst, rel_type) containment probes on inline edges.
        sql.push_str(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_graph_edges ON {table} USING gin (graph_edges jsonb_path_ops);\n"
        ));
        if descriptor.has_field("session_id") {
            sql.push_str(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_session ON {table} (tenant_id, session_id, created_at);\n"
            ));
        }
        sql
    }

    /// Key-store maintenance trigger. Populated transactionally on every
    /// insert/update so application code never writes kv_store directly.
    pub(crate) fn kv_trigger_sql(&self, descriptor: &EntityDescriptor) -> String {
        let table = &descriptor.table_name;
        let kind = descriptor.kind.as_str();
        let key_expr = self.entity_key_expr(descriptor);
        let summary_expr = self.summary_expr(descriptor);

        format!(
            "-- Key-store trigger for {table}\n\
             CREATE OR REPLACE FUNCTION rem_kv_sync_{table}() RETURNS trigger AS $$\n\
             BEGIN\n\
             \x20   IF NEW.deleted_at IS NOT NULL THEN\n\
             \x20       DELETE FROM kv_store\n\
             \x20       WHERE tenant_id = NEW.tenant_id AND entity_id = NEW.id;\n\
             \x20       RETURN NEW;\n\
             \x20   END IF;\n\
             \x20   INSERT INTO kv_store (tenant_id, entity_key, entity_type, entity_id, user_id, content_summary, metadata, created_at, updated_at)\n\
             \x20   VALUES (NEW.tenant_id, {key_expr}, '{kind}', NEW.id, NEW.user_id, {summary_expr}, NEW.metadata, NOW(), NOW())\n\
             \x20   ON CONFLICT (tenant_id, entity_key, entity_type) DO UPDATE SET\n\
             \x20       entity_id = EXCLUDED.entity_id,\n\
             \x20       user_id = EXCLUDED.user_id,\n\
             \x20       content_summary = EXCLUDED.content_summary,\n\
             \x20       metadata = EXCLUDED.metadata,\n\
             \x20       updated_at = NOW();\n\
             \x20   RETURN NEW;\n\
             END;\n\
             $$ LANGUAGE plpgsql;\n\
             \n\
             DROP TRIGGER IF EXISTS trg_{table}_kv_sync ON {table};\n\
             CREATE TRIGGER trg_{table}_kv_sync\n\
             AFTER INSERT OR UPDATE ON {table}\n\
             FOR EACH ROW EXECUTE FUNCTION rem_kv_sync_{table}();\n"
        )
    }

    /// SQL expression computing the natural key for kv_store rows. Composite
    /// members append as `#<value>` when non-zero (resource chunk ordinals).
    fn entity_key_expr(&self, descriptor: &EntityDescriptor) -> String {
        let primary = descriptor
            .fields
            .iter()
            .find(|f| f.entity_key)
            .map(|f| f.name.as_str());

        let mut expr = match primary {
            Some(field) => format!("COALESCE(NEW.{field}::text, NEW.id::text)"),
            None => "NEW.id::text".to_string(),
        };

        for field in descriptor.fields.iter().filter(|f| f.composite_key) {
            expr.push_str(&format!(
                " || CASE WHEN NEW.{name} <> 0 THEN '#' || NEW.{name}::text ELSE '' END",
                name = field.name
            ));
        }
        expr
    }

    /// SQL expression for the content summary column.
    fn summary_expr(&self, descriptor: &EntityDescriptor) -> String {
        for source in SUMMARY_SOURCES {
            if descriptor.has_field(source) {
                return format!("LEFT(NEW.{source}, 200)");
            }
        }
        "NULL".to_string()
    }
}
