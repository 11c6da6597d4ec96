//! Schema diff mode
//!
//! Compares the derived target schema against a live catalog snapshot and
//! produces a migration plan. Infrastructure tables (key-store, migration
//! log) are excluded. The plan is ordered: tables first, then columns, then
//! nullability changes.

use std::collections::BTreeMap;

use rem_core::{FieldType, RemResult};

use crate::{Db, SchemaGenerator, INFRA_TABLES};

/// One column as reported by information_schema.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveColumn {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
}

/// Snapshot of the live store's public tables.
#[derive(Debug, Clone, Default)]
pub struct LiveCatalog {
    pub tables: BTreeMap<String, Vec<LiveColumn>>,
}

impl LiveCatalog {
    /// Introspect the live store.
    pub async fn introspect(db: &Db) -> RemResult<Self> {
        let rows = db
            .query(
                "SELECT table_name, column_name, data_type, is_nullable \
                 FROM information_schema.columns \
                 WHERE table_schema = 'public' \
                 ORDER BY table_name, ordinal_position",
                &[],
            )
            .await?;

        let mut tables: BTreeMap<String, Vec<LiveColumn>> = BTreeMap::new();
        for row in rows {
            let table: String = row.get(0);
            tables.entry(table).or_default().push(LiveColumn {
                name: row.get(1),
                data_type: row.get(2),
                is_nullable: row.get::<_, String>(3) == "YES",
            });
        }
        Ok(Self { tables })
    }

    fn column(&self, table: &str, name: &str) -> Option<&LiveColumn> {
        self.tables
            .get(table)
            .and_then(|cols| cols.iter().find(|c| c.name == name))
    }
}

/// Ordered migration statements derived from a diff.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationPlan {
    pub statements: Vec<String>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn to_sql(&self) -> String {
        self.statements.join("\n")
    }
}

/// information_schema data_type for a descriptor field type.
fn expected_data_type(ty: FieldType) -> &'static str {
    match ty {
        FieldType::Uuid => "uuid",
        FieldType::Text => "text",
        FieldType::Int => "integer",
        FieldType::BigInt => "bigint",
        FieldType::Float => "double precision",
        FieldType::Bool => "boolean",
        FieldType::Timestamp => "timestamp with time zone",
        FieldType::Json => "jsonb",
        FieldType::TextArray => "ARRAY",
    }
}

/// Compute the migration plan that brings `catalog` to the target schema.
pub fn diff_catalog(generator: &SchemaGenerator, catalog: &LiveCatalog) -> MigrationPlan {
    let mut plan = MigrationPlan::default();

    for descriptor in generator.registry().descriptors() {
        let table = &descriptor.table_name;
        if INFRA_TABLES.contains(&table.as_str()) {
            continue;
        }

        if !catalog.tables.contains_key(table) {
            // Whole table missing: emit the full DDL bundle for it.
            plan.statements.push(generator.table_ddl_bundle(descriptor));
            continue;
        }

        for field in &descriptor.fields {
            match catalog.column(table, &field.name) {
                None => {
                    let mut stmt = format!(
                        "ALTER TABLE {table} ADD COLUMN {} {}",
                        field.name,
                        field.field_type.sql_type()
                    );
                    // New NOT NULL columns need a default to backfill.
                    if !field.nullable {
                        match field.field_type {
                            FieldType::Json => stmt.push_str(" NOT NULL DEFAULT '{}'::jsonb"),
                            FieldType::TextArray => stmt.push_str(" NOT NULL DEFAULT '{}'"),
                            FieldType::Int | FieldType::BigInt => {
                                stmt.push_str(" NOT NULL DEFAULT 0")
                            }
                            FieldType::Text => stmt.push_str(" NOT NULL DEFAULT ''"),
                            FieldType::Bool => stmt.push_str(" NOT NULL DEFAULT FALSE"),
                            FieldType::Timestamp => stmt.push_str(" NOT NULL DEFAULT NOW()"),
                            FieldType::Uuid | FieldType::Float => {}
                        }
                    }
                    stmt.push(';');
                    plan.statements.push(stmt);
                }
                Some(live) => {
                    let expected = expected_data_type(field.field_type);
                    if live.data_type != expected {
                        plan.statements.push(format!(
                            "ALTER TABLE {table} ALTER COLUMN {} TYPE {} USING {}::{};",
                            field.name,
                            field.field_type.sql_type(),
                            field.name,
                            field.field_type.sql_type()
                        ));
                    }
                    // id stays under the primary-key constraint; skip it.
                    if field.name != "id" && live.is_nullable != field.nullable {
                        if field.nullable {
                            plan.statements.push(format!(
                                "ALTER TABLE {table} ALTER COLUMN {} DROP NOT NULL;",
                                field.name
                            ));
                        } else {
                            plan.statements.push(format!(
                                "ALTER TABLE {table} ALTER COLUMN {} SET NOT NULL;",
                                field.name
                            ));
                        }
                    }
                }
            }
        }
    }

    plan
}

impl SchemaGenerator {
    /// Full DDL bundle for one table, used when the diff finds it missing.
    pub fn table_ddl_bundle(&self, descriptor: &rem_core::EntityDescriptor) -> String {
        let mut sql = self.table_sql(descriptor);
        sql.push_str(&self.embeddings_sql(descriptor));
        sql.push_str(&self.indexes_sql(descriptor));
        sql.push_str(&self.kv_trigger_sql(descriptor));
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rem_core::{EntityDescriptor, ModelRegistry};

    fn generator() -> SchemaGenerator {
        SchemaGenerator::new(ModelRegistry::core())
    }

    /// Live catalog exactly matching a descriptor.
    fn live_columns(descriptor: &EntityDescriptor) -> Vec<LiveColumn> {
        descriptor
            .fields
            .iter()
            .map(|f| LiveColumn {
                name: f.name.clone(),
                data_type: expected_data_type(f.field_type).to_string(),
                is_nullable: f.nullable,
            })
            .collect()
    }

    fn full_catalog() -> LiveCatalog {
        let registry = ModelRegistry::core();
        let mut catalog = LiveCatalog::default();
        for descriptor in registry.descriptors() {
            catalog
                .tables
                .insert(descriptor.table_name.clone(), live_columns(descriptor));
        }
        catalog
    }

    #[test]
    fn test_matching_catalog_yields_empty_plan() {
        let plan = diff_catalog(&generator(), &full_catalog());
        assert!(plan.is_empty(), "unexpected plan: {:?}", plan.statements);
    }

    #[test]
    fn test_missing_table_emits_full_bundle() {
        let mut catalog = full_catalog();
        catalog.tables.remove("moments");
        let plan = diff_catalog(&generator(), &catalog);
        assert_eq!(plan.statements.len(), 1);
        assert!(plan.statements[0].contains("CREATE TABLE IF NOT EXISTS moments"));
        assert!(plan.statements[0].contains("rem_kv_sync_moments"));
    }

    #[test]
    fn test_missing_column_emits_add() {
        let mut catalog = full_catalog();
        catalog
            .tables
            .get_mut("users")
            .unwrap()
            .retain(|c| c.name != "interests");
        let plan = diff_catalog(&generator(), &catalog);
        assert_eq!(plan.statements.len(), 1);
        assert!(plan.statements[0].starts_with("ALTER TABLE users ADD COLUMN interests TEXT[]"));
    }

    #[test]
    fn test_type_change_emits_alter_with_using() {
        let mut catalog = full_catalog();
        for column in catalog.tables.get_mut("files").unwrap() {
            if column.name == "size_bytes" {
                column.data_type = "integer".to_string();
            }
        }
        let plan = diff_catalog(&generator(), &catalog);
        assert_eq!(plan.statements.len(), 1);
        assert!(plan.statements[0]
            .contains("ALTER TABLE files ALTER COLUMN size_bytes TYPE BIGINT USING size_bytes::BIGINT"));
    }

    #[test]
    fn test_nullability_change() {
        let mut catalog = full_catalog();
        for column in catalog.tables.get_mut("moments").unwrap() {
            if column.name == "name" {
                column.is_nullable = true;
            }
        }
        let plan = diff_catalog(&generator(), &catalog);
        assert_eq!(
            plan.statements,
            vec!["ALTER TABLE moments ALTER COLUMN name SET NOT NULL;".to_string()]
        );
    }

    #[test]
    fn test_infra_tables_excluded() {
        // kv_store present in the live catalog but never in descriptors;
        // the plan must not try to touch it.
        let mut catalog = full_catalog();
        catalog.tables.insert(
            "kv_store".to_string(),
            vec![LiveColumn {
                name: "tenant_id".to_string(),
                data_type: "text".to_string(),
                is_nullable: false,
            }],
        );
        let plan = diff_catalog(&generator(), &catalog);
        assert!(plan.is_empty());
    }
}
