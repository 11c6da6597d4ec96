//! Typed row codec
//!
//! Maps entity JSON (flat objects produced by serde on the entity structs)
//! to SQL parameters and Postgres rows back to entity JSON, driven by the
//! entity descriptors. The codec is the only place that knows how a
//! `FieldType` crosses the wire.

use chrono::{DateTime, Utc};
use rem_core::{EntityDescriptor, FieldType, RemError, RemResult};
use serde_json::{Map, Value};
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;
use uuid::Uuid;

/// A boxed SQL parameter ready for binding.
pub type SqlParam = Box<dyn ToSql + Sync + Send>;

/// Convert one JSON field value into a SQL parameter of the descriptor type.
pub fn value_to_param(field: &str, value: &Value, ty: FieldType) -> RemResult<SqlParam> {
    let type_error = |expected: &str| {
        RemError::query_execution(format!(
            "field '{field}': expected {expected}, got {value}"
        ))
    };

    match ty {
        FieldType::Uuid => {
            let parsed: Option<Uuid> = match value {
                Value::Null => None,
                Value::String(s) => {
                    Some(Uuid::parse_str(s).map_err(|_| type_error("uuid"))?)
                }
                _ => return Err(type_error("uuid")),
            };
            Ok(Box::new(parsed))
        }
        FieldType::Text => {
            let parsed: Option<String> = match value {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                _ => return Err(type_error("text")),
            };
            Ok(Box::new(parsed))
        }
        FieldType::Int => {
            let parsed: Option<i32> = match value {
                Value::Null => None,
                Value::Number(n) => Some(
                    n.as_i64()
                        .and_then(|v| i32::try_from(v).ok())
                        .ok_or_else(|| type_error("integer"))?,
                ),
                _ => return Err(type_error("integer")),
            };
            Ok(Box::new(parsed))
        }
        FieldType::BigInt => {
            let parsed: Option<i64> = match value {
                Value::Null => None,
                Value::Number(n) => Some(n.as_i64().ok_or_else(|| type_error("bigint"))?),
                _ => return Err(type_error("bigint")),
            };
            Ok(Box::new(parsed))
        }
        FieldType::Float => {
            let parsed: Option<f64> = match value {
                Value::Null => None,
                Value::Number(n) => n.as_f64(),
                _ => return Err(type_error("float")),
            };
            Ok(Box::new(parsed))
        }
        FieldType::Bool => {
            let parsed: Option<bool> = match value {
                Value::Null => None,
                Value::Bool(b) => Some(*b),
                _ => return Err(type_error("bool")),
            };
            Ok(Box::new(parsed))
        }
        FieldType::Timestamp => {
            let parsed: Option<DateTime<Utc>> = match value {
                Value::Null => None,
                Value::String(s) => Some(
                    DateTime::parse_from_rfc3339(s)
                        .map(|dt| dt.with_timezone(&Utc))
                        .map_err(|_| type_error("rfc3339 timestamp"))?,
                ),
                _ => return Err(type_error("rfc3339 timestamp")),
            };
            Ok(Box::new(parsed))
        }
        FieldType::Json => {
            // Composite fields (inline edges, metadata, persons) serialize
            // to the store's native JSONB.
            let parsed: Option<Value> = match value {
                Value::Null => Some(Value::Null),
                other => Some(other.clone()),
            };
            Ok(Box::new(parsed))
        }
        FieldType::TextArray => {
            let parsed: Option<Vec<String>> = match value {
                Value::Null => Some(Vec::new()),
                Value::Array(items) => Some(
                    items
                        .iter()
                        .map(|item| {
                            item.as_str()
                                .map(str::to_string)
                                .ok_or_else(|| type_error("text array"))
                        })
                        .collect::<RemResult<_>>()?,
                ),
                _ => return Err(type_error("text array")),
            };
            Ok(Box::new(parsed))
        }
    }
}

/// Convert a fetched row back into flat entity JSON, descriptor-driven.
/// Columns the descriptor does not know are skipped.
pub fn row_to_value(row: &Row, descriptor: &EntityDescriptor) -> Value {
    let mut object = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let Some(field) = descriptor.field(column.name()) else {
            continue;
        };
        let value = match field.field_type {
            FieldType::Uuid => row
                .try_get::<_, Option<Uuid>>(idx)
                .ok()
                .flatten()
                .map(|v| Value::String(v.to_string())),
            FieldType::Text => row
                .try_get::<_, Option<String>>(idx)
                .ok()
                .flatten()
                .map(Value::String),
            FieldType::Int => row
                .try_get::<_, Option<i32>>(idx)
                .ok()
                .flatten()
                .map(|v| Value::Number(v.into())),
            FieldType::BigInt => row
                .try_get::<_, Option<i64>>(idx)
                .ok()
                .flatten()
                .map(|v| Value::Number(v.into())),
            FieldType::Float => row
                .try_get::<_, Option<f64>>(idx)
                .ok()
                .flatten()
                .and_then(|v| serde_json::Number::from_f64(v).map(Value::Number)),
            FieldType::Bool => row
                .try_get::<_, Option<bool>>(idx)
                .ok()
                .flatten()
                .map(Value::Bool),
            FieldType::Timestamp => row
                .try_get::<_, Option<DateTime<Utc>>>(idx)
                .ok()
                .flatten()
                .map(|v| Value::String(v.to_rfc3339())),
            FieldType::Json => row.try_get::<_, Option<Value>>(idx).ok().flatten(),
            FieldType::TextArray => row
                .try_get::<_, Option<Vec<String>>>(idx)
                .ok()
                .flatten()
                .map(|v| Value::Array(v.into_iter().map(Value::String).collect())),
        };
        object.insert(column.name().to_string(), value.unwrap_or(Value::Null));
    }
    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_uuid_param_accepts_string() {
        let id = Uuid::now_v7();
        assert!(value_to_param("id", &json!(id.to_string()), FieldType::Uuid).is_ok());
        assert!(value_to_param("id", &json!("not-a-uuid"), FieldType::Uuid).is_err());
        assert!(value_to_param("id", &Value::Null, FieldType::Uuid).is_ok());
    }

    #[test]
    fn test_int_bounds_checked() {
        assert!(value_to_param("ordinal", &json!(5), FieldType::Int).is_ok());
        assert!(value_to_param("ordinal", &json!(i64::MAX), FieldType::Int).is_err());
        assert!(value_to_param("ordinal", &json!("5"), FieldType::Int).is_err());
    }

    #[test]
    fn test_timestamp_requires_rfc3339() {
        assert!(value_to_param(
            "created_at",
            &json!("2024-10-01T12:00:00Z"),
            FieldType::Timestamp
        )
        .is_ok());
        assert!(value_to_param("created_at", &json!("yesterday"), FieldType::Timestamp).is_err());
    }

    #[test]
    fn test_text_array_rejects_mixed() {
        assert!(value_to_param("tags", &json!(["a", "b"]), FieldType::TextArray).is_ok());
        assert!(value_to_param("tags", &json!(["a", 1]), FieldType::TextArray).is_err());
        // Null normalizes to an empty array.
        assert!(value_to_param("tags", &Value::Null, FieldType::TextArray).is_ok());
    }
}
