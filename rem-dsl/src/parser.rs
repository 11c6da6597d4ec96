//! REM dialect parser
//!
//! First-token dispatch on the query mode, then argument binding: positional
//! tokens fill the mode's primary field, `k=v` tokens bind named parameters
//! with type coercion. A small alias table normalizes the short names agents
//! tend to emit (`table`, `depth`, `rel_type`). Unknown keys are rejected.

use std::collections::HashMap;

use rem_core::{
    FuzzyParams, LookupParams, QueryKind, QueryParams, SearchParams, SqlParams, TraverseParams,
    ValidationError, DEFAULT_FUZZY_THRESHOLD, DEFAULT_QUERY_LIMIT,
};

use crate::lexer::tokenize;

/// A bound named parameter after coercion.
#[derive(Debug, Clone, PartialEq)]
enum Bound {
    Str(String),
    Int(i64),
    Float(f64),
    List(Vec<String>),
}

impl Bound {
    fn as_str(&self) -> Option<&str> {
        match self {
            Bound::Str(s) => Some(s),
            _ => None,
        }
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            Bound::Int(i) => Some(*i),
            _ => None,
        }
    }

    fn as_float(&self) -> Option<f64> {
        match self {
            Bound::Float(f) => Some(*f),
            Bound::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    fn into_list(self) -> Vec<String> {
        match self {
            Bound::List(items) => items,
            Bound::Str(s) => vec![s],
            Bound::Int(i) => vec![i.to_string()],
            Bound::Float(f) => vec![f.to_string()],
        }
    }
}

/// Map caller-facing aliases to internal parameter names.
fn map_alias(key: &str) -> &str {
    match key {
        "table" => "table_name",
        "field" => "field_name",
        "where" => "where_clause",
        "depth" => "max_depth",
        "rel_type" | "rel_types" => "edge_types",
        "key" => "keys",
        other => other,
    }
}

/// Coerce a raw value by parameter name.
fn coerce(key: &str, value: &str) -> Result<Bound, ValidationError> {
    match key {
        "limit" | "max_depth" => value
            .parse::<i64>()
            .map(Bound::Int)
            .map_err(|_| ValidationError::InvalidValue {
                field: key.to_string(),
                reason: format!("expected integer, got '{value}'"),
            }),
        "threshold" | "min_similarity" => value
            .parse::<f64>()
            .map(Bound::Float)
            .map_err(|_| ValidationError::InvalidValue {
                field: key.to_string(),
                reason: format!("expected float, got '{value}'"),
            }),
        "edge_types" | "keys" => Ok(Bound::List(
            value.split(',').map(|v| v.trim().to_string()).collect(),
        )),
        _ => Ok(Bound::Str(value.to_string())),
    }
}

/// Named parameters each mode accepts.
fn allowed_keys(kind: QueryKind) -> &'static [&'static str] {
    match kind {
        QueryKind::Lookup => &["keys", "user_id"],
        QueryKind::Fuzzy => &["threshold", "limit", "user_id"],
        QueryKind::Search => &[
            "table_name",
            "field_name",
            "limit",
            "min_similarity",
            "provider",
            "user_id",
        ],
        QueryKind::Sql => &["table_name", "where_clause", "limit"],
        QueryKind::Traverse => &["edge_types", "max_depth", "user_id"],
    }
}

/// Parse a REM dialect string into typed query parameters.
///
/// The parser never executes; binding a tenant and running the query is the
/// engine's job.
pub fn parse(input: &str) -> Result<QueryParams, ValidationError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ValidationError::Malformed {
            reason: "empty query string".to_string(),
        });
    }

    let kind: QueryKind = tokens[0].parse()?;

    let mut named: HashMap<String, Bound> = HashMap::new();
    let mut positional: Vec<String> = Vec::new();

    for token in &tokens[1..] {
        match token.split_once('=') {
            Some((raw_key, value)) if !raw_key.is_empty() => {
                let key = map_alias(raw_key);
                if !allowed_keys(kind).contains(&key) {
                    return Err(ValidationError::UnknownParameter {
                        name: raw_key.to_string(),
                    });
                }
                named.insert(key.to_string(), coerce(key, value)?);
            }
            _ => positional.push(token.clone()),
        }
    }

    // Unquoted multi-word text reconstructs with single spaces.
    let primary = positional.join(" ");

    match kind {
        QueryKind::Lookup => build_lookup(primary, named),
        QueryKind::Fuzzy => build_fuzzy(primary, named),
        QueryKind::Search => build_search(primary, named),
        QueryKind::Sql => build_sql(positional, named),
        QueryKind::Traverse => build_traverse(primary, named),
    }
}

fn take_user_id(named: &mut HashMap<String, Bound>) -> Option<String> {
    named
        .remove("user_id")
        .and_then(|b| b.as_str().map(str::to_string))
}

fn build_lookup(
    primary: String,
    mut named: HashMap<String, Bound>,
) -> Result<QueryParams, ValidationError> {
    let user_id = take_user_id(&mut named);

    let keys = if !primary.is_empty() {
        if named.contains_key("keys") {
            return Err(ValidationError::Malformed {
                reason: "LOOKUP key given both positionally and as keys=".to_string(),
            });
        }
        if primary.contains(',') {
            primary.split(',').map(|k| k.trim().to_string()).collect()
        } else {
            vec![primary]
        }
    } else {
        match named.remove("keys") {
            Some(bound) => bound.into_list(),
            None => {
                return Err(ValidationError::MissingParameter {
                    name: "key".to_string(),
                })
            }
        }
    };

    Ok(QueryParams::Lookup(LookupParams { keys, user_id }))
}

fn build_fuzzy(
    primary: String,
    mut named: HashMap<String, Bound>,
) -> Result<QueryParams, ValidationError> {
    if primary.is_empty() {
        return Err(ValidationError::MissingParameter {
            name: "query_text".to_string(),
        });
    }

    let threshold = named
        .remove("threshold")
        .and_then(|b| b.as_float())
        .unwrap_or(DEFAULT_FUZZY_THRESHOLD);
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ValidationError::InvalidValue {
            field: "threshold".to_string(),
            reason: format!("must be in [0, 1], got {threshold}"),
        });
    }

    Ok(QueryParams::Fuzzy(FuzzyParams {
        query_text: primary,
        threshold,
        limit: named
            .remove("limit")
            .and_then(|b| b.as_int())
            .unwrap_or(DEFAULT_QUERY_LIMIT),
        user_id: take_user_id(&mut named),
    }))
}

fn build_search(
    primary: String,
    mut named: HashMap<String, Bound>,
) -> Result<QueryParams, ValidationError> {
    if primary.is_empty() {
        return Err(ValidationError::MissingParameter {
            name: "query_text".to_string(),
        });
    }
    let table_name = named
        .remove("table_name")
        .and_then(|b| b.as_str().map(str::to_string))
        .ok_or_else(|| ValidationError::MissingParameter {
            name: "table".to_string(),
        })?;

    let min_similarity = named.remove("min_similarity").and_then(|b| b.as_float());
    if let Some(sim) = min_similarity {
        if !(0.0..=1.0).contains(&sim) {
            return Err(ValidationError::InvalidValue {
                field: "min_similarity".to_string(),
                reason: format!("must be in [0, 1], got {sim}"),
            });
        }
    }

    Ok(QueryParams::Search(SearchParams {
        query_text: primary,
        table_name,
        field_name: named
            .remove("field_name")
            .and_then(|b| b.as_str().map(str::to_string)),
        min_similarity,
        limit: named.remove("limit").and_then(|b| b.as_int()),
        provider: named
            .remove("provider")
            .and_then(|b| b.as_str().map(str::to_string)),
        user_id: take_user_id(&mut named),
    }))
}

fn build_sql(
    positional: Vec<String>,
    mut named: HashMap<String, Bound>,
) -> Result<QueryParams, ValidationError> {
    if !positional.is_empty() {
        return Err(ValidationError::Malformed {
            reason: format!("SQL takes only named parameters, got '{}'", positional[0]),
        });
    }
    let table_name = named
        .remove("table_name")
        .and_then(|b| b.as_str().map(str::to_string))
        .ok_or_else(|| ValidationError::MissingParameter {
            name: "table".to_string(),
        })?;

    Ok(QueryParams::Sql(SqlParams {
        table_name,
        where_clause: named
            .remove("where_clause")
            .and_then(|b| b.as_str().map(str::to_string)),
        limit: named.remove("limit").and_then(|b| b.as_int()),
    }))
}

fn build_traverse(
    primary: String,
    mut named: HashMap<String, Bound>,
) -> Result<QueryParams, ValidationError> {
    if primary.is_empty() {
        return Err(ValidationError::MissingParameter {
            name: "start_key".to_string(),
        });
    }

    let max_depth = named
        .remove("max_depth")
        .and_then(|b| b.as_int())
        .unwrap_or(1);
    if max_depth < 0 {
        return Err(ValidationError::InvalidValue {
            field: "depth".to_string(),
            reason: format!("must be >= 0, got {max_depth}"),
        });
    }

    Ok(QueryParams::Traverse(TraverseParams {
        start_key: primary,
        edge_types: named
            .remove("edge_types")
            .map(Bound::into_list)
            .unwrap_or_default(),
        max_depth: max_depth as i32,
        user_id: take_user_id(&mut named),
    }))
}
