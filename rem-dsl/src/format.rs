//! Canonical formatter for REM queries
//!
//! Emits the canonical textual form of a typed query. `parse(format(q))`
//! yields `q` back, and `format` is stable across the round-trip, which is
//! what lets planner-emitted queries be logged, reviewed, and replayed
//! verbatim.

use rem_core::{
    FuzzyParams, LookupParams, QueryParams, SearchParams, SqlParams, TraverseParams,
};

/// Quote a token when the lexer would otherwise split or reinterpret it.
fn quote(value: &str) -> String {
    let needs_quoting = value.is_empty()
        || value.contains(char::is_whitespace)
        || value.contains('"')
        || value.contains('\'')
        || value.contains('\\')
        || value.contains('=');
    if !needs_quoting {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Quote only the value part of a `k=v` binding.
fn kv(key: &str, value: &str) -> String {
    let needs_quoting = value.is_empty()
        || value.contains(char::is_whitespace)
        || value.contains('"')
        || value.contains('\'')
        || value.contains('\\');
    if needs_quoting {
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        format!("{key}=\"{escaped}\"")
    } else {
        format!("{key}={value}")
    }
}

/// Format typed query parameters as the canonical dialect string.
pub fn format_params(params: &QueryParams) -> String {
    match params {
        QueryParams::Lookup(p) => format_lookup(p),
        QueryParams::Fuzzy(p) => format_fuzzy(p),
        QueryParams::Search(p) => format_search(p),
        QueryParams::Sql(p) => format_sql(p),
        QueryParams::Traverse(p) => format_traverse(p),
    }
}

fn format_lookup(p: &LookupParams) -> String {
    let mut parts = vec!["LOOKUP".to_string()];
    if p.keys.len() == 1 {
        parts.push(quote(&p.keys[0]));
    } else {
        parts.push(quote(&p.keys.join(",")));
    }
    if let Some(user_id) = &p.user_id {
        parts.push(kv("user_id", user_id));
    }
    parts.join(" ")
}

fn format_fuzzy(p: &FuzzyParams) -> String {
    let mut parts = vec!["FUZZY".to_string(), quote(&p.query_text)];
    parts.push(kv("threshold", &p.threshold.to_string()));
    parts.push(kv("limit", &p.limit.to_string()));
    if let Some(user_id) = &p.user_id {
        parts.push(kv("user_id", user_id));
    }
    parts.join(" ")
}

fn format_search(p: &SearchParams) -> String {
    let mut parts = vec!["SEARCH".to_string(), quote(&p.query_text)];
    parts.push(kv("table", &p.table_name));
    if let Some(field) = &p.field_name {
        parts.push(kv("field", field));
    }
    if let Some(sim) = p.min_similarity {
        parts.push(kv("min_similarity", &sim.to_string()));
    }
    if let Some(limit) = p.limit {
        parts.push(kv("limit", &limit.to_string()));
    }
    if let Some(provider) = &p.provider {
        parts.push(kv("provider", provider));
    }
    if let Some(user_id) = &p.user_id {
        parts.push(kv("user_id", user_id));
    }
    parts.join(" ")
}

fn format_sql(p: &SqlParams) -> String {
    let mut parts = vec!["SQL".to_string(), kv("table", &p.table_name)];
    if let Some(clause) = &p.where_clause {
        parts.push(kv("where", clause));
    }
    if let Some(limit) = p.limit {
        parts.push(kv("limit", &limit.to_string()));
    }
    parts.join(" ")
}

fn format_traverse(p: &TraverseParams) -> String {
    let mut parts = vec!["TRAVERSE".to_string(), quote(&p.start_key)];
    if !p.follows_all_edges() {
        parts.push(kv("rel_type", &p.edge_types.join(",")));
    }
    parts.push(kv("depth", &p.max_depth.to_string()));
    if let Some(user_id) = &p.user_id {
        parts.push(kv("user_id", user_id));
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;
    use proptest::prelude::*;
    use rem_core::{DEFAULT_FUZZY_THRESHOLD, DEFAULT_QUERY_LIMIT};

    #[test]
    fn test_format_lookup() {
        let params = QueryParams::Lookup(LookupParams::single("sarah-chen"));
        assert_eq!(format_params(&params), "LOOKUP sarah-chen");
    }

    #[test]
    fn test_format_quotes_multiword_text() {
        let params = QueryParams::Search(SearchParams::new("database migration", "resources"));
        assert_eq!(
            format_params(&params),
            r#"SEARCH "database migration" table=resources"#
        );
    }

    #[test]
    fn test_format_sql_quotes_where() {
        let params = QueryParams::Sql(SqlParams {
            table_name: "moments".to_string(),
            where_clause: Some("moment_type='meeting'".to_string()),
            limit: Some(100),
        });
        let text = format_params(&params);
        assert_eq!(
            text,
            r#"SQL table=moments where="moment_type='meeting'" limit=100"#
        );
        // And it survives a round-trip even with the embedded single quotes.
        let reparsed = parse(&text).unwrap();
        assert_eq!(reparsed, params);
    }

    #[test]
    fn test_roundtrip_examples() {
        let examples = [
            "LOOKUP sarah-chen",
            "FUZZY arcitecture threshold=0.3 limit=5",
            r#"SEARCH "database migration" table=resources limit=3"#,
            "TRAVERSE doc-a rel_type=references depth=1",
            "TRAVERSE doc-a depth=0",
        ];
        for text in examples {
            let parsed = parse(text).unwrap();
            let formatted = format_params(&parsed);
            let reparsed = parse(&formatted).unwrap();
            assert_eq!(parsed, reparsed, "round-trip diverged for {text}");
            assert_eq!(formatted, format_params(&reparsed));
        }
    }

    // Identifier-ish strings: what keys and table names look like in practice.
    fn identifier() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,18}"
    }

    // Free text without '=' or ',' (both have structural meaning to the
    // splitter before quoting applies).
    fn free_text() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9 .!?'-]{1,40}".prop_map(|s| s.trim().to_string()).prop_filter(
            "non-empty after trim",
            |s| !s.is_empty(),
        )
    }

    prop_compose! {
        fn arb_fuzzy()(
            text in free_text(),
            threshold in 0.0f64..=1.0,
            limit in 1i64..100,
        ) -> QueryParams {
            QueryParams::Fuzzy(FuzzyParams {
                query_text: text,
                threshold,
                limit,
                user_id: None,
            })
        }
    }

    prop_compose! {
        fn arb_lookup()(keys in prop::collection::vec(identifier(), 1..4)) -> QueryParams {
            QueryParams::Lookup(LookupParams { keys, user_id: None })
        }
    }

    prop_compose! {
        fn arb_traverse()(
            start in identifier(),
            edge_types in prop::collection::vec(identifier(), 0..3),
            depth in 0i32..5,
        ) -> QueryParams {
            QueryParams::Traverse(TraverseParams {
                start_key: start,
                edge_types,
                max_depth: depth,
                user_id: None,
            })
        }
    }

    prop_compose! {
        fn arb_search()(
            text in free_text(),
            table in identifier(),
            field in proptest::option::of(identifier()),
            limit in proptest::option::of(1i64..100),
        ) -> QueryParams {
            QueryParams::Search(SearchParams {
                query_text: text,
                table_name: table,
                field_name: field,
                min_similarity: None,
                limit,
                provider: None,
                user_id: None,
            })
        }
    }

    fn arb_params() -> impl Strategy<Value = QueryParams> {
        prop_oneof![arb_lookup(), arb_fuzzy(), arb_search(), arb_traverse()]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        /// format -> parse -> format is a fixed point.
        #[test]
        fn prop_format_parse_bijection(params in arb_params()) {
            let formatted = format_params(&params);
            let parsed = parse(&formatted).expect("canonical form must parse");
            prop_assert_eq!(format_params(&parsed), formatted);
        }

        /// Defaults materialize deterministically: a FUZZY without explicit
        /// threshold/limit parses to the documented defaults.
        #[test]
        fn prop_fuzzy_defaults(text in identifier()) {
            let parsed = parse(&format!("FUZZY {text}")).unwrap();
            match parsed {
                QueryParams::Fuzzy(p) => {
                    prop_assert_eq!(p.threshold, DEFAULT_FUZZY_THRESHOLD);
                    prop_assert_eq!(p.limit, DEFAULT_QUERY_LIMIT);
                }
                other => prop_assert!(false, "wrong mode {:?}", other),
            }
        }
    }
}
