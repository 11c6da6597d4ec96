//! Engine invariants under randomized state
//!
//! Properties:
//! - every result row belongs to the querying tenant (live rows only)
//! - FUZZY hits respect the threshold and are sorted by similarity
//! - TRAVERSE never visits the same (kind, key) twice, path lengths are
//!   bounded by depth, and depth never exceeds the request

use std::sync::Arc;

use proptest::prelude::*;
use rem_core::{
    EntityKind, FuzzyParams, InlineEdge, LookupParams, ModelRegistry, QueryOutput, QueryParams,
    RemQuery, TraverseParams,
};
use rem_llm::mock::MockEmbeddingProvider;
use rem_query::{MemoryBackend, RemEngine, StoredEntity};

const TENANTS: [&str; 2] = ["acme", "globex"];

/// One randomized entity: key index, tenant index, deleted flag, and edge
/// targets (indexes into the same key space).
#[derive(Debug, Clone)]
struct SeedEntity {
    key_index: u8,
    tenant_index: usize,
    deleted: bool,
    edges: Vec<(u8, bool)>, // (target key index, strong weight)
}

fn key_name(index: u8) -> String {
    format!("doc-{index}")
}

fn arb_entity() -> impl Strategy<Value = SeedEntity> {
    (
        0u8..12,
        0usize..2,
        proptest::bool::weighted(0.15),
        proptest::collection::vec((0u8..12, any::<bool>()), 0..4),
    )
        .prop_map(|(key_index, tenant_index, deleted, edges)| SeedEntity {
            key_index,
            tenant_index,
            deleted,
            edges,
        })
}

fn build_engine(seeds: &[SeedEntity]) -> RemEngine {
    let backend = MemoryBackend::new();
    for seed in seeds {
        let mut entity = StoredEntity::new(
            TENANTS[seed.tenant_index],
            EntityKind::Resource,
            key_name(seed.key_index),
        )
        .summary(format!("document {}", seed.key_index));
        for (target, strong) in &seed.edges {
            entity = entity.with_edge(
                InlineEdge::new(key_name(*target), "references")
                    .with_weight(if *strong { 0.9 } else { 0.4 }),
            );
        }
        if seed.deleted {
            entity = entity.deleted();
        }
        backend.insert(entity);
    }
    RemEngine::new(
        Arc::new(backend),
        Arc::new(ModelRegistry::core()),
        Arc::new(MockEmbeddingProvider::new(16)),
    )
}

fn run_query(engine: &RemEngine, query: RemQuery) -> QueryOutput {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("test runtime")
        .block_on(engine.execute(&query))
        .expect("query execution")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Tenant isolation: LOOKUP over every key returns only rows seeded
    /// live under the querying tenant.
    #[test]
    fn prop_lookup_is_tenant_scoped(seeds in proptest::collection::vec(arb_entity(), 0..20)) {
        let engine = build_engine(&seeds);
        let all_keys: Vec<String> = (0u8..12).map(key_name).collect();

        let output = run_query(&engine, RemQuery::new(
            "acme",
            QueryParams::Lookup(LookupParams { keys: all_keys, user_id: None }),
        ));
        let QueryOutput::Lookup { entries } = output else { panic!("wrong output") };

        let live_acme: Vec<String> = seeds
            .iter()
            .filter(|s| !s.deleted && TENANTS[s.tenant_index] == "acme")
            .map(|s| key_name(s.key_index))
            .collect();
        for entry in &entries {
            prop_assert!(
                live_acme.contains(&entry.entity_key),
                "leaked row {}",
                entry.entity_key
            );
        }
    }

    /// FUZZY: similarity floor and descending order hold for any threshold.
    #[test]
    fn prop_fuzzy_threshold_and_order(
        seeds in proptest::collection::vec(arb_entity(), 0..20),
        threshold in 0.0f64..=1.0,
    ) {
        let engine = build_engine(&seeds);
        let output = run_query(&engine, RemQuery::new(
            "acme",
            QueryParams::Fuzzy(FuzzyParams {
                query_text: "doc".to_string(),
                threshold,
                limit: 50,
                user_id: None,
            }),
        ));
        let QueryOutput::Fuzzy { hits } = output else { panic!("wrong output") };

        for hit in &hits {
            prop_assert!(hit.similarity >= threshold);
        }
        for pair in hits.windows(2) {
            prop_assert!(pair[0].similarity >= pair[1].similarity);
        }
    }

    /// TRAVERSE: no node twice, path bounded by depth, depth bounded by the
    /// request, and tombstoned nodes never appear.
    #[test]
    fn prop_traverse_bounds(
        seeds in proptest::collection::vec(arb_entity(), 1..20),
        depth in 1i32..4,
    ) {
        let engine = build_engine(&seeds);
        let start = key_name(seeds[0].key_index);

        let output = run_query(&engine, RemQuery::new(
            "acme",
            QueryParams::Traverse(TraverseParams {
                start_key: start,
                edge_types: Vec::new(),
                max_depth: depth,
                user_id: None,
            }),
        ));
        let QueryOutput::Traverse { nodes } = output else { panic!("wrong output") };

        let mut seen = std::collections::HashSet::new();
        for node in &nodes {
            prop_assert!(node.depth >= 1 && node.depth <= depth);
            prop_assert!(node.path.len() as i32 == node.depth + 1);
            prop_assert!(
                seen.insert((node.entity_kind, node.entity_key.clone())),
                "node {} visited twice",
                node.entity_key
            );
            let tombstoned = seeds.iter().any(|s| {
                key_name(s.key_index) == node.entity_key
                    && TENANTS[s.tenant_index] == "acme"
                    && s.deleted
            });
            let live = seeds.iter().any(|s| {
                key_name(s.key_index) == node.entity_key
                    && TENANTS[s.tenant_index] == "acme"
                    && !s.deleted
            });
            prop_assert!(live || !tombstoned, "tombstone surfaced: {}", node.entity_key);
        }
    }
}
