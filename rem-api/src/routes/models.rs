//! Static model catalog

use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

/// Known model identifiers in `provider:model` form.
const MODEL_CATALOG: [&str; 6] = [
    "openai:gpt-4.1",
    "openai:gpt-4.1-mini",
    "openai:gpt-4o",
    "anthropic:claude-sonnet-4-5",
    "anthropic:claude-haiku-4-5",
    "cerebras:llama-3.3-70b",
];

pub async fn list_models() -> Json<Value> {
    let created = Utc::now().timestamp();
    let data: Vec<Value> = MODEL_CATALOG
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "created": created,
                "owned_by": id.split(':').next().unwrap_or("unknown"),
            })
        })
        .collect();
    Json(json!({"object": "list", "data": data}))
}
