//! Liveness

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "db_pool_size": state.db.pool_size(),
        "embedding_queue_depth": state.embedding_queue.depth(),
    }))
}
