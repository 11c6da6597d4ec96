//! Message listing

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use rem_storage::row_to_value;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::routes::agent_context;
use crate::{ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct MessageFilters {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Inclusive lower bound on `created_at`.
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`.
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// List messages with date, user, and session filters.
pub async fn list_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(filters): Query<MessageFilters>,
) -> ApiResult<Json<Value>> {
    let context = agent_context(&headers);
    let limit = filters.limit.unwrap_or(100).clamp(1, 1000);

    let rows = state
        .db
        .query(
            "SELECT * FROM messages \
             WHERE tenant_id = $1 AND deleted_at IS NULL \
               AND ($2::text IS NULL OR session_id = $2) \
               AND ($3::text IS NULL OR user_id = $3) \
               AND ($4::timestamptz IS NULL OR created_at >= $4) \
               AND ($5::timestamptz IS NULL OR created_at <= $5) \
             ORDER BY created_at DESC \
             LIMIT $6",
            &[
                &context.tenant_id,
                &filters.session_id,
                &filters.user_id,
                &filters.since,
                &filters.until,
                &limit,
            ],
        )
        .await?;

    let descriptor = state.registry.require("messages")?;
    let messages: Vec<Value> = rows.iter().map(|row| row_to_value(row, descriptor)).collect();
    Ok(Json(json!({"messages": messages, "count": messages.len()})))
}
