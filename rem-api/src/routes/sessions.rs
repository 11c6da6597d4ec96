//! Session CRUD

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::routes::agent_context;
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct SessionFilters {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(filters): Query<SessionFilters>,
) -> ApiResult<Json<Value>> {
    let context = agent_context(&headers);
    let sessions = state.repository("sessions")?;

    let mut eq_filters: Vec<(&str, Value)> = Vec::new();
    let user_id = filters.user_id.or(context.user_id);
    if let Some(user) = &user_id {
        eq_filters.push(("user_id", json!(user)));
    }
    let rows = sessions
        .fetch_many(
            &eq_filters,
            Some("created_at DESC"),
            Some(filters.limit.unwrap_or(100).clamp(1, 1000)),
        )
        .await?;
    // Tenant scoping happens in SQL only for natural-key paths; filter here.
    let rows: Vec<Value> = rows
        .into_iter()
        .filter(|r| r.get("tenant_id").and_then(Value::as_str) == Some(context.tenant_id.as_str()))
        .collect();
    Ok(Json(json!({"sessions": rows, "count": rows.len()})))
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub agent_schema: Option<String>,
}

pub async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateSessionRequest>,
) -> ApiResult<Json<Value>> {
    let context = agent_context(&headers);
    let name = body
        .name
        .unwrap_or_else(|| format!("sess-{}", Uuid::now_v7().simple()));

    let session = state
        .repository("sessions")?
        .upsert_one(json!({
            "tenant_id": context.tenant_id,
            "user_id": context.user_id,
            "name": name,
            "title": body.title,
            "agent_schema": body.agent_schema,
            "last_processed_index": 0,
        }))
        .await?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSessionRequest {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub agent_schema: Option<String>,
}

pub async fn update_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<UpdateSessionRequest>,
) -> ApiResult<Json<Value>> {
    let context = agent_context(&headers);
    let sessions = state.repository("sessions")?;

    let existing = sessions
        .fetch_many(&[("name", json!(body.name))], None, Some(1))
        .await?;
    let Some(mut session) = existing.into_iter().next() else {
        return Err(ApiError::not_found(format!("session '{}' not found", body.name)));
    };
    if session.get("tenant_id").and_then(Value::as_str) != Some(context.tenant_id.as_str()) {
        return Err(ApiError::not_found(format!("session '{}' not found", body.name)));
    }

    if let Value::Object(object) = &mut session {
        if let Some(title) = body.title {
            object.insert("title".to_string(), json!(title));
        }
        if let Some(schema) = body.agent_schema {
            object.insert("agent_schema".to_string(), json!(schema));
        }
    }
    Ok(Json(sessions.upsert_one(session).await?))
}
