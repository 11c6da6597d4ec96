//! Message feedback

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::routes::agent_context;
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub message_id: Uuid,
    /// Rating in [-1, 1] by convention (-1 down, 1 up).
    pub rating: i32,
    #[serde(default)]
    pub label: Option<String>,
}

/// Attach a rating/label to a message via metadata merge.
pub async fn submit_feedback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<FeedbackRequest>,
) -> ApiResult<Json<Value>> {
    let context = agent_context(&headers);
    let feedback = json!({
        "feedback": {
            "rating": body.rating,
            "label": body.label,
            "by": context.user_id,
            "at": chrono::Utc::now().to_rfc3339(),
        }
    });

    let updated = state
        .db
        .execute(
            "UPDATE messages SET metadata = metadata || $1::jsonb, updated_at = NOW() \
             WHERE id = $2 AND tenant_id = $3 AND deleted_at IS NULL",
            &[&feedback, &body.message_id, &context.tenant_id],
        )
        .await?;

    if updated == 0 {
        return Err(ApiError::not_found(format!(
            "message {} not found",
            body.message_id
        )));
    }
    Ok(Json(json!({"ok": true, "message_id": body.message_id})))
}
