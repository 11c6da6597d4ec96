//! Session identity surface
//!
//! The OAuth dance itself is an external collaborator; this module owns
//! only the narrow interface: kickoff/callback endpoints that defer to the
//! configured provider, and the `me`/`logout` identity surface derived from
//! request headers.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::routes::agent_context;
use crate::{ApiError, ApiResult, AppState};

/// Kick off a provider login. The redirect target comes from deployment
/// configuration; without one this surface reports the provider to use.
pub async fn login(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> ApiResult<Json<Value>> {
    let login_url = std::env::var(format!(
        "REM_AUTH_{}_LOGIN_URL",
        provider.to_uppercase()
    ))
    .ok();
    match login_url {
        Some(url) => Ok(Json(json!({"provider": provider, "redirect": url}))),
        None => Err(ApiError::unauthorized(
            format!("login provider '{provider}' is not configured"),
            Some(state.config.auth_provider_hint.clone()),
        )),
    }
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

/// OAuth return leg; token exchange is delegated to the provider adapter.
pub async fn callback(
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
) -> ApiResult<Json<Value>> {
    if params.code.is_none() {
        return Err(ApiError::bad_request("missing authorization code"));
    }
    Ok(Json(json!({
        "provider": provider,
        "status": "callback received",
    })))
}

/// Current identity from the request context.
pub async fn me(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    let context = agent_context(&headers);
    match context.user_id {
        Some(user_id) => Ok(Json(json!({
            "user_id": user_id,
            "tenant_id": context.tenant_id,
        }))),
        None => Err(ApiError::unauthorized(
            "no active session",
            Some(state.config.auth_provider_hint.clone()),
        )),
    }
}

pub async fn logout() -> Json<Value> {
    Json(json!({"ok": true}))
}
