//! REM API - HTTP surface and streaming orchestrator
//!
//! Routes (prefix `/api/v1`, optional root path for reverse proxies):
//! - `POST /chat/completions` - OpenAI-compatible chat; SSE when streamed
//! - `GET  /messages` - message listing with date/user/session filters
//! - `GET/POST/PUT /sessions` - session CRUD
//! - `GET  /models` - static model catalog
//! - `POST /messages/feedback` - attach a rating to a message
//! - `GET/POST /mcp/tools` - tool-server endpoint
//! - `GET  /auth/{provider}/{login,callback}`, `/auth/me`, `/auth/logout`
//! - `GET  /health` - liveness

mod config;
mod error;
mod jobs;
mod routes;
mod state;
mod streaming;

pub use config::*;
pub use error::*;
pub use jobs::*;
pub use state::*;
pub use streaming::*;

use axum::routing::{get, post};
use axum::Router;
use rem_core::RemResult;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the application router over a service container.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/chat/completions", post(routes::chat::chat_completions))
        .route("/messages", get(routes::messages::list_messages))
        .route("/messages/feedback", post(routes::feedback::submit_feedback))
        .route(
            "/sessions",
            get(routes::sessions::list_sessions)
                .post(routes::sessions::create_session)
                .put(routes::sessions::update_session),
        )
        .route("/models", get(routes::models::list_models))
        .route("/mcp/tools", get(routes::mcp::list_tools))
        .route("/mcp/tools/:name", post(routes::mcp::call_tool))
        .route("/auth/:provider/login", get(routes::auth::login))
        .route("/auth/:provider/callback", get(routes::auth::callback))
        .route("/auth/me", get(routes::auth::me))
        .route("/auth/logout", post(routes::auth::logout))
        .route("/health", get(routes::health::health));

    let root_path = state.config.root_path.clone();
    let cors = if state.config.is_production() {
        let origins: Vec<axum::http::HeaderValue> = state
            .config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(origins)
    } else {
        CorsLayer::permissive()
    };

    let router = Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    if root_path.is_empty() {
        router
    } else {
        Router::new().nest(&root_path, router)
    }
}

/// Build services from the environment and serve until shutdown.
pub async fn serve() -> RemResult<()> {
    let (container, mut worker) = ServiceContainer::from_env().await?;
    let bind_addr = container.config.bind_addr;
    let state: AppState = std::sync::Arc::new(container);

    let (compaction_handle, compaction_shutdown) =
        spawn_compaction_job(state.clone(), CompactionJobConfig::from_env());
    let router = build_router(state);

    tracing::info!(%bind_addr, "rem api listening");
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| rem_core::RemError::config(format!("bind failed: {e}")))?;

    let result = axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .map_err(|e| rem_core::RemError::query_execution(e.to_string()));

    let _ = compaction_shutdown.send(true);
    let _ = compaction_handle.await;
    worker.stop().await;
    result
}
