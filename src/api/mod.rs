//! Axum handlers for the admin vector-store endpoints.

pub mod admin;
pub mod auth;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the application router. Every route requires an admin bearer token.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/rag/admin/vector/rebuild", post(admin::rebuild))
        .route("/rag/admin/vector/rebuild/stream", post(admin::rebuild_stream))
        .route("/rag/admin/vector/backup/stats", get(admin::backup_stats))
        .route("/rag/admin/vector/health", get(admin::vector_health))
        .with_state(state)
}
