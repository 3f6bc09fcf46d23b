//! API route definitions

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers;
use super::AppState;

/// Create API routes
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Health check
        .route("/api/v1/health", get(handlers::health_check))
        // Project management
        .route(
            "/api/v1/projects",
            get(handlers::list_projects).post(handlers::create_project),
        )
        .route(
            "/api/v1/projects/:id",
            get(handlers::get_project).delete(handlers::delete_project),
        )
        .route("/api/v1/projects/:id/parse", post(handlers::parse_project))
        // Questions
        .route("/api/v1/projects/:id/ask", post(handlers::ask_question))
        .route("/api/v1/projects/:id/chat", get(handlers::chat_history))
        // Graph queries
        .route("/api/v1/projects/:id/symbols", get(handlers::search_symbols))
        .route("/api/v1/nodes/:node_id", get(handlers::get_node))
        .route("/api/v1/nodes/:node_id/neighbors", get(handlers::neighbors))
        // Conversion
        .route("/api/v1/projects/:id/convert", post(handlers::convert_project))
        .route("/api/v1/jobs/:job_id", get(handlers::get_job))
        .route("/api/v1/jobs/:job_id/units", get(handlers::list_units))
        .route("/api/v1/jobs/:job_id/download", get(handlers::download_job))
        .route("/api/v1/jobs/:job_id/cancel", post(handlers::cancel_job))
        // Catalogue
        .route("/api/v1/languages", get(handlers::list_languages))
        .route("/api/v1/frameworks/:language", get(handlers::list_frameworks))
}
