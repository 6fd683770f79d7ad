//! API Router configuration

use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, patch, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState, enable_cors: bool) -> Router {
    let api_routes = Router::new()
        // Health and status
        .route("/health", get(handlers::health_check))
        .route("/status", get(handlers::daemon_status))
        // Drafts
        .route("/drafts", get(handlers::list_drafts))
        .route("/drafts/:id", get(handlers::get_draft))
        .route("/drafts/:id/approve", post(handlers::approve_draft))
        .route("/drafts/:id/reject", post(handlers::reject_draft))
        // Settings
        .route("/settings", get(handlers::get_settings))
        .route("/settings", patch(handlers::patch_settings))
        // Styles
        .route("/styles", get(handlers::list_styles))
        .route("/styles/rollback", post(handlers::rollback_style))
        .route("/styles/:id/activate", post(handlers::activate_style))
        // Learning
        .route("/memories", get(handlers::list_memories))
        // Threads
        .route("/threads/:id/stop", post(handlers::stop_thread))
        // Workers
        .route("/workers", get(handlers::list_workers))
        .route("/workers/:kind/enable", post(handlers::enable_worker))
        .route("/workers/:kind/run", post(handlers::run_worker))
        // System
        .route("/system/shutdown", post(handlers::shutdown_daemon));

    let router = Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http());

    let router = if enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}
