use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Listening control
        .route("/listen/start", post(handlers::start_listening))
        .route("/listen/stop", post(handlers::stop_listening))
        // Selection
        .route("/device", put(handlers::select_device))
        .route("/voice", put(handlers::select_voice))
        // Queries
        .route("/status", get(handlers::get_status))
        .route("/devices", get(handlers::list_devices))
        .route("/voices", get(handlers::list_voices))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
