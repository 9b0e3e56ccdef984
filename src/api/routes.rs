use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{handlers, state::AppState};
use crate::services::health_routes;

pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let health = state.health.clone();

    Router::new()
        // Push stream
        .route("/api/live/stream", get(handlers::live_stream))
        // On-demand insights
        .route("/api/insights", post(handlers::request_insight))
        .with_state(state)
        // Health and metrics
        .merge(health_routes(health))
        .layer(cors)
}
