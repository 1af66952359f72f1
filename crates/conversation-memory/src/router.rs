use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    // Public routes
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check));

    let conversation_routes = Router::new()
        .route("/api/credentials", put(handlers::chat::credentials_handler))
        .route(
            "/api/conversations/{track}",
            get(handlers::chat::conversation_handler),
        )
        .route(
            "/api/conversations/{track}/messages",
            post(handlers::chat::send_message_handler),
        );

    Router::new()
        .merge(public_routes)
        .merge(conversation_routes)
        // CORS
        .layer(CorsLayer::permissive())
        // Tracing
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false)),
        )
        .with_state(state)
}
