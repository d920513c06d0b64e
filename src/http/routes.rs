use super::handlers;
use super::state::AppState;
use super::ws;
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, patch, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        .route("/api", get(handlers::api_info))
        // Session control
        .route(
            "/sessions",
            post(handlers::create_session).get(handlers::list_sessions),
        )
        .route("/sessions/:key", get(handlers::get_session))
        .route("/sessions/:key/end", post(handlers::end_session))
        .route("/sessions/:key/languages", patch(handlers::update_languages))
        // Broadcaster media and viewer subscriptions
        .route("/sessions/:key/media", get(ws::media_socket))
        .route("/ws", get(ws::viewer_socket))
        .fallback(handlers::not_found)
        .layer(cors_layer(&state.service.frontend_url))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(frontend_url: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    match HeaderValue::from_str(frontend_url) {
        Ok(origin) => layer.allow_origin(origin),
        Err(_) => {
            warn!("Ignoring invalid frontend origin {:?}", frontend_url);
            layer
        }
    }
}
