pub mod chat;
pub mod middleware;
pub mod notifications;
pub mod state;
pub mod ws;

pub use state::AppState;

use axum::{
    Router,
    routing::{get, post},
    middleware as axum_middleware,
};
use tower_http::{
    cors::CorsLayer,
    trace::TraceLayer,
    timeout::TimeoutLayer,
};
use std::time::Duration;
use serde::Serialize;

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

pub fn create_router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout_secs);

    // Everything here requires a bearer token
    let protected = Router::new()
        .route("/api/chat/start-direct/", post(chat::start_direct))
        .route(
            "/api/chat/community/",
            get(chat::list_community).post(chat::create_community),
        )
        .route("/api/chat/rooms/", get(chat::list_rooms))
        .route("/api/chat/unread-counts/", get(chat::unread_counts))
        .route("/api/chat/:room_id/messages/", get(chat::get_messages))
        .route("/api/chat/:room_id/mark-read/", post(chat::mark_read))
        .route("/api/notifications/", get(notifications::list))
        .route(
            "/api/notifications/mark-all-read/",
            post(notifications::mark_all_read),
        )
        .route("/api/notifications/stats/", get(notifications::stats))
        .route(
            "/api/notifications/settings/",
            get(notifications::get_settings).put(notifications::update_settings),
        )
        .route(
            "/api/notifications/:id/",
            get(notifications::detail)
                .patch(notifications::update)
                .delete(notifications::delete),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    Router::new()
        // Health check
        .route("/api/health", get(health))

        // Sockets authorize themselves from the ?token= query
        .route("/ws/chat/:room_id/", get(ws::chat_socket))
        .route("/ws/notifications/", get(ws::notification_socket))

        .merge(protected)

        // Add request timeout
        .layer(TimeoutLayer::new(timeout))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> axum::Json<HealthResponse> {
    axum::Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
