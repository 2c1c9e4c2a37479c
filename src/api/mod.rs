pub mod auth;
pub mod chat;
pub mod friends;
pub mod middleware;
pub mod response;
pub mod state;

pub use middleware::RateLimiter;
pub use response::ApiResponse;
pub use state::AppState;

use axum::{
    extract::Request,
    middleware::{self as axum_middleware, Next},
    routing::{delete, get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::gateway;

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

pub fn create_router(state: AppState, rate_limiter: Arc<RateLimiter>) -> Router {
    let protected = Router::new()
        // Account
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/heartbeat", post(auth::heartbeat))
        .route("/api/users/:id", get(auth::user_public))
        // Chat
        .route("/api/chat/friends", get(chat::list_friends))
        .route("/api/chat/messages/:friend_id", get(chat::get_history))
        .route("/api/chat/send", post(chat::send_message))
        .route("/api/chat/mark-read", post(chat::mark_read))
        .route("/api/chat/unread-count", get(chat::unread_count))
        // Friend requests
        .route(
            "/api/friends/requests",
            post(friends::send_request).get(friends::list_incoming),
        )
        .route("/api/friends/requests/count", get(friends::pending_count))
        .route("/api/friends/requests/:id", post(friends::handle_request))
        .route(
            "/api/friends/requests/sent/:friend_id",
            delete(friends::cancel_request),
        )
        .route("/api/friends/:friend_id", delete(friends::remove_friend))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let rest = Router::new()
        .route("/api/health", get(health))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .merge(protected)
        .layer(axum_middleware::from_fn(move |req: Request, next: Next| {
            let limiter = rate_limiter.clone();
            middleware::rate_limit_middleware(limiter, req, next)
        }))
        .layer(TimeoutLayer::new(state.config.request_timeout()));

    // The live channel authenticates through its own handshake and must not
    // be cut off by the request timeout.
    Router::new()
        .route("/ws/chat/:friend_id", get(gateway::chat_socket))
        .merge(rest)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> ApiResponse<HealthResponse> {
    ApiResponse::ok(
        "healthy",
        HealthResponse {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    )
}
