use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::metrics::{metrics_handler, track_http_metrics};
use crate::middleware::auth::auth_middleware;
use crate::state::AppState;
use crate::websocket::handlers::ws_handler;

pub mod conversations;
pub mod preferences;
pub mod uploads;

use conversations::{
    get_conversation, get_message_history, list_conversations, open_conversation,
    resolve_conversation,
};
use preferences::{get_preferences, update_preferences};
use uploads::create_upload;

pub fn build_router(state: AppState) -> Router {
    // Introspection endpoints and the WebSocket route stay outside the REST
    // auth layer; the socket authenticates at upgrade time.
    let introspection = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/metrics", get(metrics_handler));

    let api_v1 = Router::new()
        .route("/conversations/open", post(open_conversation))
        .route("/conversations", get(list_conversations))
        .route("/conversations/resolve", post(resolve_conversation))
        .route("/conversations/:key", get(get_conversation))
        .route("/conversations/:key/messages", get(get_message_history))
        .route(
            "/notifications/preferences",
            get(get_preferences).put(update_preferences),
        )
        .route("/uploads", post(create_upload))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(introspection)
        .route("/ws", get(ws_handler))
        .nest("/api/v1", api_v1)
        .layer(middleware::from_fn(track_http_metrics))
        .with_state(state)
}
