use axum::{
    Json, Router, middleware,
    routing::{get, post},
};

use encore_types::api::HealthResponse;

use crate::conversations;
use crate::messages;
use crate::middleware::require_auth;
use crate::state::AppState;

/// REST routes: `/health` is public, everything else needs a bearer token.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new().route("/health", get(health));

    let protected_routes = Router::new()
        .route(
            "/conversations",
            post(conversations::create_conversation).get(conversations::list_conversations),
        )
        .route(
            "/conversations/{conversation_id}",
            get(conversations::get_conversation)
                .patch(conversations::update_conversation)
                .delete(conversations::delete_conversation),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::list_messages).post(messages::send_message),
        )
        .route("/messages/{message_id}", get(messages::get_message))
        .route(
            "/messages/{message_id}/read",
            post(messages::mark_read).get(messages::get_read_status),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
