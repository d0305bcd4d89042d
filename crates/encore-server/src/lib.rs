pub mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use encore_api::error::ApiError;
use encore_api::routes;
use encore_api::state::AppStateInner;
use encore_gateway::Chat;
use encore_gateway::auth::bearer_token;
use encore_gateway::connection;
use encore_types::events::ServerEvent;

/// REST routes plus the `/gateway` WebSocket endpoint, sharing one `Chat`.
pub fn build_app(chat: Chat) -> Router {
    let api = routes::router(Arc::new(AppStateInner { chat: chat.clone() }));

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(chat);

    Router::new()
        .merge(api)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// The handshake token comes from `Authorization: Bearer` or `?token=`.
/// A bad token is refused with 401 before the upgrade.
async fn ws_upgrade(
    State(chat): State<Chat>,
    headers: HeaderMap,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .or(query.token.as_deref());

    let principal = match chat.sessions.authenticate(token) {
        Ok(principal) => principal,
        Err(e) => return ApiError(e).into_response(),
    };

    ws.on_upgrade(move |socket| async move {
        match chat.sessions.open(principal).await {
            Ok(session) => connection::handle_connection(socket, chat, session).await,
            Err(e) => reject(socket, e.client_message()).await,
        }
    })
}

/// Tell the client why the session could not start, then close.
async fn reject(mut socket: WebSocket, message: String) {
    match serde_json::to_string(&ServerEvent::Error { message }) {
        Ok(text) => {
            let _ = socket.send(Message::Text(text.into())).await;
        }
        Err(e) => warn!("Failed to encode rejection: {}", e),
    }
    let _ = socket.send(Message::Close(None)).await;
}
