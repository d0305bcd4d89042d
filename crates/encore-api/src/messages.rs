use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use encore_types::api::{PageQuery, SendMessageRequest};
use encore_types::models::{Page, Principal};

use crate::error::{ApiResult, ErrorResponse};
use crate::state::AppState;

/// Message history for a conversation, newest first.
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = Page::new(query.skip, query.take);
    let messages = state
        .chat
        .messages
        .history(conversation_id, principal.user_id, page)
        .await?;
    Ok(Json(messages))
}

/// Same pipeline as the gateway `sendMessage` event.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let message = state
        .chat
        .messages
        .send(principal.user_id, conversation_id, req.content)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn get_message(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(message_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let message = state.chat.messages.get(message_id, principal.user_id).await?;
    Ok(Json(message))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(message_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let status = state
        .chat
        .receipts
        .mark_as_read(message_id, principal.user_id)
        .await?;
    Ok(Json(status))
}

/// 404 `NOT_READ` until the caller has read the message; a missing message
/// is the usual 404 `NOT_FOUND`.
pub async fn get_read_status(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(message_id): Path<Uuid>,
) -> ApiResult<Response> {
    let status = state
        .chat
        .receipts
        .get_read_status(message_id, principal.user_id)
        .await?;

    Ok(match status {
        Some(status) => Json(status).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Message {} has not been read", message_id),
                code: "NOT_READ",
            }),
        )
            .into_response(),
    })
}
