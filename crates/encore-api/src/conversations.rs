use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use encore_types::api::{CreateConversationRequest, PageQuery, UpdateConversationRequest};
use encore_types::models::{Page, Principal};

use crate::error::ApiResult;
use crate::state::AppState;

/// 201 for a new row, 200 when an existing 1:1 conversation matched.
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<CreateConversationRequest>,
) -> ApiResult<impl IntoResponse> {
    let created = state
        .chat
        .create_conversation(principal.user_id, req)
        .await?;

    let status = if created.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(created.conversation)))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = Page::new(query.skip, query.take);
    let conversations = state
        .chat
        .directory
        .list_for_user(principal.user_id, page)
        .await?;
    Ok(Json(conversations))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let conversation = state
        .chat
        .directory
        .get(conversation_id, principal.user_id)
        .await?;
    Ok(Json(conversation))
}

pub async fn update_conversation(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<UpdateConversationRequest>,
) -> ApiResult<impl IntoResponse> {
    let conversation = state
        .chat
        .directory
        .update(conversation_id, principal.user_id, req)
        .await?;
    Ok(Json(conversation))
}

pub async fn delete_conversation(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state
        .chat
        .remove_conversation(conversation_id, principal.user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
