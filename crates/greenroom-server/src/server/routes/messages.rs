//! Direct-message endpoints.
//!
//! - POST /api/messages/send - Persist a message and push it live
//! - GET /api/messages/conversation/:user_id - History with one user
//! - PUT /api/messages/mark-read - Mark a conversation read
//! - DELETE /api/messages/:message_id - Soft-delete a message
//! - GET /api/messages/unread-count - Total unread for the caller

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use tracing::instrument;

use greenroom_chat::{MessagePage, DEFAULT_PAGE_SIZE};
use greenroom_proto::{
    AckResponse, MarkReadRequest, MarkReadResponse, MessagePayload, SendMessageRequest,
    SendMessageResponse, UnreadCountResponse,
};

use crate::server::{auth::AuthUser, error::ApiError, AppState};

/// Query parameters for conversation history.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Maximum number of messages to return.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Return only messages strictly older than this message id.
    #[serde(default)]
    pub before: Option<String>,
}

/// POST /api/messages/send
#[instrument(skip(state, request))]
pub async fn send_message_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    let message = state.service.send_message(&user, request).await?;
    Ok(Json(SendMessageResponse { message }))
}

/// GET /api/messages/conversation/:user_id
#[instrument(skip(state))]
pub async fn conversation_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(other_user_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MessagePayload>>, ApiError> {
    let page = MessagePage {
        limit: query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
        before: query.before,
    };
    let messages = state
        .service
        .conversation_with(&user, &other_user_id, &page)
        .await?;
    Ok(Json(messages))
}

/// PUT /api/messages/mark-read
#[instrument(skip(state))]
pub async fn mark_read_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(request): Json<MarkReadRequest>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let updated = state.service.mark_read(&user, &request.other_user_id).await?;
    Ok(Json(MarkReadResponse { updated }))
}

/// DELETE /api/messages/:message_id
#[instrument(skip(state))]
pub async fn delete_message_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(message_id): Path<String>,
) -> Result<Json<AckResponse>, ApiError> {
    state.service.delete_message(&user, &message_id).await?;
    Ok(Json(AckResponse::ok()))
}

/// GET /api/messages/unread-count
#[instrument(skip(state))]
pub async fn unread_count_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<UnreadCountResponse>, ApiError> {
    let count = state.service.unread_count(&user).await?;
    Ok(Json(UnreadCountResponse { count }))
}
