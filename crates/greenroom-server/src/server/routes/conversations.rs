//! Conversation list endpoints.
//!
//! - GET /api/conversations - The caller's sidebar, most recent first
//! - DELETE /api/conversations/:user_id - Hide a conversation for the caller

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use tracing::{debug, instrument};

use greenroom_proto::{AckResponse, ConversationSummary};

use crate::server::{auth::AuthUser, error::ApiError, AppState};

/// GET /api/conversations
#[instrument(skip(state))]
pub async fn list_conversations_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let conversations = state.service.list_conversations(&user).await?;
    Ok(Json(conversations))
}

/// DELETE /api/conversations/:user_id
///
/// Idempotent: hiding a conversation that does not exist (or is already
/// hidden) succeeds quietly.
#[instrument(skip(state))]
pub async fn hide_conversation_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(other_user_id): Path<String>,
) -> Result<Json<AckResponse>, ApiError> {
    let hidden = state.service.hide_conversation(&user, &other_user_id).await?;
    debug!(hidden, "Hide conversation");
    Ok(Json(AckResponse::ok()))
}
