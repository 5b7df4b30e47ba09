//! User lookup endpoints.
//!
//! - GET /api/users/search?q= - Username substring search

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use tracing::instrument;

use greenroom_proto::UserPayload;

use crate::server::{auth::AuthUser, error::ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
}

/// GET /api/users/search
#[instrument(skip(state))]
pub async fn search_users_handler(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<UserPayload>>, ApiError> {
    let users = state.service.search_users(&user, &query.q).await?;
    Ok(Json(users))
}
