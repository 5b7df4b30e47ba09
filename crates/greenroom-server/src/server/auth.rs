//! Bearer-token request guards.

use std::sync::Arc;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts, RequestPartsExt};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use tracing::{debug, warn};

use greenroom_chat::AuthenticatedUser;

use crate::server::{error::ApiError, AppState};

/// A signed-in user with a verified email.
///
/// Rejects with 401 when the bearer token is missing, unknown, or expired,
/// and with 403 when the account has not verified its email yet.
#[derive(Debug)]
pub struct AuthUser(pub AuthenticatedUser);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| ApiError::unauthorized("missing bearer token"))?;

        let Some(user) = state.sessions.validate(bearer.token()).await? else {
            debug!("Rejected request with invalid or expired session");
            return Err(ApiError::unauthorized("invalid or expired session"));
        };
        if !user.email_verified {
            return Err(ApiError::forbidden("email not verified"));
        }
        Ok(Self(user))
    }
}

/// An [`AuthUser`] that must also hold the admin role.
#[derive(Debug)]
pub struct AdminUser(pub AuthenticatedUser);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            warn!(user_id = %user.id, "Non-admin called an admin endpoint");
            return Err(ApiError::forbidden("admin access required"));
        }
        Ok(Self(user))
    }
}
