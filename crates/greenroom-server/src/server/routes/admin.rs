//! Admin endpoints.
//!
//! - POST /api/admin/notify - Push a notification banner to one user or to
//!   everyone online

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use greenroom_proto::NotificationVariant;

use crate::server::{auth::AdminUser, error::ApiError, AppState};

/// Request body for pushing a notification.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyRequest {
    /// Target user; omit to broadcast to everyone online.
    pub user_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub variant: Option<NotificationVariant>,
}

#[derive(Debug, Serialize)]
pub struct NotifyResponse {
    /// Connections the frame was queued for.
    pub sent: usize,
}

/// POST /api/admin/notify
#[instrument(skip(state, request))]
pub async fn notify_handler(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Json(request): Json<NotifyRequest>,
) -> Result<Json<NotifyResponse>, ApiError> {
    let report = match &request.user_id {
        Some(user_id) => {
            state
                .service
                .notify_user(
                    user_id,
                    &request.title,
                    request.description.as_deref(),
                    request.variant,
                )
                .await
        }
        None => {
            state
                .service
                .notify_all(
                    &request.title,
                    request.description.as_deref(),
                    request.variant,
                )
                .await
        }
    };

    info!(
        sent = report.sent,
        dropped = report.dropped(),
        broadcast = request.user_id.is_none(),
        "Notification dispatched"
    );
    Ok(Json(NotifyResponse { sent: report.sent }))
}
