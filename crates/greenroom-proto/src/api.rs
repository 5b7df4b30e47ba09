//! JSON payloads of the HTTP messaging API.
//!
//! These are the exact wire shapes: camelCase keys, RFC 3339 timestamps.
//! The same [`MessagePayload`] travels in HTTP responses and inside
//! [`new_message`](crate::frames::ServerFrame::NewMessage) socket frames, so
//! a client renders both identically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum accepted message content length, in characters.
pub const MAX_CONTENT_LENGTH: usize = 4000;

/// Minimum user-search query length; shorter queries are rejected before
/// they reach storage.
pub const MIN_SEARCH_QUERY_LENGTH: usize = 2;

/// A message as rendered to API and socket consumers.
///
/// Soft-deleted messages keep their slot in the conversation: `deleted` is
/// set, `content` is emptied and the attachment dropped, so ordering and
/// counts never shift under a reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub is_read: bool,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

/// Public view of a user. Deliberately excludes email and verification
/// state — those stay inside the auth boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPayload {
    pub id: String,
    pub username: String,
}

/// The newest message of a conversation, reduced to what the list view
/// renders. `content` is empty when `deleted` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessagePreview {
    pub content: String,
    pub sender_id: String,
    pub deleted: bool,
}

/// One entry of `GET /api/conversations`, ordered by `last_message_at`
/// descending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    pub other_user: UserPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessagePreview>,
    pub last_message_at: DateTime<Utc>,
    /// Unread messages in this conversation addressed to the requesting
    /// user. Always recomputed, never cached server-side.
    pub unread_count: u64,
}

/// Body of `POST /api/messages/send`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub receiver_id: String,
    /// May be empty when an image is attached.
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Response of `POST /api/messages/send`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub message: MessagePayload,
}

/// Body of `PUT /api/messages/mark-read`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub other_user_id: String,
}

/// Response of `PUT /api/messages/mark-read`: how many messages flipped to
/// read. Zero is a successful no-op, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub updated: u64,
}

/// Response of `GET /api/messages/unread-count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnreadCountResponse {
    pub count: u64,
}

/// Plain `{ "ok": true }` acknowledgment, returned by the delete and hide
/// endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckResponse {
    pub ok: bool,
}

impl AckResponse {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}
