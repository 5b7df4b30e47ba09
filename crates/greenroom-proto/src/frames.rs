//! Socket frame types.
//!
//! Frames are tagged JSON objects: `{"type": "...", "data": {...}}` with
//! camelCase payload keys. The enums are closed so frame handling is
//! exhaustive at compile time; an unrecognized `type` simply fails to parse,
//! and both ends treat that as "ignore this frame" so either side can grow
//! the protocol without breaking the other.

use serde::{Deserialize, Serialize};

use crate::api::MessagePayload;

/// Frames a client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientFrame {
    /// First frame on every connection: binds the socket to the session that
    /// owns `token`. The server validates the token against the session
    /// store and never trusts a client-claimed user id.
    Auth { token: String },
    /// The sender started typing to `receiver_id`. Ephemeral, best-effort.
    TypingStart { receiver_id: String },
    /// The sender stopped typing to `receiver_id`. Ephemeral, best-effort.
    TypingStop { receiver_id: String },
}

/// Frames the server pushes to connected clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerFrame {
    /// Acknowledges a successful `auth` frame. Clients do not have to wait
    /// for it — registration is already complete when it is sent.
    Authenticated { user_id: String },
    /// A user crossed the offline/online boundary. Not sent for additional
    /// connections of an already-online user.
    OnlineStatus { user_id: String, online: bool },
    /// `user_id` started typing to the recipient of this frame.
    TypingStart { user_id: String },
    /// `user_id` stopped typing to the recipient of this frame.
    TypingStop { user_id: String },
    /// A message was persisted; pushed to the receiver and to the sender's
    /// other connections after commit. A hint to append/refetch — the store
    /// order (createdAt, id) is authoritative.
    NewMessage { message: MessagePayload },
    /// The other participant marked the conversation read.
    MessageRead {
        conversation_id: String,
        read_by: String,
    },
    /// A message was soft-deleted; both participants re-render it as a
    /// placeholder.
    MessageDeleted { message_id: String },
    /// Cross-cutting notification channel (admin broadcasts and other
    /// non-messaging features). Never conversation-scoped.
    Notification {
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        variant: Option<NotificationVariant>,
    },
}

/// Display style hint for [`ServerFrame::Notification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationVariant {
    Info,
    Success,
    Warning,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn auth_frame_parses_from_client_json() {
        let raw = r#"{"type":"auth","data":{"token":"tok_abc123"}}"#;
        let frame: ClientFrame = serde_json::from_str(raw).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Auth {
                token: "tok_abc123".to_string()
            }
        );
    }

    #[test]
    fn typing_frames_use_camel_case_payload_keys() {
        let raw = r#"{"type":"typing_start","data":{"receiverId":"u2"}}"#;
        let frame: ClientFrame = serde_json::from_str(raw).unwrap();
        assert_eq!(
            frame,
            ClientFrame::TypingStart {
                receiver_id: "u2".to_string()
            }
        );
    }

    #[test]
    fn unknown_frame_type_is_a_parse_error() {
        // The dispatch loops rely on this: unknown types fail to parse and
        // are skipped rather than closing the connection.
        let raw = r#"{"type":"ping","data":{}}"#;
        assert!(serde_json::from_str::<ClientFrame>(raw).is_err());
        assert!(serde_json::from_str::<ServerFrame>(raw).is_err());
    }

    #[test]
    fn new_message_frame_serializes_with_snake_case_tag() {
        let frame = ServerFrame::NewMessage {
            message: MessagePayload {
                id: "m1".to_string(),
                conversation_id: "c1".to_string(),
                sender_id: "u1".to_string(),
                receiver_id: "u2".to_string(),
                content: "hello".to_string(),
                image_url: None,
                is_read: false,
                deleted: false,
                created_at: Utc::now(),
            },
        };

        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "new_message");
        assert_eq!(value["data"]["message"]["senderId"], "u1");
        assert_eq!(value["data"]["message"]["isRead"], false);
        // Absent attachment is omitted entirely, not serialized as null.
        assert!(value["data"]["message"].get("imageUrl").is_none());
    }

    #[test]
    fn online_status_round_trips_through_the_tagged_form() {
        let frame = ServerFrame::OnlineStatus {
            user_id: "u7".to_string(),
            online: true,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""type":"online_status""#));
        assert!(json.contains(r#""userId":"u7""#));

        let parsed: ServerFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn notification_omits_empty_optional_fields() {
        let frame = ServerFrame::Notification {
            title: "Maintenance tonight".to_string(),
            description: None,
            variant: Some(NotificationVariant::Warning),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "notification");
        assert_eq!(value["data"]["variant"], "warning");
        assert!(value["data"].get("description").is_none());
    }
}
