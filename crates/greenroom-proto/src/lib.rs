//! Wire protocol and shared payload types for Greenroom.
//!
//! This crate defines the two surfaces both ends of the system agree on:
//!
//! - [`frames`]: the socket protocol — one JSON object per text frame,
//!   discriminated by a `type` field with the payload under `data`.
//! - [`api`]: the JSON bodies of the HTTP messaging API and the message/
//!   conversation payloads embedded in socket frames.
//!
//! Everything here is plain data. The server (`greenroom-server`) and the
//! client session manager (`greenroom-client`) both depend on this crate and
//! nothing heavier.

pub mod api;
pub mod frames;

pub use api::{
    AckResponse, ConversationSummary, LastMessagePreview, MarkReadRequest, MarkReadResponse,
    MessagePayload, SendMessageRequest, SendMessageResponse, UnreadCountResponse, UserPayload,
    MAX_CONTENT_LENGTH, MIN_SEARCH_QUERY_LENGTH,
};
pub use frames::{ClientFrame, NotificationVariant, ServerFrame};
