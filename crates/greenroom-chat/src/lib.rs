//! Core domain of the Greenroom messaging subsystem.
//!
//! This crate owns everything between the HTTP/socket edge and the database:
//!
//! - [`registry`]: live socket connections per user, with best-effort push.
//! - [`presence`]: online/offline broadcasts derived from registry
//!   boundary transitions.
//! - [`storage`]: the durable conversation/message store (libSQL).
//! - [`session`]: bearer-token validation shared by HTTP and socket auth.
//! - [`service`]: the business operations (send, mark-read, delete, search)
//!   that mutate storage and fan events out through the registry.
//!
//! The split mirrors the system's core consistency rule: registry state is
//! transient per-process and rebuilt on restart, while storage is the
//! durable record. Durable mutations always commit before anything is
//! pushed.

pub mod error;
pub mod presence;
pub mod registry;
pub mod service;
pub mod session;
pub mod storage;

pub use error::ChatError;
pub use presence::PresenceTracker;
pub use registry::{
    ConnectionId, ConnectionRegistry, DeliveryReport, RegisterOutcome, UnregisterOutcome,
};
pub use service::ChatService;
pub use session::{AuthenticatedUser, SessionStore};
pub use storage::{
    ChatStorage, ConversationOverview, ConversationRecord, LibSqlChatStorage, MessagePage,
    MessageRecord, NewMessage, NewUser, ReadReceipt, StorageError, UserRecord, UserRole,
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
