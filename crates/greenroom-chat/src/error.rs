//! Error types for the messaging domain.

use thiserror::Error;

use crate::storage::StorageError;

/// Errors surfaced by the messaging service.
///
/// Transport failures are deliberately absent: a push to a dead connection
/// is reported through [`DeliveryReport`](crate::registry::DeliveryReport)
/// counts and never becomes an error, and a duplicate-conversation race is
/// absorbed by the storage upsert before it can surface here.
#[derive(Error, Debug)]
pub enum ChatError {
    /// The caller may not perform this operation (wrong owner, missing
    /// privilege).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The referenced user, conversation, or message does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request itself is malformed: empty content, self-messaging,
    /// oversized payload, short search query.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The durable store failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ChatError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        ChatError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ChatError::NotFound(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ChatError::Validation(message.into())
    }
}
