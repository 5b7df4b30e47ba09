//! Messaging service.
//!
//! The one place send/read/delete semantics live: every transport (HTTP
//! routes today, whatever comes later) calls through here. Methods take the
//! already-authenticated caller, validate, hit storage, and only then fan
//! out realtime frames — a frame for an event that did not commit must never
//! reach a socket.

use std::sync::Arc;

use tracing::{debug, instrument};

use greenroom_proto::{
    ConversationSummary, LastMessagePreview, MessagePayload, NotificationVariant,
    SendMessageRequest, ServerFrame, UserPayload, MAX_CONTENT_LENGTH, MIN_SEARCH_QUERY_LENGTH,
};

use crate::error::ChatError;
use crate::registry::{ConnectionRegistry, DeliveryReport};
use crate::session::AuthenticatedUser;
use crate::storage::{ChatStorage, MessagePage, NewMessage};

/// Chat operations over a storage backend and the live connection registry.
pub struct ChatService<S: ChatStorage> {
    storage: S,
    registry: Arc<ConnectionRegistry>,
}

impl<S: ChatStorage> ChatService<S> {
    pub fn new(storage: S, registry: Arc<ConnectionRegistry>) -> Self {
        Self { storage, registry }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Send a direct message.
    ///
    /// Persists first, then pushes `new_message` to the receiver's
    /// connections and to the sender's other open tabs. Push failures are
    /// invisible here: the message is durable and clients re-fetch over
    /// HTTP.
    #[instrument(skip(self, sender, request), fields(sender_id = %sender.id, receiver_id = %request.receiver_id))]
    pub async fn send_message(
        &self,
        sender: &AuthenticatedUser,
        request: SendMessageRequest,
    ) -> Result<MessagePayload, ChatError> {
        let content = request.content.trim();
        let image_url = request
            .image_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty());

        if request.receiver_id == sender.id {
            return Err(ChatError::validation("cannot message yourself"));
        }
        if content.is_empty() && image_url.is_none() {
            return Err(ChatError::validation("message needs text or an image"));
        }
        if content.chars().count() > MAX_CONTENT_LENGTH {
            return Err(ChatError::validation(format!(
                "message exceeds {MAX_CONTENT_LENGTH} characters"
            )));
        }
        if self
            .storage
            .user_by_id(&request.receiver_id)
            .await?
            .is_none()
        {
            return Err(ChatError::not_found("recipient not found"));
        }

        let record = self
            .storage
            .record_message(NewMessage {
                sender_id: &sender.id,
                receiver_id: &request.receiver_id,
                content,
                image_url,
            })
            .await?;
        let payload = record.into_payload();

        let frame = ServerFrame::NewMessage {
            message: payload.clone(),
        };
        self.registry.send_to_user(&payload.receiver_id, &frame).await;
        self.registry.send_to_user(&sender.id, &frame).await;

        Ok(payload)
    }

    /// The caller's message history with one other user, oldest first.
    ///
    /// A pair that never exchanged messages has an empty history, not an
    /// error.
    pub async fn conversation_with(
        &self,
        user: &AuthenticatedUser,
        other_user_id: &str,
        page: &MessagePage,
    ) -> Result<Vec<MessagePayload>, ChatError> {
        let Some(conversation) = self
            .storage
            .conversation_between(&user.id, other_user_id)
            .await?
        else {
            return Ok(Vec::new());
        };

        let messages = self
            .storage
            .messages_for_conversation(&conversation.id, page)
            .await?;
        Ok(messages.into_iter().map(|m| m.into_payload()).collect())
    }

    /// The caller's conversation list, most recent traffic first.
    pub async fn list_conversations(
        &self,
        user: &AuthenticatedUser,
    ) -> Result<Vec<ConversationSummary>, ChatError> {
        let overviews = self.storage.list_overviews(&user.id).await?;
        Ok(overviews
            .into_iter()
            .map(|o| {
                let last_message = match (o.last_content, o.last_sender_id) {
                    (Some(content), Some(sender_id)) => Some(LastMessagePreview {
                        content: if o.last_deleted { String::new() } else { content },
                        sender_id,
                        deleted: o.last_deleted,
                    }),
                    _ => None,
                };
                ConversationSummary {
                    id: o.id,
                    other_user: UserPayload {
                        id: o.other_user_id,
                        username: o.other_username,
                    },
                    last_message,
                    last_message_at: o.last_message_at,
                    unread_count: o.unread,
                }
            })
            .collect())
    }

    /// Mark everything the other user sent the caller as read.
    ///
    /// Pushes `message_read` to the other user only when at least one
    /// message actually flipped, so re-reads stay silent.
    #[instrument(skip(self, reader), fields(reader_id = %reader.id, other_user_id = %other_user_id))]
    pub async fn mark_read(
        &self,
        reader: &AuthenticatedUser,
        other_user_id: &str,
    ) -> Result<u64, ChatError> {
        let Some(receipt) = self.storage.mark_read(&reader.id, other_user_id).await? else {
            return Ok(0);
        };

        if receipt.updated > 0 {
            let frame = ServerFrame::MessageRead {
                conversation_id: receipt.conversation_id,
                read_by: reader.id.clone(),
            };
            self.registry.send_to_user(other_user_id, &frame).await;
        }
        Ok(receipt.updated)
    }

    /// Soft-delete a message.
    ///
    /// Only the sender may delete, except admins, who may delete anything.
    /// Already-deleted messages are indistinguishable from missing ones.
    #[instrument(skip(self, actor), fields(actor_id = %actor.id, message_id = %message_id))]
    pub async fn delete_message(
        &self,
        actor: &AuthenticatedUser,
        message_id: &str,
    ) -> Result<(), ChatError> {
        let Some(message) = self.storage.message_by_id(message_id).await? else {
            return Err(ChatError::not_found("message not found"));
        };
        if message.deleted {
            return Err(ChatError::not_found("message not found"));
        }
        if message.sender_id != actor.id && !actor.is_admin() {
            return Err(ChatError::forbidden("only the sender can delete a message"));
        }
        if !self.storage.mark_deleted(message_id).await? {
            // Lost the race to a concurrent delete.
            return Err(ChatError::not_found("message not found"));
        }

        debug!("Deleted message");
        let frame = ServerFrame::MessageDeleted {
            message_id: message.id.clone(),
        };
        self.registry.send_to_user(&message.sender_id, &frame).await;
        self.registry.send_to_user(&message.receiver_id, &frame).await;
        Ok(())
    }

    /// Total unread messages addressed to the caller.
    pub async fn unread_count(&self, user: &AuthenticatedUser) -> Result<u64, ChatError> {
        Ok(self.storage.unread_total(&user.id).await?)
    }

    /// Username substring search, caller excluded from results.
    pub async fn search_users(
        &self,
        caller: &AuthenticatedUser,
        query: &str,
    ) -> Result<Vec<UserPayload>, ChatError> {
        let query = query.trim();
        if query.chars().count() < MIN_SEARCH_QUERY_LENGTH {
            return Err(ChatError::validation(format!(
                "search needs at least {MIN_SEARCH_QUERY_LENGTH} characters"
            )));
        }

        let users = self.storage.search_users(query, &caller.id).await?;
        Ok(users
            .into_iter()
            .map(|u| UserPayload {
                id: u.id,
                username: u.username,
            })
            .collect())
    }

    /// Hide a conversation from the caller's list until new traffic
    /// resurfaces it.
    pub async fn hide_conversation(
        &self,
        user: &AuthenticatedUser,
        other_user_id: &str,
    ) -> Result<bool, ChatError> {
        Ok(self
            .storage
            .hide_conversation(&user.id, other_user_id)
            .await?)
    }

    /// Push a notification banner to one user's connections.
    pub async fn notify_user(
        &self,
        user_id: &str,
        title: &str,
        description: Option<&str>,
        variant: Option<NotificationVariant>,
    ) -> DeliveryReport {
        let frame = notification_frame(title, description, variant);
        self.registry.send_to_user(user_id, &frame).await
    }

    /// Push a notification banner to everyone online.
    pub async fn notify_all(
        &self,
        title: &str,
        description: Option<&str>,
        variant: Option<NotificationVariant>,
    ) -> DeliveryReport {
        let frame = notification_frame(title, description, variant);
        self.registry.broadcast(&frame).await
    }
}

fn notification_frame(
    title: &str,
    description: Option<&str>,
    variant: Option<NotificationVariant>,
) -> ServerFrame {
    ServerFrame::Notification {
        title: title.to_string(),
        description: description.map(String::from),
        variant,
    }
}
