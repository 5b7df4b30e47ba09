//! Durable message store on libSQL.
//!
//! Owns the chat schema: users, sessions, conversations and messages. A
//! conversation is one row per unordered user pair, keyed by the pair in
//! sorted order so concurrent first messages from both sides land on the
//! same row. Messages are soft-deleted; rows never leave the table, which
//! keeps ordering and counts stable for everyone who already saw them.
//!
//! Timestamps are stored as fixed-width RFC 3339 text (UTC, microsecond
//! precision), so lexicographic comparison in SQL matches chronological
//! order and `(created_at, id)` is a total order over messages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{params, Connection};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use greenroom_proto::MessagePayload;

/// Default page size for conversation history.
pub const DEFAULT_PAGE_SIZE: usize = 50;
/// Hard ceiling on a single history page.
pub const MAX_PAGE_SIZE: usize = 200;
/// Most results a user search will return.
const SEARCH_RESULT_LIMIT: i64 = 20;

const CHAT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id             TEXT PRIMARY KEY,
    username       TEXT NOT NULL UNIQUE,
    email          TEXT NOT NULL UNIQUE,
    email_verified INTEGER NOT NULL DEFAULT 0,
    role           TEXT NOT NULL DEFAULT 'regular',
    created_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    token_digest TEXT PRIMARY KEY,
    user_id      TEXT NOT NULL REFERENCES users(id),
    expires_at   TEXT NOT NULL,
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id);

CREATE TABLE IF NOT EXISTS conversations (
    id              TEXT PRIMARY KEY,
    user_low        TEXT NOT NULL,
    user_high       TEXT NOT NULL,
    last_message_at TEXT NOT NULL,
    hidden_for_low  INTEGER NOT NULL DEFAULT 0,
    hidden_for_high INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    UNIQUE (user_low, user_high)
);

CREATE INDEX IF NOT EXISTS idx_conversations_last ON conversations(last_message_at DESC);

CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL REFERENCES conversations(id),
    sender_id       TEXT NOT NULL,
    receiver_id     TEXT NOT NULL,
    content         TEXT NOT NULL,
    image_url       TEXT,
    is_read         INTEGER NOT NULL DEFAULT 0,
    deleted         INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, created_at, id);
CREATE INDEX IF NOT EXISTS idx_messages_unread ON messages(receiver_id, is_read, deleted);
"#;

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, receiver_id, content, image_url, is_read, deleted, created_at";

/// Storage-layer errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
}

impl From<libsql::Error> for StorageError {
    fn from(err: libsql::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

/// Account role, stored as text.
///
/// Unknown values read back as `Regular` so a corrupted role column never
/// grants privileges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserRole {
    Regular,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Regular => "regular",
            UserRole::Admin => "admin",
        }
    }

    pub(crate) fn parse(raw: &str) -> Self {
        match raw {
            "admin" => UserRole::Admin,
            _ => UserRole::Regular,
        }
    }
}

/// A user row.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    pub email: String,
    pub email_verified: bool,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

/// Fields for provisioning a user.
#[derive(Debug, Clone, Copy)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub email_verified: bool,
    pub role: UserRole,
}

/// A conversation row: one per unordered pair of users.
#[derive(Debug, Clone)]
pub struct ConversationRecord {
    pub id: String,
    pub user_low: String,
    pub user_high: String,
    pub last_message_at: DateTime<Utc>,
}

/// A message row.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub image_url: Option<String>,
    pub is_read: bool,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    /// Convert to the wire shape. Deleted messages keep their place in the
    /// conversation but carry no content.
    pub fn into_payload(self) -> MessagePayload {
        let (content, image_url) = if self.deleted {
            (String::new(), None)
        } else {
            (self.content, self.image_url)
        };
        MessagePayload {
            id: self.id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            content,
            image_url,
            is_read: self.is_read,
            deleted: self.deleted,
            created_at: self.created_at,
        }
    }
}

/// Fields for recording a sent message.
#[derive(Debug, Clone, Copy)]
pub struct NewMessage<'a> {
    pub sender_id: &'a str,
    pub receiver_id: &'a str,
    pub content: &'a str,
    pub image_url: Option<&'a str>,
}

/// Page request for conversation history: at most `limit` messages, all
/// strictly older than the `before` message id when one is given.
#[derive(Debug, Clone)]
pub struct MessagePage {
    pub limit: usize,
    pub before: Option<String>,
}

impl Default for MessagePage {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            before: None,
        }
    }
}

/// One conversation as it appears in a user's sidebar.
#[derive(Debug, Clone)]
pub struct ConversationOverview {
    pub id: String,
    pub other_user_id: String,
    pub other_username: String,
    pub last_message_at: DateTime<Utc>,
    pub last_content: Option<String>,
    pub last_sender_id: Option<String>,
    pub last_deleted: bool,
    pub unread: u64,
}

/// Result of a mark-read sweep over one conversation.
#[derive(Debug, Clone)]
pub struct ReadReceipt {
    pub conversation_id: String,
    pub updated: u64,
}

/// Durable chat state.
///
/// All methods are safe to call concurrently. Implementations must make
/// [`record_message`](ChatStorage::record_message) atomic: the conversation
/// upsert and the message insert land together or not at all.
#[async_trait]
pub trait ChatStorage: Send + Sync {
    /// Create the schema if it does not exist yet.
    async fn initialize(&self) -> Result<(), StorageError>;

    /// Record a message, creating the pair's conversation on first contact.
    ///
    /// Also bumps the conversation's `last_message_at` and clears both hide
    /// flags, so a hidden conversation resurfaces on new traffic.
    async fn record_message(&self, new: NewMessage<'_>) -> Result<MessageRecord, StorageError>;

    /// The conversation between two users, if they ever exchanged messages.
    async fn conversation_between(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<Option<ConversationRecord>, StorageError>;

    /// A page of messages in ascending `(created_at, id)` order.
    async fn messages_for_conversation(
        &self,
        conversation_id: &str,
        page: &MessagePage,
    ) -> Result<Vec<MessageRecord>, StorageError>;

    /// All visible conversations for a user, most recent first.
    async fn list_overviews(
        &self,
        user_id: &str,
    ) -> Result<Vec<ConversationOverview>, StorageError>;

    /// Mark every message from `other_user_id` to `reader_id` as read.
    ///
    /// Returns `None` when the pair has no conversation; otherwise how many
    /// rows actually flipped, which is zero when everything was already
    /// read.
    async fn mark_read(
        &self,
        reader_id: &str,
        other_user_id: &str,
    ) -> Result<Option<ReadReceipt>, StorageError>;

    async fn message_by_id(&self, id: &str) -> Result<Option<MessageRecord>, StorageError>;

    /// Soft-delete a message. Returns false when it was already deleted or
    /// never existed.
    async fn mark_deleted(&self, id: &str) -> Result<bool, StorageError>;

    /// Unread messages addressed to the user across visible conversations.
    async fn unread_total(&self, user_id: &str) -> Result<u64, StorageError>;

    /// Users whose username contains the query, caller excluded.
    async fn search_users(
        &self,
        query: &str,
        exclude_user_id: &str,
    ) -> Result<Vec<UserRecord>, StorageError>;

    async fn user_by_id(&self, id: &str) -> Result<Option<UserRecord>, StorageError>;

    /// Hide the pair's conversation from one side's list. Returns false
    /// when the pair has no conversation.
    async fn hide_conversation(
        &self,
        user_id: &str,
        other_user_id: &str,
    ) -> Result<bool, StorageError>;
}

/// libSQL-backed [`ChatStorage`].
///
/// Holds a single shared connection behind a mutex; libSQL serializes
/// writers anyway, and one connection keeps in-memory databases coherent
/// across clones.
#[derive(Clone)]
pub struct LibSqlChatStorage {
    conn: Arc<Mutex<Connection>>,
    initialized: Arc<AtomicBool>,
}

impl LibSqlChatStorage {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            initialized: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The underlying connection, for components sharing the database
    /// (session lookups live outside this store).
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// Insert a user row.
    ///
    /// Account management proper lives upstream; this exists for
    /// provisioning tools and tests.
    #[instrument(skip(self, new), fields(username = %new.username))]
    pub async fn create_user(&self, new: NewUser<'_>) -> Result<UserRecord, StorageError> {
        let id = Uuid::now_v7().to_string();
        let created_at = Utc::now();

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO users (id, username, email, email_verified, role, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                id.clone(),
                new.username,
                new.email,
                new.email_verified as i64,
                new.role.as_str(),
                fmt_ts(created_at)
            ],
        )
        .await?;

        debug!(user_id = %id, "Created user");
        Ok(UserRecord {
            id,
            username: new.username.to_string(),
            email: new.email.to_string(),
            email_verified: new.email_verified,
            role: new.role,
            created_at,
        })
    }

    /// Cheap liveness probe for the underlying database.
    pub async fn health_check(&self) -> Result<bool, StorageError> {
        let conn = self.conn.lock().await;
        let mut rows = conn.query("SELECT 1", ()).await?;
        Ok(rows.next().await?.is_some())
    }
}

#[async_trait]
impl ChatStorage for LibSqlChatStorage {
    async fn initialize(&self) -> Result<(), StorageError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let conn = self.conn.lock().await;
        conn.execute_batch(CHAT_SCHEMA).await?;
        self.initialized.store(true, Ordering::Release);
        info!("Chat schema ready");
        Ok(())
    }

    #[instrument(skip(self, new), fields(sender_id = %new.sender_id, receiver_id = %new.receiver_id))]
    async fn record_message(&self, new: NewMessage<'_>) -> Result<MessageRecord, StorageError> {
        let created_at = Utc::now();
        let ts = fmt_ts(created_at);
        let (low, high) = ordered_pair(new.sender_id, new.receiver_id);

        let conn = self.conn.lock().await;
        let tx = conn.transaction().await?;

        // One conversation per pair: the unique (user_low, user_high) key
        // absorbs concurrent first messages from both sides.
        tx.execute(
            "INSERT OR IGNORE INTO conversations \
             (id, user_low, user_high, last_message_at, hidden_for_low, hidden_for_high, created_at) \
             VALUES (?, ?, ?, ?, 0, 0, ?)",
            params![Uuid::now_v7().to_string(), low, high, ts.clone(), ts.clone()],
        )
        .await?;

        let mut rows = tx
            .query(
                "SELECT id FROM conversations WHERE user_low = ? AND user_high = ?",
                params![low, high],
            )
            .await?;
        let row = rows.next().await?.ok_or_else(|| {
            StorageError::Corrupt("conversation row missing after upsert".to_string())
        })?;
        let conversation_id: String = row.get(0)?;

        let id = Uuid::now_v7().to_string();
        tx.execute(
            &format!(
                "INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, 0, 0, ?)"
            ),
            params![
                id.clone(),
                conversation_id.clone(),
                new.sender_id,
                new.receiver_id,
                new.content,
                new.image_url,
                ts.clone()
            ],
        )
        .await?;

        tx.execute(
            "UPDATE conversations \
             SET last_message_at = ?, hidden_for_low = 0, hidden_for_high = 0 \
             WHERE id = ?",
            params![ts, conversation_id.clone()],
        )
        .await?;

        tx.commit().await?;

        debug!(message_id = %id, conversation_id = %conversation_id, "Recorded message");
        Ok(MessageRecord {
            id,
            conversation_id,
            sender_id: new.sender_id.to_string(),
            receiver_id: new.receiver_id.to_string(),
            content: new.content.to_string(),
            image_url: new.image_url.map(String::from),
            is_read: false,
            deleted: false,
            created_at,
        })
    }

    async fn conversation_between(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<Option<ConversationRecord>, StorageError> {
        let (low, high) = ordered_pair(user_a, user_b);
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT id, user_low, user_high, last_message_at FROM conversations \
                 WHERE user_low = ? AND user_high = ?",
                params![low, high],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(ConversationRecord {
                id: row.get(0)?,
                user_low: row.get(1)?,
                user_high: row.get(2)?,
                last_message_at: parse_ts(&row.get::<String>(3)?)?,
            })),
            None => Ok(None),
        }
    }

    async fn messages_for_conversation(
        &self,
        conversation_id: &str,
        page: &MessagePage,
    ) -> Result<Vec<MessageRecord>, StorageError> {
        let limit = page.limit.clamp(1, MAX_PAGE_SIZE) as i64;
        let conn = self.conn.lock().await;

        // Fetch the newest qualifying messages in descending order, then
        // flip: callers always see ascending (created_at, id).
        let mut rows = match &page.before {
            Some(cursor) => {
                let mut cursor_rows = conn
                    .query(
                        "SELECT created_at FROM messages WHERE id = ? AND conversation_id = ?",
                        params![cursor.as_str(), conversation_id],
                    )
                    .await?;
                let Some(row) = cursor_rows.next().await? else {
                    return Err(StorageError::InvalidCursor(cursor.clone()));
                };
                let cursor_ts: String = row.get(0)?;

                conn.query(
                    &format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages \
                         WHERE conversation_id = ? \
                           AND (created_at < ? OR (created_at = ? AND id < ?)) \
                         ORDER BY created_at DESC, id DESC LIMIT ?"
                    ),
                    params![
                        conversation_id,
                        cursor_ts.clone(),
                        cursor_ts,
                        cursor.as_str(),
                        limit
                    ],
                )
                .await?
            }
            None => {
                conn.query(
                    &format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages \
                         WHERE conversation_id = ? \
                         ORDER BY created_at DESC, id DESC LIMIT ?"
                    ),
                    params![conversation_id, limit],
                )
                .await?
            }
        };

        let mut messages = Vec::new();
        while let Some(row) = rows.next().await? {
            messages.push(row_to_message(&row)?);
        }
        messages.reverse();
        Ok(messages)
    }

    async fn list_overviews(
        &self,
        user_id: &str,
    ) -> Result<Vec<ConversationOverview>, StorageError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT c.id, \
                        CASE WHEN c.user_low = ?1 THEN c.user_high ELSE c.user_low END, \
                        u.username, \
                        c.last_message_at, \
                        (SELECT m.content FROM messages m WHERE m.conversation_id = c.id \
                         ORDER BY m.created_at DESC, m.id DESC LIMIT 1), \
                        (SELECT m.sender_id FROM messages m WHERE m.conversation_id = c.id \
                         ORDER BY m.created_at DESC, m.id DESC LIMIT 1), \
                        (SELECT m.deleted FROM messages m WHERE m.conversation_id = c.id \
                         ORDER BY m.created_at DESC, m.id DESC LIMIT 1), \
                        (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id \
                         AND m.receiver_id = ?1 AND m.is_read = 0 AND m.deleted = 0) \
                 FROM conversations c \
                 JOIN users u \
                   ON u.id = CASE WHEN c.user_low = ?1 THEN c.user_high ELSE c.user_low END \
                 WHERE (c.user_low = ?1 OR c.user_high = ?1) \
                   AND NOT (c.user_low = ?1 AND c.hidden_for_low = 1) \
                   AND NOT (c.user_high = ?1 AND c.hidden_for_high = 1) \
                 ORDER BY c.last_message_at DESC",
                params![user_id],
            )
            .await?;

        let mut overviews = Vec::new();
        while let Some(row) = rows.next().await? {
            overviews.push(ConversationOverview {
                id: row.get(0)?,
                other_user_id: row.get(1)?,
                other_username: row.get(2)?,
                last_message_at: parse_ts(&row.get::<String>(3)?)?,
                last_content: row.get::<Option<String>>(4)?,
                last_sender_id: row.get::<Option<String>>(5)?,
                last_deleted: row.get::<Option<i64>>(6)?.unwrap_or(0) != 0,
                unread: row.get::<i64>(7)? as u64,
            });
        }
        Ok(overviews)
    }

    #[instrument(skip(self), fields(reader_id = %reader_id, other_user_id = %other_user_id))]
    async fn mark_read(
        &self,
        reader_id: &str,
        other_user_id: &str,
    ) -> Result<Option<ReadReceipt>, StorageError> {
        let Some(conversation) = self.conversation_between(reader_id, other_user_id).await? else {
            return Ok(None);
        };

        let conn = self.conn.lock().await;
        let updated = conn
            .execute(
                "UPDATE messages SET is_read = 1 \
                 WHERE conversation_id = ? AND receiver_id = ? AND is_read = 0",
                params![conversation.id.clone(), reader_id],
            )
            .await?;

        if updated > 0 {
            debug!(count = updated, "Marked messages read");
        }
        Ok(Some(ReadReceipt {
            conversation_id: conversation.id,
            updated,
        }))
    }

    async fn message_by_id(&self, id: &str) -> Result<Option<MessageRecord>, StorageError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?"),
                params![id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row_to_message(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(message_id = %id))]
    async fn mark_deleted(&self, id: &str) -> Result<bool, StorageError> {
        let conn = self.conn.lock().await;
        let updated = conn
            .execute(
                "UPDATE messages SET deleted = 1 WHERE id = ? AND deleted = 0",
                params![id],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn unread_total(&self, user_id: &str) -> Result<u64, StorageError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM messages m \
                 JOIN conversations c ON c.id = m.conversation_id \
                 WHERE m.receiver_id = ?1 AND m.is_read = 0 AND m.deleted = 0 \
                   AND NOT (c.user_low = ?1 AND c.hidden_for_low = 1) \
                   AND NOT (c.user_high = ?1 AND c.hidden_for_high = 1)",
                params![user_id],
            )
            .await?;

        let row = rows
            .next()
            .await?
            .ok_or_else(|| StorageError::Corrupt("count query returned no row".to_string()))?;
        Ok(row.get::<i64>(0)? as u64)
    }

    async fn search_users(
        &self,
        query: &str,
        exclude_user_id: &str,
    ) -> Result<Vec<UserRecord>, StorageError> {
        let pattern = format!("%{}%", escape_like(query));
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT id, username, email, email_verified, role, created_at FROM users \
                 WHERE username LIKE ? ESCAPE '\\' AND id != ? \
                 ORDER BY username LIMIT ?",
                params![pattern, exclude_user_id, SEARCH_RESULT_LIMIT],
            )
            .await?;

        let mut users = Vec::new();
        while let Some(row) = rows.next().await? {
            users.push(row_to_user(&row)?);
        }
        Ok(users)
    }

    async fn user_by_id(&self, id: &str) -> Result<Option<UserRecord>, StorageError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT id, username, email, email_verified, role, created_at \
                 FROM users WHERE id = ?",
                params![id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row_to_user(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(user_id = %user_id, other_user_id = %other_user_id))]
    async fn hide_conversation(
        &self,
        user_id: &str,
        other_user_id: &str,
    ) -> Result<bool, StorageError> {
        let (low, high) = ordered_pair(user_id, other_user_id);
        let column = if user_id == low {
            "hidden_for_low"
        } else {
            "hidden_for_high"
        };

        let conn = self.conn.lock().await;
        let updated = conn
            .execute(
                &format!(
                    "UPDATE conversations SET {column} = 1 WHERE user_low = ? AND user_high = ?"
                ),
                params![low, high],
            )
            .await?;

        if updated > 0 {
            debug!("Hid conversation");
        }
        Ok(updated > 0)
    }
}

fn row_to_message(row: &libsql::Row) -> Result<MessageRecord, StorageError> {
    Ok(MessageRecord {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        receiver_id: row.get(3)?,
        content: row.get(4)?,
        image_url: row.get::<Option<String>>(5)?,
        is_read: row.get::<i64>(6)? != 0,
        deleted: row.get::<i64>(7)? != 0,
        created_at: parse_ts(&row.get::<String>(8)?)?,
    })
}

fn row_to_user(row: &libsql::Row) -> Result<UserRecord, StorageError> {
    Ok(UserRecord {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        email_verified: row.get::<i64>(3)? != 0,
        role: UserRole::parse(&row.get::<String>(4)?),
        created_at: parse_ts(&row.get::<String>(5)?)?,
    })
}

/// Stable component order for a user pair.
fn ordered_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Fixed-width RFC 3339 in UTC, so text comparison orders chronologically.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("bad timestamp {raw:?}: {e}")))
}

/// Escape LIKE wildcards so user input matches literally.
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
