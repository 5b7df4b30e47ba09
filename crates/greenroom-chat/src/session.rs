//! Session token validation.
//!
//! The auth subsystem upstream mints sessions at login; this module resolves
//! a presented bearer token to the user behind it. Tokens are stored only as
//! SHA-256 digests, so a leaked database does not leak live credentials.
//! Both the HTTP extractors and the socket `auth` frame go through
//! [`SessionStore::validate`] — a socket never gets to claim its own user id.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use libsql::{params, Connection};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::storage::{fmt_ts, parse_ts, StorageError, UserRole};

/// The user a validated session belongs to.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub id: String,
    pub username: String,
    pub email_verified: bool,
    pub role: UserRole,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// Reads and writes the `sessions` table on the shared chat database.
#[derive(Clone)]
pub struct SessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SessionStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Resolve a bearer token.
    ///
    /// Unknown and expired tokens both come back as `Ok(None)`; only the
    /// database failing is an error.
    #[instrument(skip(self, token))]
    pub async fn validate(&self, token: &str) -> Result<Option<AuthenticatedUser>, StorageError> {
        let digest = token_digest(token);
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT u.id, u.username, u.email_verified, u.role, s.expires_at \
                 FROM sessions s JOIN users u ON u.id = s.user_id \
                 WHERE s.token_digest = ?",
                params![digest],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            debug!("Unknown session token");
            return Ok(None);
        };

        let expires_at = parse_ts(&row.get::<String>(4)?)?;
        if expires_at <= Utc::now() {
            debug!("Session expired");
            return Ok(None);
        }

        Ok(Some(AuthenticatedUser {
            id: row.get(0)?,
            username: row.get(1)?,
            email_verified: row.get::<i64>(2)? != 0,
            role: UserRole::parse(&row.get::<String>(3)?),
        }))
    }

    /// Mint a session token for a user and return it.
    ///
    /// The token itself never touches the database.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn create_session(
        &self,
        user_id: &str,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);

        let now = Utc::now();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO sessions (token_digest, user_id, expires_at, created_at) \
             VALUES (?, ?, ?, ?)",
            params![token_digest(&token), user_id, fmt_ts(now + ttl), fmt_ts(now)],
        )
        .await?;

        debug!("Created session");
        Ok(token)
    }

    /// Remove a session. Returns false when the token was already gone.
    #[instrument(skip(self, token))]
    pub async fn revoke(&self, token: &str) -> Result<bool, StorageError> {
        let conn = self.conn.lock().await;
        let deleted = conn
            .execute(
                "DELETE FROM sessions WHERE token_digest = ?",
                params![token_digest(token)],
            )
            .await?;
        Ok(deleted > 0)
    }
}

fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
