//! Connection Registry implementation.
//!
//! Tracks live socket connections per authenticated user id so the rest of
//! the system can answer "is this user reachable right now" and push frames
//! to every open tab or device of a user.
//!
//! Registry state is process-local and rebuilt from nothing on restart;
//! durable truth lives in [`storage`](crate::storage). Mutation never blocks
//! on network I/O — pushing frames uses `try_send` and reports what happened
//! instead of erroring.

use std::fmt;

use dashmap::DashMap;
use greenroom_proto::ServerFrame;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Identifier for one physical connection. Distinct per socket, even when
/// one user holds several.
pub type ConnectionId = Uuid;

/// Connection state stored in the registry: the id of the socket task and
/// the channel that feeds its outbound half.
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    pub id: ConnectionId,
    sender: mpsc::Sender<ServerFrame>,
}

impl ConnectionEntry {
    pub fn new(id: ConnectionId, sender: mpsc::Sender<ServerFrame>) -> Self {
        Self { id, sender }
    }

    /// True once the receiving socket task has dropped its end.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Outcome of registering a connection.
///
/// The registry reports boundary transitions precisely so the presence
/// tracker can broadcast only on the offline↔online crossing, never on
/// every connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// First live connection for this user: the offline→online boundary.
    Online,
    /// The user already had live connections; no presence transition.
    AlreadyOnline,
    /// This connection id was already registered. No-op.
    AlreadyRegistered,
    /// The per-user cap was reached and the connection was rejected.
    CapExceeded,
}

/// Outcome of unregistering a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnregisterOutcome {
    /// Removed; other connections for the user remain.
    Removed,
    /// Removed the user's last connection: the online→offline boundary.
    Offline,
    /// The connection was not registered. Disconnects may race explicit
    /// logout, so this is a no-op rather than an error.
    NotFound,
}

/// Tally of a best-effort push to one or more connections.
///
/// A full channel means a slow reader: the frame is dropped but the
/// connection survives, because ephemeral events tolerate loss and durable
/// ones are re-fetched over HTTP. A closed channel means the socket task is
/// already shutting down and will unregister itself.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Frames queued for delivery.
    pub sent: usize,
    /// Frames dropped on a full channel (backpressure).
    pub full: usize,
    /// Frames dropped on a closed channel (connection shutting down).
    pub closed: usize,
}

impl DeliveryReport {
    /// True if at least one connection accepted the frame.
    pub fn delivered(&self) -> bool {
        self.sent > 0
    }

    pub fn dropped(&self) -> usize {
        self.full + self.closed
    }

    fn absorb(&mut self, other: DeliveryReport) {
        self.sent += other.sent;
        self.full += other.full;
        self.closed += other.closed;
    }
}

/// Registry for live socket connections.
///
/// Thread-safe map from user id to that user's connection entries. Built in
/// `main` and shared via `Arc`; the socket gateway is the only writer, while
/// the messaging service and presence tracker read it to push frames.
pub struct ConnectionRegistry {
    /// User id → live connections for that user.
    connections: DashMap<String, Vec<ConnectionEntry>>,
    /// Maximum simultaneous connections per user before registration is
    /// rejected.
    max_per_user: usize,
}

impl ConnectionRegistry {
    pub fn new(max_per_user: usize) -> Self {
        info!(max_per_user, "Creating connection registry");
        Self {
            connections: DashMap::new(),
            max_per_user,
        }
    }

    /// Register a connection under a user id.
    ///
    /// Idempotent per connection id. Rejects registrations beyond the
    /// per-user cap without touching existing entries.
    #[instrument(skip(self, sender), fields(user_id = %user_id, connection_id = %connection_id))]
    pub fn register(
        &self,
        user_id: &str,
        connection_id: ConnectionId,
        sender: mpsc::Sender<ServerFrame>,
    ) -> RegisterOutcome {
        let mut entry = self.connections.entry(user_id.to_string()).or_default();
        let connections = entry.value_mut();

        if connections.iter().any(|c| c.id == connection_id) {
            debug!("Connection already registered");
            return RegisterOutcome::AlreadyRegistered;
        }
        if connections.len() >= self.max_per_user {
            warn!(
                cap = self.max_per_user,
                "Per-user connection cap reached, rejecting registration"
            );
            return RegisterOutcome::CapExceeded;
        }

        let was_offline = connections.is_empty();
        connections.push(ConnectionEntry::new(connection_id, sender));

        if was_offline {
            debug!("Registered first connection, user is now online");
            RegisterOutcome::Online
        } else {
            debug!(count = connections.len(), "Registered additional connection");
            RegisterOutcome::AlreadyOnline
        }
    }

    /// Unregister a connection.
    ///
    /// No-op when the connection is already gone.
    #[instrument(skip(self), fields(user_id = %user_id, connection_id = %connection_id))]
    pub fn unregister(&self, user_id: &str, connection_id: ConnectionId) -> UnregisterOutcome {
        let went_offline = {
            let Some(mut entry) = self.connections.get_mut(user_id) else {
                debug!("Connection was not registered");
                return UnregisterOutcome::NotFound;
            };
            let connections = entry.value_mut();
            let before = connections.len();
            connections.retain(|c| c.id != connection_id);
            if connections.len() == before {
                debug!("Connection was not registered");
                return UnregisterOutcome::NotFound;
            }
            connections.is_empty()
        };

        if went_offline {
            // Drop the empty set unless a concurrent register already refilled it.
            self.connections.remove_if(user_id, |_, v| v.is_empty());
            debug!("Unregistered last connection, user is now offline");
            UnregisterOutcome::Offline
        } else {
            debug!("Unregistered connection");
            UnregisterOutcome::Removed
        }
    }

    /// True iff the user has at least one live connection.
    pub fn is_online(&self, user_id: &str) -> bool {
        self.connections
            .get(user_id)
            .map(|entry| !entry.value().is_empty())
            .unwrap_or(false)
    }

    /// Live connections for a user, possibly empty.
    pub fn connections_for(&self, user_id: &str) -> Vec<ConnectionEntry> {
        self.connections
            .get(user_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Total number of live connections across all users.
    pub fn connection_count(&self) -> usize {
        self.connections.iter().map(|e| e.value().len()).sum()
    }

    /// Users that currently hold at least one connection.
    pub fn online_users(&self) -> Vec<String> {
        self.connections
            .iter()
            .filter(|e| !e.value().is_empty())
            .map(|e| e.key().clone())
            .collect()
    }

    /// Push a frame to every live connection of one user.
    ///
    /// Best-effort: failures are counted, never raised. A failed push must
    /// not disturb delivery to the user's other connections.
    #[instrument(skip(self, frame), fields(user_id = %user_id))]
    pub async fn send_to_user(&self, user_id: &str, frame: &ServerFrame) -> DeliveryReport {
        let entries = match self.connections.get(user_id) {
            Some(entry) => entry.value().clone(),
            None => {
                debug!("Recipient not connected");
                return DeliveryReport::default();
            }
        };

        let mut report = DeliveryReport::default();
        for connection in entries {
            match connection.sender.try_send(frame.clone()) {
                Ok(()) => report.sent += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(connection_id = %connection.id, "Outbound channel full, dropping frame");
                    report.full += 1;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(
                        connection_id = %connection.id,
                        "Outbound channel closed, connection is shutting down"
                    );
                    report.closed += 1;
                }
            }
        }
        report
    }

    /// Push a frame to every connection of every user.
    pub async fn broadcast(&self, frame: &ServerFrame) -> DeliveryReport {
        let users = self.online_users();
        let mut report = DeliveryReport::default();
        for user_id in users {
            report.absorb(self.send_to_user(&user_id, frame).await);
        }
        report
    }

    /// Push a frame to every connection of every user except one.
    ///
    /// Used for presence: a user is not told about their own transitions.
    pub async fn broadcast_except(
        &self,
        exclude_user_id: &str,
        frame: &ServerFrame,
    ) -> DeliveryReport {
        let users = self.online_users();
        let mut report = DeliveryReport::default();
        for user_id in users {
            if user_id == exclude_user_id {
                continue;
            }
            report.absorb(self.send_to_user(&user_id, frame).await);
        }
        report
    }

    /// Remove connections whose channels are closed.
    ///
    /// The socket tasks normally unregister themselves; this sweeps up after
    /// any that were aborted before their cleanup ran. Returns the users
    /// whose last connection was removed here, so the caller can broadcast
    /// the missed offline transitions.
    pub fn cleanup_stale(&self) -> Vec<String> {
        let mut went_offline = Vec::new();
        let mut removed = 0usize;

        for mut entry in self.connections.iter_mut() {
            let before = entry.value().len();
            entry.value_mut().retain(|c| !c.is_closed());
            removed += before - entry.value().len();
            if before > 0 && entry.value().is_empty() {
                went_offline.push(entry.key().clone());
            }
        }
        for user_id in &went_offline {
            self.connections.remove_if(user_id, |_, v| v.is_empty());
        }

        if removed > 0 {
            info!(count = removed, "Cleaned up stale connections");
        }
        went_offline
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connection_count", &self.connection_count())
            .field("max_per_user", &self.max_per_user)
            .finish()
    }
}
