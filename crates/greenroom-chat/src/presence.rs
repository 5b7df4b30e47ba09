//! Presence tracking derived from the connection registry.
//!
//! Presence is not stored anywhere: a user is online exactly while the
//! registry holds at least one connection for them. This module's job is to
//! turn registry boundary transitions into `online_status` broadcasts, and
//! nothing else — a second tab opening or closing stays invisible to other
//! users.

use std::sync::Arc;

use greenroom_proto::ServerFrame;
use tracing::{debug, instrument};

use crate::registry::{ConnectionRegistry, RegisterOutcome, UnregisterOutcome};

/// Broadcasts online/offline transitions to everyone else.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    registry: Arc<ConnectionRegistry>,
}

impl PresenceTracker {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// True iff the user currently has a live connection.
    pub fn is_online(&self, user_id: &str) -> bool {
        self.registry.is_online(user_id)
    }

    /// React to a registration outcome.
    ///
    /// Broadcasts `online: true` only when the user crossed the
    /// offline→online boundary.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn connection_registered(&self, user_id: &str, outcome: RegisterOutcome) {
        match outcome {
            RegisterOutcome::Online => {
                debug!("User came online, broadcasting");
                self.broadcast_status(user_id, true).await;
            }
            RegisterOutcome::AlreadyOnline
            | RegisterOutcome::AlreadyRegistered
            | RegisterOutcome::CapExceeded => {}
        }
    }

    /// React to an unregistration outcome.
    ///
    /// Broadcasts `online: false` only when the user crossed the
    /// online→offline boundary.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn connection_closed(&self, user_id: &str, outcome: UnregisterOutcome) {
        match outcome {
            UnregisterOutcome::Offline => {
                debug!("User went offline, broadcasting");
                self.broadcast_status(user_id, false).await;
            }
            UnregisterOutcome::Removed | UnregisterOutcome::NotFound => {}
        }
    }

    /// Sweep connections whose tasks died without unregistering and emit the
    /// offline transitions they skipped.
    pub async fn sweep_stale(&self) {
        for user_id in self.registry.cleanup_stale() {
            debug!(user_id = %user_id, "Stale sweep took user offline, broadcasting");
            self.broadcast_status(&user_id, false).await;
        }
    }

    async fn broadcast_status(&self, user_id: &str, online: bool) {
        let frame = ServerFrame::OnlineStatus {
            user_id: user_id.to_string(),
            online,
        };
        self.registry.broadcast_except(user_id, &frame).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn online_status(frame: ServerFrame) -> (String, bool) {
        match frame {
            ServerFrame::OnlineStatus { user_id, online } => (user_id, online),
            other => panic!("expected online_status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn first_connection_broadcasts_online_to_others() {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let tracker = PresenceTracker::new(registry.clone());
        let (tx_bob, mut rx_bob) = mpsc::channel(16);
        registry.register("bob", Uuid::now_v7(), tx_bob);

        let (tx_alice, mut rx_alice) = mpsc::channel(16);
        let outcome = registry.register("alice", Uuid::now_v7(), tx_alice);
        tracker.connection_registered("alice", outcome).await;

        let frame = rx_bob.recv().await.unwrap();
        assert_eq!(online_status(frame), ("alice".to_string(), true));
        // The user is not told about their own transition.
        assert!(rx_alice.try_recv().is_err());
    }

    #[tokio::test]
    async fn second_connection_stays_silent() {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let tracker = PresenceTracker::new(registry.clone());
        let (tx_bob, mut rx_bob) = mpsc::channel(16);
        registry.register("bob", Uuid::now_v7(), tx_bob);

        let (tx1, _rx1) = mpsc::channel(16);
        let outcome = registry.register("alice", Uuid::now_v7(), tx1);
        tracker.connection_registered("alice", outcome).await;
        rx_bob.recv().await.unwrap();

        let (tx2, _rx2) = mpsc::channel(16);
        let outcome = registry.register("alice", Uuid::now_v7(), tx2);
        tracker.connection_registered("alice", outcome).await;

        assert!(rx_bob.try_recv().is_err());
    }

    #[tokio::test]
    async fn only_the_last_disconnect_broadcasts_offline() {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let tracker = PresenceTracker::new(registry.clone());
        let (tx_bob, mut rx_bob) = mpsc::channel(16);
        registry.register("bob", Uuid::now_v7(), tx_bob);

        let first = Uuid::now_v7();
        let second = Uuid::now_v7();
        let (tx1, _rx1) = mpsc::channel(16);
        let (tx2, _rx2) = mpsc::channel(16);
        registry.register("alice", first, tx1);
        registry.register("alice", second, tx2);
        // Drain the online broadcast.
        tracker
            .connection_registered("alice", RegisterOutcome::Online)
            .await;
        rx_bob.recv().await.unwrap();

        let outcome = registry.unregister("alice", first);
        tracker.connection_closed("alice", outcome).await;
        assert!(rx_bob.try_recv().is_err());

        let outcome = registry.unregister("alice", second);
        tracker.connection_closed("alice", outcome).await;
        let frame = rx_bob.recv().await.unwrap();
        assert_eq!(online_status(frame), ("alice".to_string(), false));
    }

    #[tokio::test]
    async fn stale_sweep_broadcasts_the_missed_offline_transition() {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let tracker = PresenceTracker::new(registry.clone());
        let (tx_bob, mut rx_bob) = mpsc::channel(16);
        registry.register("bob", Uuid::now_v7(), tx_bob);

        // A socket task that died without unregistering.
        let (tx_alice, rx_alice) = mpsc::channel(16);
        registry.register("alice", Uuid::now_v7(), tx_alice);
        tracker
            .connection_registered("alice", RegisterOutcome::Online)
            .await;
        rx_bob.recv().await.unwrap();
        drop(rx_alice);

        tracker.sweep_stale().await;

        let frame = rx_bob.recv().await.unwrap();
        assert_eq!(online_status(frame), ("alice".to_string(), false));
        assert!(!tracker.is_online("alice"));
    }
}
