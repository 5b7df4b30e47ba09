//! Client session lifecycle.
//!
//! [`ChatSession`] drives one logical realtime connection: it opens the
//! socket, authenticates with whatever session the identity provider holds
//! *right now*, pumps frames, and reconnects with capped backoff when the
//! connection drops. [`ChatClient`] is the cheap cloneable handle the rest
//! of an application keeps: subscribe to events, send ephemeral frames,
//! report keystrokes.
//!
//! Identity is read through [`IdentityProvider`] at the moment it is
//! needed, never captured: a logout stops reconnecting, and a login switch
//! reconnects as the new user without restarting the session.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use greenroom_proto::{ClientFrame, NotificationVariant, ServerFrame};

use crate::error::ClientError;
use crate::transport::{socket_url, SocketTransport, WebSocketTransport};

/// Idle window after the last keystroke before `typing_stop` goes out.
pub const TYPING_IDLE: Duration = Duration::from_millis(500);

const INITIAL_RECONNECT_DELAY_SECONDS: u64 = 1;
const MAX_RECONNECT_DELAY_SECONDS: u64 = 60;

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

/// Where the session reads its identity from.
///
/// Implementations wrap whatever holds the signed-in account (a token file,
/// a keychain, an app state store). Both methods are polled at use time.
pub trait IdentityProvider: Send + Sync + 'static {
    /// The current session token, if someone is signed in.
    fn session_token(&self) -> Option<String>;

    /// The id of the signed-in user.
    fn user_id(&self) -> Option<String>;
}

/// User-visible notification sink, e.g. a toast or a desktop notification.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, title: &str, description: Option<&str>, variant: NotificationVariant);
}

/// Events the session fans out to subscribers.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The server accepted our session token.
    Connected { user_id: String },
    /// The connection dropped; `will_retry` says whether a reconnect is
    /// scheduled.
    Disconnected { will_retry: bool },
    /// Any parsed server frame, in arrival order.
    Frame(ServerFrame),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// HTTP(S) origin of the server; the socket path is derived from it.
    pub server_url: String,
    /// Reconnect attempts before giving up; 0 retries forever.
    pub max_reconnect_attempts: u32,
    /// Spread reconnects out with random jitter. Disable for
    /// deterministic tests.
    pub reconnect_jitter: bool,
    /// Outbound frame queue depth.
    pub outbound_capacity: usize,
    /// Event fan-out buffer per subscriber.
    pub event_capacity: usize,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            max_reconnect_attempts: 0,
            reconnect_jitter: true,
            outbound_capacity: 64,
            event_capacity: 256,
        }
    }
}

#[derive(Default)]
struct TypingState {
    /// Per-receiver generation of the latest keystroke; the stop timer only
    /// fires for the generation it was armed with.
    generations: HashMap<String, u64>,
    next_generation: u64,
}

struct SessionShared {
    events: broadcast::Sender<ClientEvent>,
    state: watch::Receiver<ConnectionState>,
    shutdown: CancellationToken,
    typing: Mutex<TypingState>,
    identity: Arc<dyn IdentityProvider>,
}

/// Handle onto a running [`ChatSession`]. Cloning is cheap; all clones talk
/// to the same connection, and the session stops once the last clone is
/// dropped.
#[derive(Clone)]
pub struct ChatClient {
    shared: Arc<SessionShared>,
    // Held by the handles, not by the session, so dropping the last handle
    // closes the channel and the driver notices.
    outbound: mpsc::Sender<ClientFrame>,
}

impl ChatClient {
    pub fn state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state(), ConnectionState::Connected)
    }

    /// The signed-in user id, read live from the identity provider.
    pub fn user_id(&self) -> Option<String> {
        self.shared.identity.user_id()
    }

    /// Subscribe to session events. Each subscriber gets an independent
    /// stream; dropping one receiver never affects the others.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    /// Queue an ephemeral frame for the server.
    ///
    /// Silently dropped while the connection is not open: ephemeral events
    /// are worthless once stale, and anything durable goes over HTTP.
    pub fn send(&self, frame: ClientFrame) {
        if !self.is_connected() {
            debug!("Not connected, dropping outbound frame");
            return;
        }
        if let Err(error) = self.outbound.try_send(frame) {
            debug!(%error, "Outbound queue rejected frame");
        }
    }

    /// Report a keystroke in the composer for a conversation.
    ///
    /// Sends `typing_start` on the rising edge only; every keystroke pushes
    /// the `typing_stop` timer another [`TYPING_IDLE`] out.
    pub async fn keystroke(&self, receiver_id: &str) {
        let (generation, newly_typing) = {
            let mut typing = self.shared.typing.lock().await;
            typing.next_generation += 1;
            let generation = typing.next_generation;
            let newly_typing = typing
                .generations
                .insert(receiver_id.to_string(), generation)
                .is_none();
            (generation, newly_typing)
        };

        if newly_typing {
            self.send(ClientFrame::TypingStart {
                receiver_id: receiver_id.to_string(),
            });
        }

        let client = self.clone();
        let receiver_id = receiver_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(TYPING_IDLE).await;
            let idle = {
                let mut typing = client.shared.typing.lock().await;
                if typing.generations.get(&receiver_id) == Some(&generation) {
                    typing.generations.remove(&receiver_id);
                    true
                } else {
                    false
                }
            };
            if idle {
                client.send(ClientFrame::TypingStop { receiver_id });
            }
        });
    }

    /// End the typing indicator for a conversation immediately, e.g. when
    /// the user switches conversations or sends the message.
    pub async fn stop_typing(&self, receiver_id: &str) {
        let was_typing = self
            .shared
            .typing
            .lock()
            .await
            .generations
            .remove(receiver_id)
            .is_some();
        if was_typing {
            self.send(ClientFrame::TypingStop {
                receiver_id: receiver_id.to_string(),
            });
        }
    }

    /// Stop the session for good. The driver closes the socket and exits.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
    }
}

enum SessionEnd {
    Shutdown,
    ConnectionLost(String),
}

/// Owns the physical connection and drives it until shutdown or sign-out.
///
/// Spawn [`run`](ChatSession::run) on the runtime; keep the [`ChatClient`]
/// it was created with.
pub struct ChatSession<T: SocketTransport = WebSocketTransport> {
    config: ClientConfig,
    url: String,
    shared: Arc<SessionShared>,
    outbound: mpsc::Receiver<ClientFrame>,
    state_tx: watch::Sender<ConnectionState>,
    notifier: Option<Arc<dyn Notifier>>,
    attempt: u32,
    _transport: PhantomData<fn() -> T>,
}

impl<T: SocketTransport> ChatSession<T> {
    pub fn new(
        config: ClientConfig,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<(Self, ChatClient), ClientError> {
        let url = socket_url(&config.server_url)?;
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity);
        let (events, _) = broadcast::channel(config.event_capacity);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let shared = Arc::new(SessionShared {
            events,
            state: state_rx,
            shutdown: CancellationToken::new(),
            typing: Mutex::new(TypingState::default()),
            identity,
        });

        let client = ChatClient {
            shared: Arc::clone(&shared),
            outbound: outbound_tx,
        };
        let session = Self {
            config,
            url,
            shared,
            outbound: outbound_rx,
            state_tx,
            notifier: None,
            attempt: 0,
            _transport: PhantomData,
        };
        Ok((session, client))
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Drive the connection until shutdown, sign-out, exhausted retries, or
    /// the last [`ChatClient`] is dropped.
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn run(mut self) -> Result<(), ClientError> {
        info!("Starting realtime session");

        loop {
            if self.shared.shutdown.is_cancelled() {
                break;
            }
            // The outbound channel closes when the last handle drops.
            if self.outbound.is_closed() {
                debug!("Every client handle dropped, stopping session");
                break;
            }
            // Live identity: a token captured earlier could belong to a
            // session that has since been signed out or replaced.
            let Some(token) = self.shared.identity.session_token() else {
                debug!("No signed-in identity, stopping session");
                break;
            };
            self.set_state(ConnectionState::Connecting);

            let mut transport = match T::connect(&self.url).await {
                Ok(transport) => transport,
                Err(error) => {
                    self.backoff_or_stop(error).await?;
                    continue;
                }
            };

            let auth = encode_frame(&ClientFrame::Auth { token })?;
            if let Err(error) = transport.send(&auth).await {
                let _ = transport.close().await;
                self.backoff_or_stop(error).await?;
                continue;
            }

            match self.pump(&mut transport).await {
                SessionEnd::Shutdown => {
                    let _ = transport.close().await;
                    break;
                }
                SessionEnd::ConnectionLost(reason) => {
                    let _ = transport.close().await;
                    self.backoff_or_stop(ClientError::Transport(reason)).await?;
                }
            }
        }

        if matches!(self.state_tx.borrow().clone(), ConnectionState::Connected) {
            self.emit(ClientEvent::Disconnected { will_retry: false });
        }
        self.set_state(ConnectionState::Disconnected);
        info!("Realtime session stopped");
        Ok(())
    }

    async fn pump(&mut self, transport: &mut T) -> SessionEnd {
        loop {
            tokio::select! {
                _ = self.shared.shutdown.cancelled() => return SessionEnd::Shutdown,
                outbound = self.outbound.recv() => match outbound {
                    Some(frame) => {
                        let text = match encode_frame(&frame) {
                            Ok(text) => text,
                            Err(error) => {
                                warn!(%error, "Dropping unencodable frame");
                                continue;
                            }
                        };
                        if let Err(error) = transport.send(&text).await {
                            return SessionEnd::ConnectionLost(error.to_string());
                        }
                    }
                    // Every handle is gone; nobody is left to care.
                    None => return SessionEnd::Shutdown,
                },
                inbound = transport.recv() => match inbound {
                    Ok(Some(text)) => self.handle_frame(&text),
                    Ok(None) => {
                        return SessionEnd::ConnectionLost("connection closed".to_string())
                    }
                    Err(error) => return SessionEnd::ConnectionLost(error.to_string()),
                },
            }
        }
    }

    fn handle_frame(&mut self, text: &str) {
        let frame: ServerFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(error) => {
                // Servers may grow frame types we do not know yet.
                debug!(%error, "Ignoring unrecognized frame");
                return;
            }
        };

        match &frame {
            ServerFrame::Authenticated { user_id } => {
                self.attempt = 0;
                self.set_state(ConnectionState::Connected);
                info!(user_id = %user_id, "Session authenticated");
                self.emit(ClientEvent::Connected {
                    user_id: user_id.clone(),
                });
            }
            ServerFrame::Notification {
                title,
                description,
                variant,
            } => {
                if let Some(notifier) = &self.notifier {
                    notifier.notify(
                        title,
                        description.as_deref(),
                        variant.unwrap_or(NotificationVariant::Info),
                    );
                }
            }
            ServerFrame::NewMessage { message } => {
                // Live read again: after a login switch "own" means the
                // current account, not whoever opened the socket.
                let own_id = self.shared.identity.user_id();
                if own_id.as_deref() != Some(message.sender_id.as_str()) {
                    if let Some(notifier) = &self.notifier {
                        let description = if message.content.is_empty() {
                            "Sent an image"
                        } else {
                            message.content.as_str()
                        };
                        notifier.notify(
                            "New message",
                            Some(description),
                            NotificationVariant::Info,
                        );
                    }
                }
            }
            _ => {}
        }

        self.emit(ClientEvent::Frame(frame));
    }

    /// Schedule the next attempt, or give up when retries are exhausted.
    async fn backoff_or_stop(&mut self, error: ClientError) -> Result<(), ClientError> {
        self.attempt = self.attempt.saturating_add(1);
        let will_retry = self.should_retry(self.attempt);
        self.emit(ClientEvent::Disconnected { will_retry });

        if !will_retry {
            warn!(%error, attempts = self.attempt, "Giving up on reconnection");
            self.set_state(ConnectionState::Disconnected);
            return Err(error);
        }

        let delay = self.reconnect_delay(self.attempt);
        debug!(%error, attempt = self.attempt, ?delay, "Connection lost, backing off");
        self.set_state(ConnectionState::Reconnecting {
            attempt: self.attempt,
        });

        tokio::select! {
            _ = self.shared.shutdown.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
        Ok(())
    }

    fn should_retry(&self, attempt: u32) -> bool {
        self.config.max_reconnect_attempts == 0 || attempt <= self.config.max_reconnect_attempts
    }

    fn reconnect_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1);
        let seconds = 1_u64.checked_shl(shift).unwrap_or(u64::MAX).clamp(
            INITIAL_RECONNECT_DELAY_SECONDS,
            MAX_RECONNECT_DELAY_SECONDS,
        );
        let mut delay = Duration::from_secs(seconds);
        if self.config.reconnect_jitter {
            // Up to half the base delay, so synchronized drops fan out.
            delay += Duration::from_millis(rand::rng().random_range(0..=seconds * 500));
        }
        delay
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine.
        let _ = self.shared.events.send(event);
    }
}

fn encode_frame(frame: &ClientFrame) -> Result<String, ClientError> {
    serde_json::to_string(frame).map_err(|e| ClientError::Transport(e.to_string()))
}
