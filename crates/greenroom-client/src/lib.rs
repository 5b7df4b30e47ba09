//! Realtime client for the greenroom chat server.
//!
//! One [`ChatSession`] per application process owns the socket; the
//! [`ChatClient`] handle it hands back is what UI code holds: subscribe to
//! [`ClientEvent`]s, report composer keystrokes, send ephemeral frames.
//! Durable operations (sending messages, marking read) go over the HTTP
//! API; this crate only carries what must arrive live.

pub mod error;
pub mod session;
pub mod transport;

pub use error::ClientError;
pub use session::{
    ChatClient, ChatSession, ClientConfig, ClientEvent, ConnectionState, IdentityProvider,
    Notifier, TYPING_IDLE,
};
pub use transport::{SocketTransport, WebSocketTransport};
