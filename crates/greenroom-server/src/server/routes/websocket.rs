//! Realtime socket endpoint.
//!
//! One socket per browser tab. The first meaningful frame must be `auth`
//! carrying a session token; everything else before it is ignored. After
//! validation the connection joins the registry, gets an `authenticated`
//! ack, and receives pushes until either side closes.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use greenroom_chat::{AuthenticatedUser, ConnectionId, RegisterOutcome};
use greenroom_proto::{ClientFrame, ServerFrame};

use crate::server::AppState;

/// GET /api/ws
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    debug!("Socket upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();

    let user = match timeout(state.config.ws_auth_timeout, await_auth(&mut stream, &state)).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            let _ = close_with_policy(&mut sink, "authentication failed").await;
            return;
        }
        Err(_) => {
            debug!("Socket never authenticated, closing");
            let _ = close_with_policy(&mut sink, "authentication timeout").await;
            return;
        }
    };

    let connection_id: ConnectionId = Uuid::now_v7();
    let (tx, rx) = mpsc::channel::<ServerFrame>(state.config.ws_channel_capacity);

    let outcome = state.registry.register(&user.id, connection_id, tx);
    if outcome == RegisterOutcome::CapExceeded {
        warn!(user_id = %user.id, "Connection cap reached, rejecting socket");
        let _ = close_with_policy(&mut sink, "too many connections").await;
        return;
    }
    state.presence.connection_registered(&user.id, outcome).await;
    info!(user_id = %user.id, %connection_id, "Socket authenticated");

    let ack = ServerFrame::Authenticated {
        user_id: user.id.clone(),
    };
    if send_frame(&mut sink, &ack).await.is_err() {
        finish(&state, &user, connection_id).await;
        return;
    }

    pump(&state, &user, &mut sink, &mut stream, rx).await;
    finish(&state, &user, connection_id).await;
}

/// Wait for a valid `auth` frame. `None` means the socket closed, errored,
/// or presented a token that did not resolve to a live session.
async fn await_auth(
    stream: &mut SplitStream<WebSocket>,
    state: &AppState,
) -> Option<AuthenticatedUser> {
    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue,
            Err(error) => {
                debug!(%error, "Socket failed before authenticating");
                return None;
            }
        };

        let frame: ClientFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(error) => {
                debug!(%error, "Ignoring unrecognized pre-auth frame");
                continue;
            }
        };
        let ClientFrame::Auth { token } = frame else {
            // Nothing else means anything until the socket has a user.
            continue;
        };

        match state.sessions.validate(&token).await {
            Ok(Some(user)) => return Some(user),
            Ok(None) => {
                warn!("Socket auth with invalid or expired token");
                return None;
            }
            Err(error) => {
                warn!(%error, "Session lookup failed during socket auth");
                return None;
            }
        }
    }
    None
}

async fn pump(
    state: &AppState,
    user: &AuthenticatedUser,
    sink: &mut SplitSink<WebSocket, Message>,
    stream: &mut SplitStream<WebSocket>,
    mut rx: mpsc::Receiver<ServerFrame>,
) {
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if send_frame(sink, &frame).await.is_err() {
                        break;
                    }
                }
                // Unregistered out from under us; the socket is done.
                None => break,
            },
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => handle_client_frame(state, user, &text).await,
                Some(Ok(Message::Ping(data))) => {
                    if sink.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(user_id = %user.id, "Socket closed by client");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    debug!(user_id = %user.id, %error, "Socket error");
                    break;
                }
            },
        }
    }
}

/// Dispatch one inbound frame from an authenticated socket.
async fn handle_client_frame(state: &AppState, user: &AuthenticatedUser, text: &str) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(error) => {
            // Unknown frame types are future clients, not errors.
            debug!(%error, "Ignoring unrecognized frame");
            return;
        }
    };

    match frame {
        ClientFrame::Auth { .. } => {
            debug!(user_id = %user.id, "Duplicate auth frame ignored");
        }
        ClientFrame::TypingStart { receiver_id } => {
            let frame = ServerFrame::TypingStart {
                user_id: user.id.clone(),
            };
            state.registry.send_to_user(&receiver_id, &frame).await;
        }
        ClientFrame::TypingStop { receiver_id } => {
            let frame = ServerFrame::TypingStop {
                user_id: user.id.clone(),
            };
            state.registry.send_to_user(&receiver_id, &frame).await;
        }
    }
}

async fn send_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    frame: &ServerFrame,
) -> Result<(), axum::Error> {
    match serde_json::to_string(frame) {
        Ok(text) => sink.send(Message::Text(text)).await,
        Err(error) => {
            warn!(%error, "Dropping unencodable frame");
            Ok(())
        }
    }
}

async fn close_with_policy(
    sink: &mut SplitSink<WebSocket, Message>,
    reason: &'static str,
) -> Result<(), axum::Error> {
    sink.send(Message::Close(Some(CloseFrame {
        code: close_code::POLICY,
        reason: reason.into(),
    })))
    .await
}

async fn finish(state: &AppState, user: &AuthenticatedUser, connection_id: ConnectionId) {
    let outcome = state.registry.unregister(&user.id, connection_id);
    state.presence.connection_closed(&user.id, outcome).await;
    info!(user_id = %user.id, %connection_id, "Socket disconnected");
}
