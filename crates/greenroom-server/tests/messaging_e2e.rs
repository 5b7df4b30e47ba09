//! End-to-end flows over a real listener: HTTP requests through reqwest,
//! sockets through tokio-tungstenite, and one full round through the
//! greenroom-client crate.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use greenroom_chat::{NewUser, UserRole};
use greenroom_proto::{ClientFrame, NotificationVariant, ServerFrame};
use greenroom_server::{
    config::ServerConfig,
    server::{create_router, AppState},
};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);
const SILENCE_WINDOW: Duration = Duration::from_millis(300);

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn spawn_server() -> (String, Arc<AppState>) {
    let config = ServerConfig {
        database_path: ":memory:".to_string(),
        ..ServerConfig::default()
    };
    let state = AppState::connect(config).await.expect("failed to build state");

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("failed to bind");
    let addr = listener.local_addr().expect("listener has no address");
    let app = create_router(Arc::clone(&state));
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server crashed");
    });

    (format!("127.0.0.1:{}", addr.port()), state)
}

async fn seed_user_with(
    state: &AppState,
    username: &str,
    role: UserRole,
) -> (String, String) {
    let user = state
        .service
        .storage()
        .create_user(NewUser {
            username,
            email: &format!("{username}@greenroom.test"),
            email_verified: true,
            role,
        })
        .await
        .expect("failed to create user");
    let token = state
        .sessions
        .create_session(&user.id, chrono::Duration::hours(1))
        .await
        .expect("failed to create session");
    (user.id, token)
}

async fn seed_user(state: &AppState, username: &str) -> (String, String) {
    seed_user_with(state, username, UserRole::Regular).await
}

/// Open a socket, authenticate, and swallow the `authenticated` ack.
async fn open_socket(addr: &str, token: &str) -> Socket {
    let (mut socket, _) = connect_async(format!("ws://{addr}/api/ws"))
        .await
        .expect("failed to connect socket");
    let auth = serde_json::to_string(&ClientFrame::Auth {
        token: token.to_string(),
    })
    .expect("failed to encode auth frame");
    socket
        .send(Message::text(auth))
        .await
        .expect("failed to send auth frame");

    match next_frame(&mut socket).await {
        ServerFrame::Authenticated { .. } => socket,
        other => panic!("expected authenticated ack, got {other:?}"),
    }
}

async fn next_frame(socket: &mut Socket) -> ServerFrame {
    loop {
        let message = timeout(EVENT_TIMEOUT, socket.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .expect("socket errored");
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).expect("frame should parse");
        }
    }
}

async fn assert_no_frame(socket: &mut Socket) {
    if let Ok(Some(Ok(Message::Text(text)))) = timeout(SILENCE_WINDOW, socket.next()).await {
        panic!("expected silence, got frame {text}");
    }
}

async fn send_client_frame(socket: &mut Socket, frame: &ClientFrame) {
    let text = serde_json::to_string(frame).expect("failed to encode frame");
    socket
        .send(Message::text(text))
        .await
        .expect("failed to send frame");
}

#[tokio::test]
async fn presence_changes_only_on_the_connection_boundary() {
    let (addr, state) = spawn_server().await;
    let (alice_id, alice_token) = seed_user(&state, "alice").await;
    let (_bob_id, bob_token) = seed_user(&state, "bob").await;

    let mut bob_socket = open_socket(&addr, &bob_token).await;

    // First connection: bob hears alice come online.
    let mut alice_first = open_socket(&addr, &alice_token).await;
    match next_frame(&mut bob_socket).await {
        ServerFrame::OnlineStatus { user_id, online } => {
            assert_eq!(user_id, alice_id);
            assert!(online);
        }
        other => panic!("expected online_status, got {other:?}"),
    }
    assert!(state.presence.is_online(&alice_id));

    // Second tab: no transition, no broadcast.
    let mut alice_second = open_socket(&addr, &alice_token).await;
    assert_no_frame(&mut bob_socket).await;

    // Closing one of two tabs is not a transition either.
    alice_second.close(None).await.expect("failed to close socket");
    assert_no_frame(&mut bob_socket).await;
    assert!(state.presence.is_online(&alice_id));

    // Closing the last tab is.
    alice_first.close(None).await.expect("failed to close socket");
    match next_frame(&mut bob_socket).await {
        ServerFrame::OnlineStatus { user_id, online } => {
            assert_eq!(user_id, alice_id);
            assert!(!online);
        }
        other => panic!("expected online_status, got {other:?}"),
    }
    assert!(!state.presence.is_online(&alice_id));
}

#[tokio::test]
async fn sent_messages_are_pushed_to_receiver_and_other_sender_tabs() {
    let (addr, state) = spawn_server().await;
    let (alice_id, alice_token) = seed_user(&state, "alice").await;
    let (bob_id, bob_token) = seed_user(&state, "bob").await;

    let mut alice_socket = open_socket(&addr, &alice_token).await;
    let mut bob_socket = open_socket(&addr, &bob_token).await;
    // Drain alice's view of bob coming online.
    match next_frame(&mut alice_socket).await {
        ServerFrame::OnlineStatus { .. } => {}
        other => panic!("expected online_status, got {other:?}"),
    }

    let http = reqwest::Client::new();
    let response = http
        .post(format!("http://{addr}/api/messages/send"))
        .bearer_auth(&alice_token)
        .json(&serde_json::json!({ "receiverId": bob_id, "content": "rough mix attached" }))
        .send()
        .await
        .expect("request failed");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.expect("invalid json");
    let message_id = body["message"]["id"].as_str().expect("message id");

    // The receiver gets the push.
    match next_frame(&mut bob_socket).await {
        ServerFrame::NewMessage { message } => {
            assert_eq!(message.id, message_id);
            assert_eq!(message.sender_id, alice_id);
            assert_eq!(message.content, "rough mix attached");
        }
        other => panic!("expected new_message, got {other:?}"),
    }
    // So does the sender's own open tab.
    match next_frame(&mut alice_socket).await {
        ServerFrame::NewMessage { message } => assert_eq!(message.id, message_id),
        other => panic!("expected new_message, got {other:?}"),
    }
}

#[tokio::test]
async fn typing_frames_are_relayed_and_junk_is_ignored() {
    let (addr, state) = spawn_server().await;
    let (alice_id, alice_token) = seed_user(&state, "alice").await;
    let (bob_id, bob_token) = seed_user(&state, "bob").await;

    let mut alice_socket = open_socket(&addr, &alice_token).await;
    let mut bob_socket = open_socket(&addr, &bob_token).await;
    match next_frame(&mut alice_socket).await {
        ServerFrame::OnlineStatus { .. } => {}
        other => panic!("expected online_status, got {other:?}"),
    }

    send_client_frame(
        &mut alice_socket,
        &ClientFrame::TypingStart {
            receiver_id: bob_id.clone(),
        },
    )
    .await;
    match next_frame(&mut bob_socket).await {
        ServerFrame::TypingStart { user_id } => assert_eq!(user_id, alice_id),
        other => panic!("expected typing_start, got {other:?}"),
    }

    // A frame type the server has never heard of changes nothing.
    alice_socket
        .send(Message::text(r#"{"type":"studio_flex","data":{"bpm":174}}"#))
        .await
        .expect("failed to send junk");

    send_client_frame(
        &mut alice_socket,
        &ClientFrame::TypingStop {
            receiver_id: bob_id.clone(),
        },
    )
    .await;
    match next_frame(&mut bob_socket).await {
        ServerFrame::TypingStop { user_id } => assert_eq!(user_id, alice_id),
        other => panic!("expected typing_stop, got {other:?}"),
    }
}

#[tokio::test]
async fn marking_read_notifies_the_original_sender() {
    let (addr, state) = spawn_server().await;
    let (alice_id, alice_token) = seed_user(&state, "alice").await;
    let (bob_id, bob_token) = seed_user(&state, "bob").await;

    let mut alice_socket = open_socket(&addr, &alice_token).await;

    let http = reqwest::Client::new();
    let response = http
        .post(format!("http://{addr}/api/messages/send"))
        .bearer_auth(&alice_token)
        .json(&serde_json::json!({ "receiverId": bob_id, "content": "did you get the stems?" }))
        .send()
        .await
        .expect("request failed");
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    // Alice's own tab sees the echo first.
    match next_frame(&mut alice_socket).await {
        ServerFrame::NewMessage { .. } => {}
        other => panic!("expected new_message, got {other:?}"),
    }

    let response = http
        .put(format!("http://{addr}/api/messages/mark-read"))
        .bearer_auth(&bob_token)
        .json(&serde_json::json!({ "otherUserId": alice_id }))
        .send()
        .await
        .expect("request failed");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.expect("invalid json");
    assert_eq!(body["updated"], 1);

    match next_frame(&mut alice_socket).await {
        ServerFrame::MessageRead { read_by, .. } => assert_eq!(read_by, bob_id),
        other => panic!("expected message_read, got {other:?}"),
    }
}

#[tokio::test]
async fn admin_broadcast_reaches_every_open_socket() {
    let (addr, state) = spawn_server().await;
    let (_alice_id, alice_token) = seed_user(&state, "alice").await;
    let (_bob_id, bob_token) = seed_user(&state, "bob").await;
    let (_admin_id, admin_token) = seed_user_with(&state, "stagehand", UserRole::Admin).await;

    let mut alice_socket = open_socket(&addr, &alice_token).await;
    let mut bob_socket = open_socket(&addr, &bob_token).await;
    match next_frame(&mut alice_socket).await {
        ServerFrame::OnlineStatus { .. } => {}
        other => panic!("expected online_status, got {other:?}"),
    }

    let http = reqwest::Client::new();
    let response = http
        .post(format!("http://{addr}/api/admin/notify"))
        .bearer_auth(&admin_token)
        .json(&serde_json::json!({
            "title": "Studio closed Friday",
            "description": "Console maintenance",
            "variant": "warning"
        }))
        .send()
        .await
        .expect("request failed");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.expect("invalid json");
    assert_eq!(body["sent"], 2);

    for socket in [&mut alice_socket, &mut bob_socket] {
        match next_frame(socket).await {
            ServerFrame::Notification {
                title, variant, ..
            } => {
                assert_eq!(title, "Studio closed Friday");
                assert_eq!(variant, Some(NotificationVariant::Warning));
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }
}

mod client_roundtrip {
    use super::*;

    use greenroom_client::{ChatClient, ChatSession, ClientConfig, ClientEvent, IdentityProvider};

    struct StaticIdentity {
        token: String,
        user_id: String,
    }

    impl IdentityProvider for StaticIdentity {
        fn session_token(&self) -> Option<String> {
            Some(self.token.clone())
        }

        fn user_id(&self) -> Option<String> {
            Some(self.user_id.clone())
        }
    }

    async fn next_event(
        events: &mut tokio::sync::broadcast::Receiver<ClientEvent>,
    ) -> ClientEvent {
        timeout(EVENT_TIMEOUT, events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn client_crate_connects_and_receives_pushes() {
        let (addr, state) = spawn_server().await;
        let (alice_id, alice_token) = seed_user(&state, "alice").await;
        let (bob_id, bob_token) = seed_user(&state, "bob").await;

        let identity = Arc::new(StaticIdentity {
            token: alice_token,
            user_id: alice_id.clone(),
        });
        let (session, client): (ChatSession, ChatClient) =
            ChatSession::new(ClientConfig::new(format!("http://{addr}")), identity)
                .expect("failed to build session");
        let mut events = client.subscribe();
        let task = tokio::spawn(session.run());

        match next_event(&mut events).await {
            ClientEvent::Connected { user_id } => assert_eq!(user_id, alice_id),
            other => panic!("expected connected event, got {other:?}"),
        }

        let http = reqwest::Client::new();
        let response = http
            .post(format!("http://{addr}/api/messages/send"))
            .bearer_auth(&bob_token)
            .json(&serde_json::json!({ "receiverId": alice_id, "content": "booth is free" }))
            .send()
            .await
            .expect("request failed");
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        loop {
            if let ClientEvent::Frame(ServerFrame::NewMessage { message }) =
                next_event(&mut events).await
            {
                assert_eq!(message.sender_id, bob_id);
                assert_eq!(message.content, "booth is free");
                break;
            }
        }

        client.shutdown();
        task.await
            .expect("session task panicked")
            .expect("session should stop cleanly");
    }
}
