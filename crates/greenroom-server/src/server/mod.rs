//! HTTP surface and shared application state.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Json},
    routing::{delete, get, post, put},
    Router,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

use greenroom_chat::{
    ChatService, ChatStorage, ConnectionRegistry, LibSqlChatStorage, PresenceTracker, SessionStore,
};

use crate::config::ServerConfig;

mod auth;
mod error;
mod routes;

/// How often sockets that died without a close frame get reaped.
const STALE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Server application state: one database, one registry, one service.
pub struct AppState {
    pub config: ServerConfig,
    pub service: ChatService<LibSqlChatStorage>,
    pub registry: Arc<ConnectionRegistry>,
    pub presence: PresenceTracker,
    pub sessions: SessionStore,
    /// Cancelled once on shutdown; socket pumps and the sweeper watch it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(storage: LibSqlChatStorage, sessions: SessionStore, config: ServerConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.max_connections_per_user));
        let presence = PresenceTracker::new(Arc::clone(&registry));
        let service = ChatService::new(storage, Arc::clone(&registry));
        Self {
            config,
            service,
            registry,
            presence,
            sessions,
            shutdown: CancellationToken::new(),
        }
    }

    /// Open the database, apply the schema, and assemble the state.
    pub async fn connect(config: ServerConfig) -> Result<Arc<Self>> {
        let db = libsql::Builder::new_local(&config.database_path)
            .build()
            .await?;
        let conn = db.connect()?;
        let storage = LibSqlChatStorage::new(conn);
        storage.initialize().await?;
        let sessions = SessionStore::new(storage.connection());
        Ok(Arc::new(Self::new(storage, sessions, config)))
    }
}

/// Start the HTTP server and run until shutdown.
pub async fn start(config: ServerConfig) -> Result<()> {
    let state = AppState::connect(config).await?;
    let app = create_router(Arc::clone(&state));

    let addr = state.config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Starting HTTP server");

    let sweeper = tokio::spawn(sweep_stale_connections(Arc::clone(&state)));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&state)))
        .await?;

    state.shutdown.cancel();
    sweeper.await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(error) = result {
                warn!(%error, "Failed to listen for the shutdown signal");
            }
            info!("Shutdown signal received");
            state.shutdown.cancel();
        }
        _ = state.shutdown.cancelled() => {}
    }
}

/// Reap connections whose sockets died without unregistering, so their
/// users do not appear online forever.
async fn sweep_stale_connections(state: Arc<AppState>) {
    let mut ticker = tokio::time::interval(STALE_SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            _ = ticker.tick() => state.presence.sweep_stale().await,
        }
    }
}

/// Create the Axum router with all routes and middleware.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/messages/send", post(routes::messages::send_message_handler))
        .route(
            "/api/messages/conversation/:user_id",
            get(routes::messages::conversation_handler),
        )
        .route("/api/messages/mark-read", put(routes::messages::mark_read_handler))
        .route(
            "/api/messages/unread-count",
            get(routes::messages::unread_count_handler),
        )
        .route(
            "/api/messages/:message_id",
            delete(routes::messages::delete_message_handler),
        )
        .route(
            "/api/conversations",
            get(routes::conversations::list_conversations_handler),
        )
        .route(
            "/api/conversations/:user_id",
            delete(routes::conversations::hide_conversation_handler),
        )
        .route("/api/users/search", get(routes::users::search_users_handler))
        .route("/api/admin/notify", post(routes::admin::notify_handler))
        .route("/api/ws", get(routes::websocket::websocket_handler))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CompressionLayer::new())
        .layer(cors)
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    if config.cors_origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(error) => {
                warn!(%origin, %error, "Skipping invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Simple health check endpoint (for load balancers).
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.service.storage().health_check().await {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "service": "greenroom-server",
                "version": env!("CARGO_PKG_VERSION"),
                "connections": state.registry.connection_count()
            })),
        ),
        Ok(false) => {
            warn!("Health check: database returned no rows");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "greenroom-server",
                    "version": env!("CARGO_PKG_VERSION"),
                    "error": "database unhealthy"
                })),
            )
        }
        Err(error) => {
            warn!(%error, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "greenroom-server",
                    "version": env!("CARGO_PKG_VERSION"),
                    "error": format!("database error: {error}")
                })),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use greenroom_chat::{NewUser, UserRole};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn test_state() -> Arc<AppState> {
        let config = ServerConfig {
            database_path: ":memory:".to_string(),
            ..ServerConfig::default()
        };
        AppState::connect(config).await.expect("failed to build state")
    }

    async fn seed_user_with(
        state: &AppState,
        username: &str,
        role: UserRole,
        email_verified: bool,
    ) -> (String, String) {
        let user = state
            .service
            .storage()
            .create_user(NewUser {
                username,
                email: &format!("{username}@greenroom.test"),
                email_verified,
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
        seed_user_with(state, username, UserRole::Regular, true).await
    }

    fn request(
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .expect("failed to build request"),
            None => builder.body(Body::empty()).expect("failed to build request"),
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let body = response
            .into_body()
            .collect()
            .await
            .expect("failed to read body")
            .to_bytes();
        serde_json::from_slice(&body).expect("body is not valid json")
    }

    #[tokio::test]
    async fn health_endpoint_reports_status() {
        let state = test_state().await;
        let app = create_router(state);

        let response = app
            .oneshot(request("GET", "/health", None, None))
            .await
            .expect("request failed");

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["service"], "greenroom-server");
        assert_eq!(json["connections"], 0);
    }

    #[tokio::test]
    async fn missing_and_garbage_tokens_are_unauthorized() {
        let state = test_state().await;
        let app = create_router(state);

        let response = app
            .clone()
            .oneshot(request("GET", "/api/conversations", None, None))
            .await
            .expect("request failed");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["error"], "unauthorized");

        let response = app
            .oneshot(request("GET", "/api/conversations", Some("garbage"), None))
            .await
            .expect("request failed");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unverified_email_is_forbidden() {
        let state = test_state().await;
        let (_, token) =
            seed_user_with(&state, "fresh_signup", UserRole::Regular, false).await;
        let app = create_router(state);

        let response = app
            .oneshot(request("GET", "/api/conversations", Some(&token), None))
            .await
            .expect("request failed");

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn send_list_and_read_flow() {
        let state = test_state().await;
        let (alice_id, alice_token) = seed_user(&state, "alice").await;
        let (bob_id, bob_token) = seed_user(&state, "bob").await;
        let app = create_router(state);

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/messages/send",
                Some(&alice_token),
                Some(json!({ "receiverId": bob_id, "content": "take 3 is the one" })),
            ))
            .await
            .expect("request failed");
        assert_eq!(response.status(), StatusCode::OK);
        let sent = body_json(response).await;
        assert_eq!(sent["message"]["content"], "take 3 is the one");
        assert_eq!(sent["message"]["senderId"], alice_id.as_str());

        let response = app
            .clone()
            .oneshot(request("GET", "/api/conversations", Some(&bob_token), None))
            .await
            .expect("request failed");
        assert_eq!(response.status(), StatusCode::OK);
        let conversations = body_json(response).await;
        let summaries = conversations.as_array().expect("expected an array");
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0]["otherUser"]["username"], "alice");
        assert_eq!(summaries[0]["unreadCount"], 1);

        let response = app
            .clone()
            .oneshot(request(
                "PUT",
                "/api/messages/mark-read",
                Some(&bob_token),
                Some(json!({ "otherUserId": alice_id })),
            ))
            .await
            .expect("request failed");
        assert_eq!(response.status(), StatusCode::OK);
        let marked = body_json(response).await;
        assert_eq!(marked["updated"], 1);

        let response = app
            .oneshot(request(
                "GET",
                "/api/messages/unread-count",
                Some(&bob_token),
                None,
            ))
            .await
            .expect("request failed");
        let unread = body_json(response).await;
        assert_eq!(unread["count"], 0);
    }

    #[tokio::test]
    async fn deleting_someone_elses_message_is_forbidden() {
        let state = test_state().await;
        let (_, alice_token) = seed_user(&state, "alice").await;
        let (bob_id, bob_token) = seed_user(&state, "bob").await;
        let app = create_router(state);

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/messages/send",
                Some(&alice_token),
                Some(json!({ "receiverId": bob_id, "content": "scratch vocal" })),
            ))
            .await
            .expect("request failed");
        let sent = body_json(response).await;
        let message_id = sent["message"]["id"].as_str().expect("message id").to_string();

        let response = app
            .clone()
            .oneshot(request(
                "DELETE",
                &format!("/api/messages/{message_id}"),
                Some(&bob_token),
                None,
            ))
            .await
            .expect("request failed");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .clone()
            .oneshot(request(
                "DELETE",
                &format!("/api/messages/{message_id}"),
                Some(&alice_token),
                None,
            ))
            .await
            .expect("request failed");
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["ok"], true);

        // A second delete sees it as already gone.
        let response = app
            .oneshot(request(
                "DELETE",
                &format!("/api/messages/{message_id}"),
                Some(&alice_token),
                None,
            ))
            .await
            .expect("request failed");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn search_enforces_minimum_query_length() {
        let state = test_state().await;
        let (_, token) = seed_user(&state, "alice").await;
        seed_user(&state, "drummer_dave").await;
        let app = create_router(state);

        let response = app
            .clone()
            .oneshot(request("GET", "/api/users/search?q=d", Some(&token), None))
            .await
            .expect("request failed");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"], "invalid_input");

        let response = app
            .oneshot(request("GET", "/api/users/search?q=drum", Some(&token), None))
            .await
            .expect("request failed");
        assert_eq!(response.status(), StatusCode::OK);
        let hits = body_json(response).await;
        assert_eq!(hits.as_array().expect("expected an array").len(), 1);
        assert_eq!(hits[0]["username"], "drummer_dave");
    }

    #[tokio::test]
    async fn notify_endpoint_is_admin_only() {
        let state = test_state().await;
        let (_, regular_token) = seed_user(&state, "alice").await;
        let (_, admin_token) =
            seed_user_with(&state, "stagehand", UserRole::Admin, true).await;
        let app = create_router(state);

        let body = json!({ "title": "Maintenance tonight" });
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/admin/notify",
                Some(&regular_token),
                Some(body.clone()),
            ))
            .await
            .expect("request failed");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .oneshot(request(
                "POST",
                "/api/admin/notify",
                Some(&admin_token),
                Some(body),
            ))
            .await
            .expect("request failed");
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        // Nobody has a socket open in this test.
        assert_eq!(json["sent"], 0);
    }
}
