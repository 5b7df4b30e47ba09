use std::future::Future;

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::ClientError;

/// Text-frame socket transport.
///
/// The session manager deals in whole text frames; what carries them is
/// pluggable so tests can script a connection without a network.
pub trait SocketTransport: Send + 'static {
    fn connect(url: &str) -> impl Future<Output = Result<Self, ClientError>> + Send
    where
        Self: Sized;

    fn send(&mut self, text: &str) -> impl Future<Output = Result<(), ClientError>> + Send;

    /// The next text frame, or `None` once the peer has closed.
    fn recv(&mut self) -> impl Future<Output = Result<Option<String>, ClientError>> + Send;

    fn close(&mut self) -> impl Future<Output = Result<(), ClientError>> + Send;
}

/// WebSocket transport over tokio-tungstenite.
pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

impl SocketTransport for WebSocketTransport {
    async fn connect(url: &str) -> Result<Self, ClientError> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| ClientError::ConnectFailed(e.to_string()))?;
        Ok(Self { stream })
    }

    async fn send(&mut self, text: &str) -> Result<(), ClientError> {
        self.stream
            .send(Message::text(text))
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<String>, ClientError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_str().to_owned())),
                // Pongs are answered by tungstenite; binary frames are not
                // part of the protocol.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_))) => continue,
                Some(Ok(Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Err(e)) => return Err(ClientError::Transport(e.to_string())),
            }
        }
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        self.stream
            .close(None)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }
}

/// Map an HTTP(S) server origin to its realtime socket endpoint.
pub(crate) fn socket_url(server_url: &str) -> Result<String, ClientError> {
    let mut url = Url::parse(server_url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ClientError::InvalidUrl(format!(
                "unsupported scheme {other:?}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| ClientError::InvalidUrl(server_url.to_string()))?;

    let base = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{base}/api/ws"));
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.into())
}
