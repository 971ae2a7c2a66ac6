//! Production channel over WebSocket (tokio-tungstenite).
//!
//! Frames travel as JSON text messages in the [`ChannelFrame`] shape. The
//! credential is attached as a bearer token on the upgrade request, so a new
//! credential always needs a new connection.

use crate::channel::{ChannelConnection, ChannelConnector};
use crate::error::EnvError;
use crate::types::{ChannelFrame, ConnectionId, Credential};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector for the simulation server's WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    /// Creates a connector for `url` (e.g. `ws://localhost:8000`).
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Returns the endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ChannelConnector for WsConnector {
    type Connection = WsConnection;

    async fn connect(&self, credential: Option<&Credential>) -> Result<WsConnection, EnvError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| EnvError::connect(e.to_string()))?;

        if let Some(credential) = credential {
            let value = HeaderValue::from_str(&format!("Bearer {}", credential.expose()))
                .map_err(|e| EnvError::connect(format!("invalid credential header: {}", e)))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (socket, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| EnvError::connect(e.to_string()))?;

        let id = ConnectionId::new();
        debug!(connection = %id, url = %self.url, "WebSocket connected");

        let (sink, stream) = socket.split();
        Ok(WsConnection {
            id,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        })
    }
}

/// A live WebSocket connection.
pub struct WsConnection {
    id: ConnectionId,
    sink: Mutex<SplitSink<Socket, Message>>,
    stream: Mutex<SplitStream<Socket>>,
}

#[async_trait]
impl ChannelConnection for WsConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send(&self, frame: ChannelFrame) -> Result<(), EnvError> {
        let text = serde_json::to_string(&frame)?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::text(text))
            .await
            .map_err(|e| EnvError::network(e.to_string()))
    }

    async fn recv(&self) -> Option<ChannelFrame> {
        let mut stream = self.stream.lock().await;
        loop {
            let message = match stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    warn!(connection = %self.id, error = %e, "WebSocket read failed");
                    return None;
                }
                None => return None,
            };

            let parsed = match &message {
                Message::Text(text) => serde_json::from_str::<ChannelFrame>(text.as_str()),
                Message::Binary(bytes) => serde_json::from_slice::<ChannelFrame>(bytes),
                Message::Close(_) => return None,
                _ => continue,
            };

            match parsed {
                Ok(frame) => return Some(frame),
                Err(e) => {
                    // One bad frame does not take the channel down.
                    warn!(connection = %self.id, error = %e, "Dropping undecodable frame");
                }
            }
        }
    }

    async fn close(&self) {
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            debug!(connection = %self.id, error = %e, "WebSocket close returned error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_refused_is_connect_error() {
        // Port 9 (discard) on localhost is not expected to speak WebSocket.
        let connector = WsConnector::new("ws://127.0.0.1:9");
        match connector.connect(None).await {
            Err(EnvError::ConnectError(_)) => {}
            Err(other) => panic!("unexpected error kind: {other}"),
            Ok(_) => panic!("connect unexpectedly succeeded"),
        }
    }

    #[tokio::test]
    async fn test_invalid_url_is_connect_error() {
        let connector = WsConnector::new("not a url");
        assert!(matches!(
            connector.connect(Some(&Credential::new("t"))).await,
            Err(EnvError::ConnectError(_))
        ));
    }
}
