//! Bidirectional channel abstraction used for streamed simulation sessions.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::{ChannelFrame, ConnectionId, Credential};

/// Opens connections to the streaming simulation endpoint.
///
/// # Implementations
///
/// - **Production**: `WsConnector` - WebSocket via tokio-tungstenite
/// - **Simulation**: `SimConnector` - in-memory channel with fault injection
///
/// # Frame Flow
///
/// ```text
/// Client                     Channel                    Server
///   |                           |                          |
///   |-- send(start_simulation)->|------------------------->|
///   |                           |<-- simulation_progress --|
///   |<-- recv() -> frame -------|                          |
/// ```
#[async_trait]
pub trait ChannelConnector: Send + Sync + 'static {
    /// The live connection type produced by this connector.
    type Connection: ChannelConnection;

    /// Opens a new connection, attaching the credential if one is set.
    ///
    /// # Returns
    /// * `Ok(conn)` - The channel is established and ready to send
    /// * `Err(EnvError::ConnectError)` - The attempt failed; the caller decides
    ///   whether to back off and retry
    async fn connect(&self, credential: Option<&Credential>) -> Result<Self::Connection, EnvError>;
}

/// An established channel.
///
/// `send` and `recv` may be called concurrently from different tasks.
#[async_trait]
pub trait ChannelConnection: Send + Sync + 'static {
    /// Identifier of this connection (for logging).
    fn id(&self) -> ConnectionId;

    /// Sends one frame.
    ///
    /// # Note
    /// Success means the frame was handed to the channel, not that the
    /// server processed it.
    async fn send(&self, frame: ChannelFrame) -> Result<(), EnvError>;

    /// Receives the next frame from the server.
    ///
    /// # Returns
    /// * `Some(frame)` - A frame was received
    /// * `None` - The channel was closed (locally, by the peer, or by a fault)
    async fn recv(&self) -> Option<ChannelFrame>;

    /// Closes the channel. Pending and future `recv` calls return `None`.
    async fn close(&self);
}
