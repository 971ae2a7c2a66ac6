//! Error types for the environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Connection attempt failed (refused, DNS, TLS, handshake).
    #[error("Connect error: {0}")]
    ConnectError(String),

    /// Send failed on an established channel (closed, buffer full).
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The channel was closed locally or by the peer.
    #[error("Channel closed")]
    ChannelClosed,

    /// Frame serialization/deserialization failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates a connect error.
    pub fn connect(msg: impl Into<String>) -> Self {
        Self::ConnectError(msg.into())
    }

    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkError(msg.into())
    }
}

impl From<serde_json::Error> for EnvError {
    fn from(e: serde_json::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}
