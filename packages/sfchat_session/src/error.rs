use tokio_tungstenite::tungstenite;

/// Problems with the user-supplied endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("server address is empty")]
    MissingHost,

    #[error("invalid port: {0}")]
    InvalidPort(String),

    #[error("invalid relay url {url}: {reason}")]
    InvalidRelay { url: String, reason: String },
}

/// An inbound frame that could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("frame is not a JSON object")]
    NotAnObject,
}

/// Failures of the underlying socket.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("connection closed")]
    Closed,

    #[error("connect failed: {0}")]
    Connect(String),
}

/// Errors surfaced by [`crate::runtime::SessionHandle`].
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session task is gone")]
    Gone,

    #[error("session task didn't respond")]
    NoResponse,
}
