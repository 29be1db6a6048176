use thiserror::Error;

/// Result type for device control operations
pub type Result<T> = std::result::Result<T, RemoteError>;

/// Errors that can occur when controlling a receiver or TV
#[derive(Error, Debug)]
pub enum RemoteError {
    /// WebSocket connection error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Connection was closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// The session has no live connection
    #[error("Not connected")]
    NotConnected,

    /// The transport could not be established within the connect grace period
    #[error("Connect timeout")]
    ConnectTimeout,

    /// Player discovery or pairing did not complete
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Argument rejected before a command was built
    #[error("Invalid {name}: {detail}")]
    InvalidArgument {
        /// Name of the rejected argument
        name: &'static str,
        /// Why it was rejected
        detail: String,
    },

    /// Response belongs to a different command than the one in flight
    #[error("Command mismatch: expected {expected}, received {received}")]
    CommandMismatch {
        /// Correlation key of the in-flight command
        expected: String,
        /// Correlation key carried by the response
        received: String,
    },

    /// Device reported that the command did not succeed
    #[error("Command {command} failed: {detail}")]
    CommandFailed {
        /// Command path or URI
        command: String,
        /// Failure text reported by the device
        detail: String,
    },

    /// Invalid or unexpected response from the device
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// No HEOS player id is known for this session
    #[error("No player selected")]
    NoPlayer,
}

impl RemoteError {
    pub(crate) fn invalid_argument(name: &'static str, detail: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            detail: detail.into(),
        }
    }
}
