//! Error types for reql-client.

use thiserror::Error;

use crate::response::ResponseType;

/// Main error type for all driver operations.
#[derive(Debug, Error)]
pub enum ReqlError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The server rejected the version/auth exchange, or never finished it.
    #[error("Server dropped connection with message: \"{0}\"")]
    Handshake(String),

    /// The listener is dead or the socket was closed.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Undecodable payload or an acknowledgement of the wrong shape.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Cursor used after its connection reconnected.
    #[error("Connection has been reset, cursor is no longer valid")]
    StaleCursor,

    /// Cursor iterated a second time.
    #[error("Can only iterate over a cursor once")]
    AlreadyIterated,

    /// Invalid option keys or values at the API boundary.
    #[error("Invalid argument: {0}")]
    ProtocolArgument(String),

    /// Error response decoded from the server.
    #[error("{kind:?}: {message}")]
    Server {
        /// Which error class the server reported.
        kind: ResponseType,
        /// Server message, verbatim.
        message: String,
        /// Server-supplied backtrace frames.
        backtrace: Vec<serde_json::Value>,
    },

    /// The wait was cancelled; the connection was reconnected before this was returned.
    #[error("Query interrupted, connection was reset")]
    Interrupted,

    /// Framing violation (oversized payload, short header).
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl ReqlError {
    /// True if this error means the connection can no longer serve the request.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, ReqlError::ConnectionClosed(_))
    }
}

/// Result type alias using ReqlError.
pub type Result<T> = std::result::Result<T, ReqlError>;
