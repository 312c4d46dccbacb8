//! Error types for the Serpentia client.

use thiserror::Error;

/// Errors that can occur when using the Serpentia client.
#[derive(Debug, Error)]
pub enum SerpentiaError {
    /// Failed to send a frame through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation that requires an active connection, but the
    /// client is not connected.
    #[error("not connected to server")]
    NotConnected,

    /// The server reported a protocol-level error on the connection.
    #[error("server error: {message}")]
    Server {
        /// Human-readable error message from the server.
        message: String,
    },

    /// A lobby collaborator request (room CRUD) failed.
    #[error("lobby request failed: {message}")]
    Api {
        /// HTTP status, if the failure came with one.
        status: Option<u16>,
        /// Human-readable failure description.
        message: String,
    },

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for Serpentia client operations.
pub type Result<T> = std::result::Result<T, SerpentiaError>;
