//! Transport abstraction for the persistent game-server connection.
//!
//! The [`Transport`] trait defines a bidirectional text frame channel
//! between the client and the server. All traffic is JSON text
//! ([`ClientFrame`](crate::protocol::ClientFrame) out,
//! [`ServerFrame`](crate::protocol::ServerFrame) in), so every transport
//! implementation must handle message framing internally (WebSocket frames,
//! length-prefixed TCP, and so on).
//!
//! # Connection Setup
//!
//! Connection setup is intentionally NOT part of this trait — different
//! transports have fundamentally different connection parameters (URL plus
//! credential for WebSocket, host:port for TCP). Construct a connected
//! transport externally and hand it to
//! [`ConnectionManager::connect`](crate::connection::ConnectionManager::connect)
//! via its dial closure.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use serpentia_client::error::SerpentiaError;
//! use serpentia_client::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, frame: String) -> Result<(), SerpentiaError> {
//!         // Send the JSON text frame over your transport
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, SerpentiaError>> {
//!         // Receive the next JSON text frame
//!         // Return None when the connection is closed cleanly
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), SerpentiaError> {
//!         // Gracefully shut down the connection
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::SerpentiaError;

/// A bidirectional text frame transport for the game-server connection.
///
/// Implementors shuttle serialized JSON strings between the client and
/// server. Each call to [`send`](Transport::send) transmits one complete
/// frame; each call to [`recv`](Transport::recv) returns one complete frame.
///
/// # Object Safety
///
/// This trait is object-safe, so `Box<dyn Transport>` works for dynamic
/// dispatch. The connection manager accepts `impl Transport` (monomorphized)
/// for the common case.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it
/// is used inside `tokio::select!`. If `recv` is cancelled before
/// completion, calling it again must not lose data. Channel-based
/// implementations (e.g., wrapping `mpsc::Receiver`) are naturally
/// cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text frame to the server.
    ///
    /// # Errors
    ///
    /// Returns [`SerpentiaError::TransportSend`] if the frame could not be
    /// sent (e.g., connection broken, write buffer full).
    async fn send(&mut self, frame: String) -> Result<(), SerpentiaError>;

    /// Receive the next JSON text frame from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))` — a complete frame was received
    /// - `Some(Err(e))` — a transport error occurred
    /// - `None` — the connection was closed cleanly by the server
    ///
    /// # Cancel Safety
    ///
    /// This method **MUST** be cancel-safe (see [trait documentation](Transport)).
    async fn recv(&mut self) -> Option<Result<String, SerpentiaError>>;

    /// Close the transport connection gracefully.
    ///
    /// After calling this method, subsequent calls to [`send`](Transport::send)
    /// and [`recv`](Transport::recv) may return errors or `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations
    /// should still release resources even if the close handshake fails.
    async fn close(&mut self) -> Result<(), SerpentiaError>;
}
