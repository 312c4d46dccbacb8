//! Transport implementations for the game-server connection.
//!
//! Concrete [`Transport`](crate::Transport) implementations live behind
//! feature gates:
//!
//! | Feature                | Transport              |
//! |------------------------|------------------------|
//! | `transport-websocket`  | [`WebSocketTransport`] |
//!
//! # Example
//!
//! ```rust,ignore
//! # async fn example() -> Result<(), serpentia_client::SerpentiaError> {
//! use serpentia_client::{WebSocketTransport, Transport};
//!
//! let mut ws = WebSocketTransport::connect("ws://localhost:8080/ws", "jwt-token").await?;
//! ws.send(r#"{"type":"Subscribe","data":{"topic":"/topic/lobby"}}"#.to_string()).await?;
//!
//! if let Some(Ok(frame)) = ws.recv().await {
//!     println!("server said: {frame}");
//! }
//!
//! ws.close().await?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::WebSocketTransport;
