//! # Serpentia Client
//!
//! Transport-agnostic async client engine for the Serpentia multiplayer
//! snake game.
//!
//! This crate keeps local state synchronized with a server-authoritative
//! event stream delivered over one persistent, topic-multiplexed
//! connection, and forwards validated, throttled player input upstream.
//! The server is the single source of truth; this side is a best-effort
//! reconciler that recovers from missed events via explicit full fetches.
//!
//! ## Features
//!
//! - **Transport-agnostic** — implement the [`Transport`] trait for any backend
//! - **WebSocket built-in** — default `transport-websocket` feature provides
//!   `WebSocketTransport` (credential rides as a connection parameter)
//! - **Ref-counted subscriptions** — one underlying subscription per topic,
//!   re-established transparently across reconnects
//! - **Shape-tolerant** — both board wire shapes normalize to one canonical
//!   snapshot
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! let user = identity::user_id_from_token(&token);
//! let manager = ConnectionManager::new();
//!
//! let lobby = LobbyReconciler::new();
//! let _lobby_sub = lobby.subscribe(&manager);
//! let _watch = lobby.add_listener(|rooms| { /* render room list */ });
//!
//! manager
//!     .connect(|| WebSocketTransport::connect("ws://localhost:8080/ws", &token))
//!     .await;
//!
//! let game = GameReconciler::new(&user);
//! let _game_sub = game.subscribe(&manager, "room-1");
//! let input = InputController::new(manager.clone(), game.clone(), "room-1", &user);
//! input.on_direction(Direction::Up);
//! ```

pub mod api;
pub mod connection;
pub mod error;
pub mod game;
pub mod identity;
pub mod input;
pub mod lobby;
pub mod protocol;
pub mod transport;

#[cfg(feature = "transport-websocket")]
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use api::{CreateRoomRequest, LobbyApi};
pub use connection::{ConnectionManager, ConnectionState, SubscriptionHandle};
pub use error::SerpentiaError;
pub use game::{GameReconciler, GameSnapshot};
pub use input::{InputConfig, InputController};
pub use lobby::LobbyReconciler;
pub use protocol::{Direction, GameEvent, GameMode, GameStatus, Player, Room, RoomChangeEvent};
pub use transport::Transport;

#[cfg(feature = "transport-websocket")]
pub use transports::WebSocketTransport;
