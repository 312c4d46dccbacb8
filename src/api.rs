//! Lobby collaborator operations (room CRUD over HTTP).
//!
//! This crate treats the REST side of the lobby as a black box: the
//! [`LobbyApi`] trait captures the request/response signatures and nothing
//! else. The application supplies an implementation (reqwest, test double,
//! whatever); this crate only consumes it, e.g. in
//! [`LobbyReconciler::refresh_from`](crate::lobby::LobbyReconciler::refresh_from).
//!
//! Failures propagate to the caller as [`SerpentiaError::Api`]; no retries
//! happen at this layer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::protocol::{GameMode, Room, RoomId};

/// Request body for creating a room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub room_id: RoomId,
    /// Creator's user id; the server makes them host.
    pub host: String,
    pub game_mode: GameMode,
    pub max_players: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_score: Option<u32>,
    #[serde(default)]
    pub powerups: bool,
}

/// Room CRUD operations consumed by this crate.
///
/// Contract assumption, enforced server-side: joining a room whose
/// `currentPlayers` already reached `maxPlayers` fails instead of
/// overfilling the room.
#[async_trait]
pub trait LobbyApi: Send + Sync {
    /// Authoritative full room list.
    async fn fetch_rooms(&self) -> Result<Vec<Room>>;

    /// Create a room; returns the server's post-create snapshot.
    async fn create_room(&self, request: CreateRoomRequest) -> Result<Room>;

    /// Join a room; returns the server's post-join snapshot.
    async fn join_room(&self, room_id: &str) -> Result<Room>;

    /// Leave a room.
    async fn leave_room(&self, room_id: &str) -> Result<()>;

    /// Ask the server to start the match in a room (host only).
    async fn start_game(&self, room_id: &str) -> Result<()>;
}
