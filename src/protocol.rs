//! Wire-compatible protocol types for the Serpentia game server.
//!
//! Every type in this module produces the same JSON the server emits on its
//! topics (camelCase field names, `SCREAMING_SNAKE_CASE` event tags). Two
//! families of payloads exist:
//!
//! - lobby traffic: [`RoomChangeEvent`] snapshots of [`Room`]s
//! - game traffic: [`GameEvent`]s whose `board` field may arrive in either of
//!   two shapes (see [`BoardPayload`])
//!
//! The connection itself carries [`ClientFrame`]/[`ServerFrame`] envelopes
//! that address topics by name.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

// ── Type aliases ────────────────────────────────────────────────────

/// Unique identifier for rooms (server-assigned, stable).
pub type RoomId = String;

/// Player identifier as the server reports it. May be a session id or a
/// display name; the two can diverge transiently (see `GameReconciler`).
pub type PlayerId = String;

// ── Enums ───────────────────────────────────────────────────────────

/// Movement direction for a snake.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    #[default]
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// The direction that would reverse this one.
    pub fn opposite(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }

    /// Returns `true` if `other` is the exact reverse of `self`.
    ///
    /// UP↔DOWN and LEFT↔RIGHT are the mutually exclusive pairs; a snake
    /// turning into its own neck is an immediately fatal self-collision,
    /// so such moves are filtered client-side.
    pub fn is_opposite(self, other: Self) -> bool {
        self.opposite() == other
    }
}

/// Room game mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum GameMode {
    /// Free-for-all, last snake standing or first to the target score.
    #[default]
    Competitive,
    /// Two or more teams share a score pool.
    Team,
    /// Everyone works toward a common target score.
    Cooperative,
}

/// Lifecycle status shared by rooms and game boards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameStatus {
    #[default]
    Waiting,
    InGame,
    Finished,
}

// ── Structs ─────────────────────────────────────────────────────────

/// A cell position on the board grid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

/// Team metadata for TEAM-mode rooms.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TeamInfo {
    pub name: String,
    pub color: String,
    #[serde(default)]
    pub members: Vec<String>,
}

/// Fallback color assigned to players whose color the server omitted.
pub const DEFAULT_PLAYER_COLOR: &str = "#4CAF50";

fn default_player_color() -> String {
    DEFAULT_PLAYER_COLOR.to_string()
}

fn default_alive() -> bool {
    true
}

/// One player's in-game state as the server reports it.
///
/// `snake` is the ordered body segment sequence, head first. A dead player's
/// segments are frozen until the server drops the player from the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Server-assigned session id. May differ from `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<PlayerId>,
    pub name: String,
    #[serde(default = "default_player_color")]
    pub color: String,
    #[serde(default)]
    pub snake: Vec<Position>,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub score: u32,
    #[serde(default = "default_alive")]
    pub alive: bool,
    /// Best score reached so far in this session, if the server tracks it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_score: Option<u32>,
}

impl Player {
    /// Head segment position, if the player has any body at all.
    pub fn head(&self) -> Option<Position> {
        self.snake.first().copied()
    }
}

/// A lobby room snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub room_id: RoomId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_name: Option<String>,
    pub host: String,
    #[serde(default)]
    pub game_mode: GameMode,
    pub max_players: u32,
    /// Current members in join order. Membership is unique.
    #[serde(default)]
    pub current_players: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_score: Option<u32>,
    #[serde(default)]
    pub powerups: bool,
    #[serde(default)]
    pub status: GameStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teams: Option<HashMap<String, TeamInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_to_team: Option<HashMap<String, String>>,
}

impl Room {
    /// Returns `true` when the room cannot accept further joins.
    pub fn is_full(&self) -> bool {
        self.current_players.len() as u32 >= self.max_players
    }

    /// Returns `true` if `name` is currently a member of this room.
    pub fn has_player(&self, name: &str) -> bool {
        self.current_players.iter().any(|p| p == name)
    }
}

// ── Lobby events ────────────────────────────────────────────────────

/// Room-change events delivered on the lobby topic.
///
/// CREATED/UPDATED/DELETED carry the complete post-change room snapshot,
/// never a diff. JOINED and LEFT are legacy aliases some server versions
/// still emit; both reduce to upsert-by-id, exactly like UPDATED.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomChangeEvent {
    Created {
        room: Room,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    Updated {
        room: Room,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    Joined {
        room: Room,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    Left {
        room: Room,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    Deleted {
        room: Room,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    Cleared,
}

// ── Game events ─────────────────────────────────────────────────────

/// Game events delivered on a per-room game topic.
///
/// `board` payloads are kept as raw JSON here; shape adaptation (the server
/// serializes boards in two incompatible shapes) happens in the game
/// reconciler so that one malformed board degrades to a safe empty snapshot
/// instead of failing the event parse.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum GameEvent {
    /// The match started; carries the initial board.
    Start {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        board: Option<serde_json::Value>,
    },
    /// Periodic full board replacement.
    Update {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        board: Option<serde_json::Value>,
    },
    /// Lightweight score-only event; replaces the player list, not the board.
    ScoreUpdate {
        players: Vec<Player>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player_id: Option<PlayerId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        points_gained: Option<u32>,
    },
    /// The match is over; may carry the final standings.
    GameEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        players: Option<Vec<Player>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Legacy end marker emitted by older server versions.
    End {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Collision {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player_id: Option<PlayerId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Fruit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player_id: Option<PlayerId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        points_gained: Option<u32>,
    },
    PlayerJoin {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player_name: Option<String>,
    },
    PlayerLeave {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player_name: Option<String>,
    },
}

// ── Board payload shapes ────────────────────────────────────────────

/// Board serialized as a flat players array.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerListBoard {
    #[serde(default)]
    pub room_id: Option<RoomId>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    pub players: Vec<Player>,
    #[serde(default, alias = "food")]
    pub fruits: Vec<Position>,
    #[serde(default)]
    pub status: Option<GameStatus>,
    #[serde(default)]
    pub game_mode: Option<GameMode>,
    #[serde(default)]
    pub teams: Option<HashMap<String, TeamInfo>>,
    #[serde(default)]
    pub player_to_team: Option<HashMap<String, String>>,
    #[serde(default)]
    pub target_score: Option<u32>,
}

/// Board serialized as parallel per-player tables keyed by player id.
///
/// `snake_positions` is ordered (BTreeMap) so that adaptation yields a
/// deterministic player order regardless of the server's map iteration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerTableBoard {
    #[serde(default)]
    pub room_id: Option<RoomId>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    pub snake_positions: BTreeMap<PlayerId, Vec<Position>>,
    pub snake_directions: HashMap<PlayerId, Direction>,
    #[serde(default)]
    pub player_colors: HashMap<PlayerId, String>,
    #[serde(default)]
    pub player_scores: HashMap<PlayerId, u32>,
    #[serde(default)]
    pub player_alive: HashMap<PlayerId, bool>,
    #[serde(default, alias = "food")]
    pub fruits: Vec<Position>,
    #[serde(default)]
    pub status: Option<GameStatus>,
}

/// The two board shapes the server emits, without a discriminator field.
///
/// Shape sniffing: a body with a `players` array parses as
/// [`PlayerListBoard`]; a body with `snakePositions`/`snakeDirections`
/// tables parses as [`PlayerTableBoard`]. The inconsistent serialization is
/// a known server-side quirk, tolerated here rather than assumed fixed.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BoardPayload {
    Players(PlayerListBoard),
    Tables(PlayerTableBoard),
}

// ── Outbound payloads ───────────────────────────────────────────────

/// Body published to a room's submit-move destination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MoveCommand {
    /// Identity of the moving player, as resolved locally.
    pub player: PlayerId,
    pub direction: Direction,
}

// ── Connection frames ───────────────────────────────────────────────

/// Frames sent from client to server on the persistent connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum ClientFrame {
    /// Open a subscription on a topic.
    Subscribe { topic: String },
    /// Drop the subscription on a topic.
    Unsubscribe { topic: String },
    /// Publish a JSON body to a destination.
    Send {
        destination: String,
        body: serde_json::Value,
    },
}

/// Frames delivered from server to client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum ServerFrame {
    /// A message on a subscribed topic.
    Message {
        topic: String,
        body: serde_json::Value,
    },
    /// Server-side protocol error. Surfaced via the error callback; never
    /// tears down the connection by itself.
    Error { message: String },
}

// ── Topic namespace ─────────────────────────────────────────────────

/// Deterministic topic and destination names.
///
/// Case-sensitive; room ids are embedded verbatim.
pub mod topics {
    /// Lobby-wide room change events.
    pub const LOBBY: &str = "/topic/lobby";

    /// Game events for one room.
    pub fn game(room_id: &str) -> String {
        format!("/topic/game/{room_id}")
    }

    /// Destination for submitting a move in a room.
    pub fn submit_move(room_id: &str) -> String {
        format!("/app/room/{room_id}/move")
    }

    /// Destination that triggers the match start for a room.
    pub fn start_game(room_id: &str) -> String {
        format!("/app/room/{room_id}/start")
    }
}
