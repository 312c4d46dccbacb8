//! Game state reconciler: folds game-topic events into one board snapshot.
//!
//! The server serializes boards in two incompatible shapes (a flat players
//! array, or parallel per-player tables keyed by player id) with no
//! discriminator field. Everything entering this module is normalized into
//! the canonical [`Player`] list before it replaces the snapshot — the
//! snapshot is always a complete replacement, never a field-by-field patch.
//!
//! One reconciler tracks one room at a time; a new game requires a fresh
//! binding via [`GameReconciler::set_room`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::connection::{ConnectionManager, SubscriptionHandle};
use crate::protocol::{
    topics, BoardPayload, GameEvent, GameMode, GameStatus, Player, Position, RoomId, TeamInfo,
    DEFAULT_PLAYER_COLOR,
};

/// Board width assumed when the server omits geometry.
pub const DEFAULT_BOARD_WIDTH: u32 = 40;
/// Board height assumed when the server omits geometry.
pub const DEFAULT_BOARD_HEIGHT: u32 = 30;

/// Callback invoked with the new snapshot after every applied change.
pub type SnapshotListener = Arc<dyn Fn(&GameSnapshot) + Send + Sync>;

// ── Snapshot ────────────────────────────────────────────────────────

/// Complete, self-consistent state of one game board.
#[derive(Debug, Clone, PartialEq)]
pub struct GameSnapshot {
    pub room_id: RoomId,
    pub width: u32,
    pub height: u32,
    /// All players, canonical shape. Replaced wholesale on every update.
    pub players: Vec<Player>,
    pub fruits: Vec<Position>,
    pub status: GameStatus,
    pub game_mode: Option<GameMode>,
    pub teams: Option<std::collections::HashMap<String, TeamInfo>>,
    pub target_score: Option<u32>,
}

impl GameSnapshot {
    /// The safe empty board: zero players, zero fruits, WAITING.
    pub fn empty(room_id: impl Into<RoomId>) -> Self {
        Self {
            room_id: room_id.into(),
            width: DEFAULT_BOARD_WIDTH,
            height: DEFAULT_BOARD_HEIGHT,
            players: Vec::new(),
            fruits: Vec::new(),
            status: GameStatus::Waiting,
            game_mode: None,
            teams: None,
            target_score: None,
        }
    }
}

// ── Shape adaptation ────────────────────────────────────────────────

/// Board fields extracted from either wire shape, before the status state
/// machine decides what to keep.
struct AdaptedBoard {
    width: u32,
    height: u32,
    players: Vec<Player>,
    fruits: Vec<Position>,
    game_mode: Option<GameMode>,
    teams: Option<std::collections::HashMap<String, TeamInfo>>,
    target_score: Option<u32>,
}

/// Normalize a raw board payload into the canonical player-list shape.
///
/// Missing optional per-player fields take fixed defaults: score 0, alive
/// true, color [`DEFAULT_PLAYER_COLOR`]. Returns an error only when the
/// payload matches neither shape.
fn adapt_board(raw: &Value) -> Result<AdaptedBoard, serde_json::Error> {
    let payload: BoardPayload = serde_json::from_value(raw.clone())?;
    Ok(match payload {
        BoardPayload::Players(board) => AdaptedBoard {
            width: board.width.unwrap_or(DEFAULT_BOARD_WIDTH),
            height: board.height.unwrap_or(DEFAULT_BOARD_HEIGHT),
            players: board.players,
            fruits: board.fruits,
            game_mode: board.game_mode,
            teams: board.teams,
            target_score: board.target_score,
        },
        BoardPayload::Tables(board) => {
            let players = board
                .snake_positions
                .into_iter()
                .map(|(id, snake)| Player {
                    direction: board.snake_directions.get(&id).copied().unwrap_or_default(),
                    color: board
                        .player_colors
                        .get(&id)
                        .cloned()
                        .unwrap_or_else(|| DEFAULT_PLAYER_COLOR.to_string()),
                    score: board.player_scores.get(&id).copied().unwrap_or(0),
                    alive: board.player_alive.get(&id).copied().unwrap_or(true),
                    name: id.clone(),
                    id: Some(id),
                    snake,
                    max_score: None,
                })
                .collect();
            AdaptedBoard {
                width: board.width.unwrap_or(DEFAULT_BOARD_WIDTH),
                height: board.height.unwrap_or(DEFAULT_BOARD_HEIGHT),
                players,
                fruits: board.fruits,
                game_mode: None,
                teams: None,
                target_score: None,
            }
        }
    })
}

// ── Reconciler ──────────────────────────────────────────────────────

struct GameState {
    /// Identity of the user of this client, as configured locally. The
    /// server may know the same player under a different session id.
    local_id: String,
    snapshot: GameSnapshot,
    listeners: Vec<(Uuid, SnapshotListener)>,
}

/// Maintains the authoritative board snapshot for one room of interest.
///
/// Cheap to clone; all clones share the same snapshot and listeners.
#[derive(Clone)]
pub struct GameReconciler {
    inner: Arc<StdMutex<GameState>>,
}

impl GameReconciler {
    /// Create a reconciler for the user identified by `local_player_id`
    /// (typically the value from [`crate::identity::user_id_from_token`]).
    pub fn new(local_player_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(StdMutex::new(GameState {
                local_id: local_player_id.into(),
                snapshot: GameSnapshot::empty(""),
                listeners: Vec::new(),
            })),
        }
    }

    /// Re-point the local identity, e.g. after the server assigns a session
    /// id that differs from the display name.
    pub fn set_local_player_id(&self, id: impl Into<String>) {
        if let Ok(mut state) = self.inner.lock() {
            state.local_id = id.into();
        }
    }

    /// Bind the reconciler to a room, resetting to the empty WAITING board.
    ///
    /// A FINISHED game never transitions again; observing another match
    /// means binding again through this method.
    pub fn set_room(&self, room_id: impl Into<RoomId>) {
        let room_id = room_id.into();
        self.mutate(move |snapshot| {
            *snapshot = GameSnapshot::empty(room_id);
            true
        });
    }

    /// Current snapshot (an independent copy).
    pub fn snapshot(&self) -> GameSnapshot {
        self.inner
            .lock()
            .map(|s| s.snapshot.clone())
            .unwrap_or_else(|_| GameSnapshot::empty(""))
    }

    /// Current status without copying the full snapshot.
    pub fn status(&self) -> GameStatus {
        self.inner
            .lock()
            .map(|s| s.snapshot.status)
            .unwrap_or_default()
    }

    /// Resolve the local player inside the current snapshot.
    ///
    /// Fallback order: exact id match against the configured local id, then
    /// name match, then the first player in the list. The chain is required
    /// because the server may assign a session id that differs from the
    /// display name used locally.
    pub fn local_player(&self) -> Option<Player> {
        let state = self.inner.lock().ok()?;
        let players = &state.snapshot.players;
        players
            .iter()
            .find(|p| p.id.as_deref() == Some(state.local_id.as_str()))
            .or_else(|| players.iter().find(|p| p.name == state.local_id))
            .or_else(|| players.first())
            .cloned()
    }

    /// Players ranked by descending score; ties keep list order (stable).
    pub fn leaderboard(&self) -> Vec<Player> {
        let mut players = self
            .inner
            .lock()
            .map(|s| s.snapshot.players.clone())
            .unwrap_or_default();
        players.sort_by(|a, b| b.score.cmp(&a.score));
        players
    }

    /// Fold one game event into the snapshot.
    ///
    /// Status state machine: WAITING → IN_GAME on a START carrying a board,
    /// IN_GAME → FINISHED on END/GAME_END. Nothing transitions out of
    /// FINISHED; every event after it is dropped.
    pub fn apply_event(&self, event: GameEvent) {
        self.mutate(|snapshot| {
            if snapshot.status == GameStatus::Finished {
                debug!("event after FINISHED dropped");
                return false;
            }
            match event {
                GameEvent::Start { board: Some(raw) } => {
                    // Only a successfully adapted board starts the match;
                    // a malformed one leaves the state machine in WAITING.
                    if replace_from_raw(snapshot, &raw) && snapshot.status == GameStatus::Waiting {
                        snapshot.status = GameStatus::InGame;
                    }
                    true
                }
                GameEvent::Start { board: None } => {
                    warn!("START without a board ignored");
                    false
                }
                GameEvent::Update { board: Some(raw) } => {
                    replace_from_raw(snapshot, &raw);
                    true
                }
                GameEvent::Update { board: None } => {
                    debug!("UPDATE without a board ignored");
                    false
                }
                GameEvent::ScoreUpdate { players, .. } => {
                    snapshot.players = players;
                    true
                }
                GameEvent::GameEnd { players, .. } => {
                    if let Some(players) = players {
                        snapshot.players = players;
                    }
                    finish(snapshot)
                }
                GameEvent::End { .. } => finish(snapshot),
                GameEvent::Collision { player_id, .. } => {
                    debug!(?player_id, "collision event (board arrives separately)");
                    false
                }
                GameEvent::Fruit { player_id, .. } => {
                    debug!(?player_id, "fruit event (board arrives separately)");
                    false
                }
                GameEvent::PlayerJoin { player_name } => {
                    debug!(?player_name, "player joined");
                    false
                }
                GameEvent::PlayerLeave { player_name } => {
                    debug!(?player_name, "player left");
                    false
                }
            }
        });
    }

    /// Shape-adapt a raw board payload and replace the snapshot with it,
    /// keeping the current status and room binding.
    ///
    /// A payload matching neither shape resets to the empty WAITING board
    /// instead of failing — one bad message must not poison the
    /// UI-observable state.
    pub fn apply_server_snapshot(&self, raw: &Value) {
        self.mutate(|snapshot| {
            replace_from_raw(snapshot, raw);
            true
        });
    }

    /// Replace only the player list, leaving board geometry untouched. Used
    /// for lightweight score-only events that carry no board.
    pub fn apply_score_delta(&self, players: Vec<Player>) {
        self.mutate(move |snapshot| {
            snapshot.players = players;
            true
        });
    }

    /// Register a listener for snapshot changes.
    pub fn add_listener(
        &self,
        listener: impl Fn(&GameSnapshot) + Send + Sync + 'static,
    ) -> SnapshotListenerHandle {
        let id = Uuid::new_v4();
        if let Ok(mut state) = self.inner.lock() {
            state.listeners.push((id, Arc::new(listener)));
        }
        SnapshotListenerHandle {
            inner: Arc::downgrade(&self.inner),
            id,
            disposed: AtomicBool::new(false),
        }
    }

    /// Bind to `room_id` and wire this reconciler to its game topic.
    ///
    /// A game-topic message that does not parse as a [`GameEvent`] resets to
    /// the empty WAITING board (the room binding survives).
    pub fn subscribe(
        &self,
        manager: &ConnectionManager,
        room_id: impl Into<RoomId>,
    ) -> SubscriptionHandle {
        let room_id = room_id.into();
        self.set_room(room_id.clone());
        let reconciler = self.clone();
        manager.subscribe(topics::game(&room_id), move |body| {
            match serde_json::from_value::<GameEvent>(body.clone()) {
                Ok(event) => reconciler.apply_event(event),
                Err(e) => {
                    warn!("malformed game event, resetting to safe snapshot: {e}");
                    reconciler.mutate(|snapshot| {
                        *snapshot = GameSnapshot::empty(snapshot.room_id.clone());
                        true
                    });
                }
            }
        })
    }

    /// Run `f` on the snapshot under the lock; notify listeners outside the
    /// lock when `f` reports a change.
    fn mutate(&self, f: impl FnOnce(&mut GameSnapshot) -> bool) {
        let notified = {
            let Ok(mut state) = self.inner.lock() else {
                return;
            };
            if f(&mut state.snapshot) {
                Some((state.snapshot.clone(), state.listeners.clone()))
            } else {
                None
            }
        };
        if let Some((snapshot, listeners)) = notified {
            for (_, listener) in &listeners {
                listener(&snapshot);
            }
        }
    }
}

impl std::fmt::Debug for GameReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (room, status) = self
            .inner
            .lock()
            .map(|s| (s.snapshot.room_id.clone(), s.snapshot.status))
            .unwrap_or_else(|_| (String::new(), GameStatus::Waiting));
        f.debug_struct("GameReconciler")
            .field("room_id", &room)
            .field("status", &status)
            .finish()
    }
}

/// IN_GAME → FINISHED; any other source state is left alone.
fn finish(snapshot: &mut GameSnapshot) -> bool {
    if snapshot.status == GameStatus::InGame {
        snapshot.status = GameStatus::Finished;
        true
    } else {
        debug!(status = ?snapshot.status, "end event outside IN_GAME ignored");
        false
    }
}

/// Replace board contents from a raw payload, preserving status and room
/// binding; fall back to the empty board when the payload is malformed.
///
/// Returns `true` when the payload adapted cleanly.
fn replace_from_raw(snapshot: &mut GameSnapshot, raw: &Value) -> bool {
    match adapt_board(raw) {
        Ok(board) => {
            snapshot.width = board.width;
            snapshot.height = board.height;
            snapshot.players = board.players;
            snapshot.fruits = board.fruits;
            snapshot.game_mode = board.game_mode.or(snapshot.game_mode);
            if board.teams.is_some() {
                snapshot.teams = board.teams;
            }
            snapshot.target_score = board.target_score.or(snapshot.target_score);
            true
        }
        Err(e) => {
            warn!("unrecognized board shape, falling back to empty board: {e}");
            *snapshot = GameSnapshot::empty(snapshot.room_id.clone());
            false
        }
    }
}

/// Disposer for one snapshot listener. Removing twice is a no-op.
pub struct SnapshotListenerHandle {
    inner: Weak<StdMutex<GameState>>,
    id: Uuid,
    disposed: AtomicBool,
}

impl SnapshotListenerHandle {
    /// Remove the listener; future changes are no longer delivered.
    pub fn remove(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let locked = inner.lock();
        if let Ok(mut state) = locked {
            state.listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn player(name: &str, score: u32, alive: bool, direction: Direction) -> Player {
        Player {
            id: Some(name.to_string()),
            name: name.to_string(),
            color: DEFAULT_PLAYER_COLOR.to_string(),
            snake: vec![Position { x: 1, y: 1 }],
            direction,
            score,
            alive,
            max_score: None,
        }
    }

    use crate::protocol::Direction;

    fn list_board() -> Value {
        json!({
            "roomId": "G1",
            "width": 40,
            "height": 30,
            "players": [
                {
                    "id": "alice", "name": "alice", "color": "#4CAF50",
                    "snake": [{"x": 1, "y": 1}], "direction": "UP",
                    "score": 0, "alive": true
                },
                {
                    "id": "bob", "name": "bob", "color": "#4CAF50",
                    "snake": [{"x": 5, "y": 5}], "direction": "DOWN",
                    "score": 3, "alive": true
                }
            ],
            "fruits": [{"x": 9, "y": 9}],
            "status": "IN_GAME"
        })
    }

    /// Same board as [`list_board`], in the parallel-tables shape.
    fn table_board() -> Value {
        json!({
            "roomId": "G1",
            "width": 40,
            "height": 30,
            "snakePositions": {
                "alice": [{"x": 1, "y": 1}],
                "bob": [{"x": 5, "y": 5}]
            },
            "snakeDirections": { "alice": "UP", "bob": "DOWN" },
            "playerScores": { "bob": 3 },
            "playerAlive": {},
            "fruits": [{"x": 9, "y": 9}],
            "status": "IN_GAME"
        })
    }

    fn started(reconciler: &GameReconciler, board: Value) {
        reconciler.apply_event(GameEvent::Start { board: Some(board) });
    }

    #[test]
    fn both_board_shapes_adapt_to_identical_players() {
        let from_list = adapt_board(&list_board()).unwrap();
        let from_tables = adapt_board(&table_board()).unwrap();
        assert_eq!(from_list.players, from_tables.players);
        assert_eq!(from_list.fruits, from_tables.fruits);
        assert_eq!(from_list.width, from_tables.width);
        assert_eq!(from_list.height, from_tables.height);
    }

    #[test]
    fn table_shape_fills_fixed_defaults() {
        let board = adapt_board(&json!({
            "snakePositions": { "solo": [{"x": 0, "y": 0}] },
            "snakeDirections": { "solo": "LEFT" }
        }))
        .unwrap();
        let solo = &board.players[0];
        assert_eq!(solo.score, 0);
        assert!(solo.alive);
        assert_eq!(solo.color, DEFAULT_PLAYER_COLOR);
        assert_eq!(board.width, DEFAULT_BOARD_WIDTH);
        assert_eq!(board.height, DEFAULT_BOARD_HEIGHT);
    }

    #[test]
    fn fruits_accepted_under_food_alias() {
        let board = adapt_board(&json!({
            "players": [],
            "food": [{"x": 2, "y": 3}]
        }))
        .unwrap();
        assert_eq!(board.fruits, vec![Position { x: 2, y: 3 }]);
    }

    #[test]
    fn start_transitions_waiting_to_in_game() {
        let reconciler = GameReconciler::new("alice");
        reconciler.set_room("G1");
        assert_eq!(reconciler.snapshot().status, GameStatus::Waiting);

        started(&reconciler, list_board());
        let snapshot = reconciler.snapshot();
        assert_eq!(snapshot.status, GameStatus::InGame);
        assert_eq!(snapshot.players.len(), 2);
        assert_eq!(snapshot.room_id, "G1", "binding survives board payloads");
    }

    #[test]
    fn start_without_board_does_not_transition() {
        let reconciler = GameReconciler::new("alice");
        reconciler.set_room("G1");
        reconciler.apply_event(GameEvent::Start { board: None });
        assert_eq!(reconciler.snapshot().status, GameStatus::Waiting);
    }

    #[test]
    fn end_transitions_in_game_to_finished_and_locks() {
        let reconciler = GameReconciler::new("alice");
        reconciler.set_room("G1");
        started(&reconciler, list_board());

        reconciler.apply_event(GameEvent::End { message: None });
        assert_eq!(reconciler.snapshot().status, GameStatus::Finished);

        // FINISHED is terminal: later events change nothing.
        started(&reconciler, list_board());
        reconciler.apply_event(GameEvent::ScoreUpdate {
            players: vec![player("mallory", 99, true, Direction::Up)],
            player_id: None,
            points_gained: None,
        });
        let snapshot = reconciler.snapshot();
        assert_eq!(snapshot.status, GameStatus::Finished);
        assert!(snapshot.players.iter().all(|p| p.name != "mallory"));

        // A fresh binding starts a new state machine.
        reconciler.set_room("G2");
        assert_eq!(reconciler.snapshot().status, GameStatus::Waiting);
    }

    #[test]
    fn game_end_applies_final_standings() {
        let reconciler = GameReconciler::new("alice");
        reconciler.set_room("G1");
        started(&reconciler, list_board());

        reconciler.apply_event(GameEvent::GameEnd {
            players: Some(vec![player("bob", 10, false, Direction::Down)]),
            message: Some("bob wins".into()),
        });
        let snapshot = reconciler.snapshot();
        assert_eq!(snapshot.status, GameStatus::Finished);
        assert_eq!(snapshot.players.len(), 1);
        assert_eq!(snapshot.players[0].score, 10);
    }

    #[test]
    fn end_while_waiting_is_ignored() {
        let reconciler = GameReconciler::new("alice");
        reconciler.set_room("G1");
        reconciler.apply_event(GameEvent::End { message: None });
        assert_eq!(reconciler.snapshot().status, GameStatus::Waiting);
    }

    #[test]
    fn update_preserves_status() {
        let reconciler = GameReconciler::new("alice");
        reconciler.set_room("G1");
        started(&reconciler, list_board());

        reconciler.apply_event(GameEvent::Update {
            board: Some(table_board()),
        });
        assert_eq!(reconciler.snapshot().status, GameStatus::InGame);
    }

    #[test]
    fn malformed_board_falls_back_to_empty() {
        let reconciler = GameReconciler::new("alice");
        reconciler.set_room("G1");
        started(&reconciler, list_board());

        reconciler.apply_server_snapshot(&json!({"bogus": true}));
        let snapshot = reconciler.snapshot();
        assert_eq!(snapshot.players, Vec::<Player>::new());
        assert_eq!(snapshot.fruits, Vec::<Position>::new());
        assert_eq!(snapshot.status, GameStatus::Waiting);
        assert_eq!(snapshot.room_id, "G1", "room binding survives");
    }

    #[test]
    fn score_delta_replaces_players_not_geometry() {
        let reconciler = GameReconciler::new("alice");
        reconciler.set_room("G1");
        started(&reconciler, list_board());
        let before = reconciler.snapshot();

        reconciler.apply_score_delta(vec![
            player("alice", 7, true, Direction::Up),
            player("bob", 4, true, Direction::Down),
        ]);
        let after = reconciler.snapshot();
        assert_eq!(after.width, before.width);
        assert_eq!(after.height, before.height);
        assert_eq!(after.fruits, before.fruits);
        assert_eq!(after.players[0].score, 7);
    }

    #[test]
    fn local_player_resolves_by_id_then_name_then_first() {
        let reconciler = GameReconciler::new("session-42");
        reconciler.set_room("G1");

        // Exact id match wins.
        reconciler.apply_score_delta(vec![
            Player {
                id: Some("session-42".into()),
                ..player("carol", 1, true, Direction::Up)
            },
            player("alice", 2, true, Direction::Up),
        ]);
        assert_eq!(reconciler.local_player().unwrap().name, "carol");

        // Name match when no id matches (server assigned opaque session ids).
        reconciler.set_local_player_id("alice");
        reconciler.apply_score_delta(vec![
            Player {
                id: Some("sess-1".into()),
                ..player("bob", 1, true, Direction::Up)
            },
            Player {
                id: Some("sess-2".into()),
                ..player("alice", 2, true, Direction::Up)
            },
        ]);
        assert_eq!(reconciler.local_player().unwrap().name, "alice");

        // First player when neither matches.
        reconciler.set_local_player_id("nobody");
        assert_eq!(reconciler.local_player().unwrap().name, "bob");

        // No players at all: nothing to resolve.
        reconciler.apply_score_delta(Vec::new());
        assert!(reconciler.local_player().is_none());
    }

    #[test]
    fn leaderboard_sorts_descending_with_stable_ties() {
        let reconciler = GameReconciler::new("alice");
        reconciler.set_room("G1");
        reconciler.apply_score_delta(vec![
            player("low", 1, true, Direction::Up),
            player("tie-a", 5, true, Direction::Up),
            player("tie-b", 5, false, Direction::Down),
            player("high", 9, true, Direction::Left),
        ]);

        let names: Vec<String> = reconciler
            .leaderboard()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["high", "tie-a", "tie-b", "low"]);
    }

    #[test]
    fn listeners_notified_on_change_and_removable() {
        let reconciler = GameReconciler::new("alice");
        reconciler.set_room("G1");

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = reconciler.add_listener(move |snapshot| {
            sink.lock().unwrap().push(snapshot.status);
        });

        started(&reconciler, list_board());
        // Non-mutating events produce no notification.
        reconciler.apply_event(GameEvent::Collision {
            player_id: Some("bob".into()),
            message: None,
        });
        assert_eq!(*seen.lock().unwrap(), vec![GameStatus::InGame]);

        handle.remove();
        handle.remove(); // idempotent
        reconciler.apply_event(GameEvent::End { message: None });
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
