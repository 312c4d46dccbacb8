//! Input controller: gates raw directional input before it goes upstream.
//!
//! Raw input arrives many times per second (key repeat, per-frame sampling).
//! A move is forwarded to the server only when the game is running, the
//! local player is alive, the move is not an instant self-kill, and the
//! rate limit allows it. Everything else is silently dropped — rapid
//! invalid key-repeat is normal behavior, not a fault.

use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use tracing::{debug, error, trace};

use crate::connection::ConnectionManager;
use crate::game::GameReconciler;
use crate::protocol::{topics, Direction, GameStatus, MoveCommand, PlayerId, RoomId};

/// Minimum interval between two accepted moves in the same direction.
pub const DEFAULT_MIN_MOVE_INTERVAL: Duration = Duration::from_millis(150);

/// Tuning knobs for move acceptance.
///
/// The throttle constant is carried over from the original game; whether it
/// should vary per game mode is an open configuration point, hence a config
/// struct rather than a bare constant.
#[derive(Debug, Clone)]
pub struct InputConfig {
    /// Repeating the same direction faster than this is dropped. Changing
    /// direction is never throttled.
    pub min_move_interval: Duration,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            min_move_interval: DEFAULT_MIN_MOVE_INTERVAL,
        }
    }
}

#[derive(Default)]
struct InputState {
    last_direction: Option<Direction>,
    last_accepted_at: Option<Instant>,
}

/// Validates and forwards directional input for one player in one room.
pub struct InputController {
    manager: ConnectionManager,
    game: GameReconciler,
    room_id: RoomId,
    player: PlayerId,
    config: InputConfig,
    state: StdMutex<InputState>,
}

impl InputController {
    /// Create a controller publishing moves for `player` in `room_id`,
    /// consulting `game` for move legality.
    pub fn new(
        manager: ConnectionManager,
        game: GameReconciler,
        room_id: impl Into<RoomId>,
        player: impl Into<PlayerId>,
    ) -> Self {
        Self {
            manager,
            game,
            room_id: room_id.into(),
            player: player.into(),
            config: InputConfig::default(),
            state: StdMutex::new(InputState::default()),
        }
    }

    /// Replace the acceptance configuration.
    #[must_use]
    pub fn with_config(mut self, config: InputConfig) -> Self {
        self.config = config;
        self
    }

    /// Feed one raw input sample. Accepted moves are published to the
    /// room's move destination; rejected samples are dropped without error.
    pub fn on_direction(&self, direction: Direction) {
        self.on_direction_at(direction, Instant::now());
    }

    fn on_direction_at(&self, direction: Direction, now: Instant) {
        if self.game.status() != GameStatus::InGame {
            trace!(?direction, "input dropped: game not running");
            return;
        }
        let Some(local) = self.game.local_player() else {
            trace!(?direction, "input dropped: local player not in snapshot");
            return;
        };
        if !local.alive {
            trace!(?direction, "input dropped: local player dead");
            return;
        }
        if direction.is_opposite(local.direction) {
            trace!(?direction, facing = ?local.direction, "input dropped: reversal");
            return;
        }
        {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if let (Some(last_direction), Some(last_at)) =
                (state.last_direction, state.last_accepted_at)
            {
                // Repeats are throttled; a direction change goes out at once.
                if direction == last_direction
                    && now.duration_since(last_at) < self.config.min_move_interval
                {
                    trace!(?direction, "input dropped: throttled repeat");
                    return;
                }
            }
            state.last_direction = Some(direction);
            state.last_accepted_at = Some(now);
        }

        let command = MoveCommand {
            player: self.player.clone(),
            direction,
        };
        match serde_json::to_value(&command) {
            Ok(body) => {
                debug!(?direction, room_id = %self.room_id, "forwarding move");
                self.manager.publish(topics::submit_move(&self.room_id), body);
            }
            Err(e) => error!("failed to serialize move command: {e}"),
        }
    }
}

impl std::fmt::Debug for InputController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputController")
            .field("room_id", &self.room_id)
            .field("player", &self.player)
            .finish()
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
    use crate::error::SerpentiaError;
    use crate::protocol::{ClientFrame, GameEvent, Player, Position, DEFAULT_PLAYER_COLOR};
    use crate::transport::Transport;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex as StdMutex};

    /// Records sent frames and never yields incoming traffic.
    struct RecordingTransport {
        sent: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&mut self, frame: String) -> Result<(), SerpentiaError> {
            self.sent.lock().unwrap().push(frame);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String, SerpentiaError>> {
            std::future::pending().await
        }

        async fn close(&mut self) -> Result<(), SerpentiaError> {
            Ok(())
        }
    }

    fn running_player(name: &str, direction: Direction, alive: bool) -> Player {
        Player {
            id: Some(name.to_string()),
            name: name.to_string(),
            color: DEFAULT_PLAYER_COLOR.to_string(),
            snake: vec![Position { x: 3, y: 3 }],
            direction,
            score: 0,
            alive,
            max_score: None,
        }
    }

    /// Connected manager + reconciler with an IN_GAME board where the local
    /// player "alice" faces `facing`.
    async fn running_setup(
        facing: Direction,
        alive: bool,
    ) -> (InputController, Arc<StdMutex<Vec<String>>>) {
        let manager = ConnectionManager::new();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let transport = RecordingTransport {
            sent: Arc::clone(&sent),
        };
        manager.connect(|| async { Ok(transport) }).await;

        let game = GameReconciler::new("alice");
        game.set_room("G1");
        let board = serde_json::json!({
            "width": 40,
            "height": 30,
            "players": [serde_json::to_value(running_player("alice", facing, alive)).unwrap()],
            "fruits": []
        });
        game.apply_event(GameEvent::Start { board: Some(board) });
        assert_eq!(game.status(), GameStatus::InGame);

        let controller = InputController::new(manager, game, "G1", "alice");
        (controller, sent)
    }

    async fn forwarded_moves(sent: &Arc<StdMutex<Vec<String>>>) -> Vec<MoveCommand> {
        // Give the transport loop a moment to drain the frame channel.
        tokio::time::sleep(Duration::from_millis(50)).await;
        sent.lock()
            .unwrap()
            .iter()
            .filter_map(|s| match serde_json::from_str::<ClientFrame>(s) {
                Ok(ClientFrame::Send { destination, body }) => {
                    assert_eq!(destination, "/app/room/G1/move");
                    Some(serde_json::from_value::<MoveCommand>(body).unwrap())
                }
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn same_direction_repeat_is_throttled() {
        let (controller, sent) = running_setup(Direction::Right, true).await;
        let t0 = Instant::now();

        controller.on_direction_at(Direction::Up, t0);
        controller.on_direction_at(Direction::Up, t0 + Duration::from_millis(100));

        let moves = forwarded_moves(&sent).await;
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].direction, Direction::Up);
    }

    #[tokio::test]
    async fn same_direction_after_interval_is_forwarded() {
        let (controller, sent) = running_setup(Direction::Right, true).await;
        let t0 = Instant::now();

        controller.on_direction_at(Direction::Up, t0);
        controller.on_direction_at(Direction::Up, t0 + Duration::from_millis(160));

        assert_eq!(forwarded_moves(&sent).await.len(), 2);
    }

    #[tokio::test]
    async fn direction_change_is_never_throttled() {
        let (controller, sent) = running_setup(Direction::Right, true).await;
        let t0 = Instant::now();

        controller.on_direction_at(Direction::Up, t0);
        controller.on_direction_at(Direction::Right, t0 + Duration::from_millis(10));

        let moves = forwarded_moves(&sent).await;
        assert_eq!(moves.len(), 2);
        assert_eq!(moves[1].direction, Direction::Right);
    }

    #[tokio::test]
    async fn reversal_is_rejected_but_turns_pass() {
        // Facing RIGHT: LEFT is an instant self-collision, UP/DOWN are fine.
        let (controller, sent) = running_setup(Direction::Right, true).await;
        let t0 = Instant::now();

        controller.on_direction_at(Direction::Left, t0);
        controller.on_direction_at(Direction::Up, t0 + Duration::from_millis(1));
        controller.on_direction_at(Direction::Down, t0 + Duration::from_millis(2));

        let moves = forwarded_moves(&sent).await;
        let directions: Vec<Direction> = moves.iter().map(|m| m.direction).collect();
        assert_eq!(directions, vec![Direction::Up, Direction::Down]);
    }

    #[tokio::test]
    async fn input_outside_in_game_is_dropped() {
        let manager = ConnectionManager::new();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let transport = RecordingTransport {
            sent: Arc::clone(&sent),
        };
        manager.connect(|| async { Ok(transport) }).await;

        let game = GameReconciler::new("alice");
        game.set_room("G1"); // still WAITING
        let controller = InputController::new(manager, game, "G1", "alice");

        controller.on_direction_at(Direction::Up, Instant::now());
        assert!(forwarded_moves(&sent).await.is_empty());
    }

    #[tokio::test]
    async fn dead_player_cannot_move() {
        let (controller, sent) = running_setup(Direction::Right, false).await;
        controller.on_direction_at(Direction::Up, Instant::now());
        assert!(forwarded_moves(&sent).await.is_empty());
    }

    #[tokio::test]
    async fn move_carries_player_identity() {
        let (controller, sent) = running_setup(Direction::Right, true).await;
        controller.on_direction_at(Direction::Up, Instant::now());

        let moves = forwarded_moves(&sent).await;
        assert_eq!(moves[0].player, "alice");
    }

    #[tokio::test]
    async fn custom_interval_is_respected() {
        let (controller, sent) = running_setup(Direction::Right, true).await;
        let controller = controller.with_config(InputConfig {
            min_move_interval: Duration::from_millis(20),
        });
        let t0 = Instant::now();

        controller.on_direction_at(Direction::Up, t0);
        controller.on_direction_at(Direction::Up, t0 + Duration::from_millis(25));

        assert_eq!(forwarded_moves(&sent).await.len(), 2);
    }
}
