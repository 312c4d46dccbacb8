#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Shared test utilities for Serpentia client integration tests.
//!
//! Provides a channel-based [`MockTransport`] plus helpers for building the
//! JSON frames the server would deliver on its topics.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use serde_json::Value;
use serpentia_client::protocol::{
    topics, GameEvent, GameMode, GameStatus, Room, RoomChangeEvent, ServerFrame,
};
use serpentia_client::{SerpentiaError, Transport};

// ── MockTransport ───────────────────────────────────────────────────

/// A channel-based mock transport for integration testing.
///
/// Scripted server frames are consumed in order by `recv()`; everything the
/// client sends is recorded in `sent`.
pub struct MockTransport {
    /// Scripted server frames (consumed in order by `recv`).
    incoming: VecDeque<Option<Result<String, SerpentiaError>>>,
    /// Recorded outgoing frames from the client.
    pub sent: Arc<StdMutex<Vec<String>>>,
    /// Whether `close()` has been called.
    pub closed: Arc<AtomicBool>,
}

impl MockTransport {
    /// Create a new mock transport with the given scripted incoming frames.
    ///
    /// Returns the transport plus shared handles for inspecting sent frames
    /// and whether close was called.
    pub fn new(
        incoming: Vec<Option<Result<String, SerpentiaError>>>,
    ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming: VecDeque::from(incoming),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        (transport, sent, closed)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, frame: String) -> Result<(), SerpentiaError> {
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, SerpentiaError>> {
        if let Some(item) = self.incoming.pop_front() {
            item
        } else {
            // No more scripted frames — hang forever so the transport loop
            // stays alive until the manager disconnects.
            std::future::pending().await
        }
    }

    async fn close(&mut self) -> Result<(), SerpentiaError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── Fixture helpers ─────────────────────────────────────────────────

/// A WAITING competitive room with the given members.
pub fn room(id: &str, host: &str, max_players: u32, players: &[&str]) -> Room {
    Room {
        room_id: id.into(),
        room_name: None,
        host: host.into(),
        game_mode: GameMode::Competitive,
        max_players,
        current_players: players.iter().map(|p| p.to_string()).collect(),
        target_score: None,
        powerups: false,
        status: GameStatus::Waiting,
        teams: None,
        player_to_team: None,
    }
}

/// Serialize a [`ServerFrame::Message`] carrying `body` on `topic`.
pub fn message_frame(topic: &str, body: Value) -> String {
    serde_json::to_string(&ServerFrame::Message {
        topic: topic.into(),
        body,
    })
    .expect("message frame serialization")
}

/// A lobby-topic frame carrying one room-change event.
pub fn lobby_frame(event: &RoomChangeEvent) -> String {
    message_frame(
        topics::LOBBY,
        serde_json::to_value(event).expect("lobby event serialization"),
    )
}

/// A game-topic frame carrying one game event for `room_id`.
pub fn game_frame(room_id: &str, event: &GameEvent) -> String {
    message_frame(
        &topics::game(room_id),
        serde_json::to_value(event).expect("game event serialization"),
    )
}

/// A players-array board with every player alive and facing UP.
pub fn board_with_players(players: &[(&str, u32)]) -> Value {
    let players: Vec<Value> = players
        .iter()
        .map(|(name, score)| {
            serde_json::json!({
                "id": name,
                "name": name,
                "color": "#4CAF50",
                "snake": [{"x": 1, "y": 1}],
                "direction": "UP",
                "score": score,
                "alive": true
            })
        })
        .collect();
    serde_json::json!({
        "width": 40,
        "height": 30,
        "players": players,
        "fruits": [],
        "status": "IN_GAME"
    })
}
