#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Lobby collaborator tests: the reconciler against a mock room-CRUD API.
//!
//! The REST side is a black box to the crate; these tests pin down the
//! contract the crate relies on — full-fetch replacement, error
//! propagation, and the server-side capacity check on join.

mod common;

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use serpentia_client::api::{CreateRoomRequest, LobbyApi};
use serpentia_client::error::Result;
use serpentia_client::protocol::{GameMode, Room};
use serpentia_client::{LobbyReconciler, SerpentiaError};

use common::room;

// ── Mock collaborator ───────────────────────────────────────────────

/// In-memory lobby backend enforcing the server's join rules.
struct MockLobbyApi {
    rooms: StdMutex<Vec<Room>>,
    /// Identity attributed to join/leave calls.
    user: String,
}

impl MockLobbyApi {
    fn new(user: &str, rooms: Vec<Room>) -> Self {
        Self {
            rooms: StdMutex::new(rooms),
            user: user.into(),
        }
    }
}

#[async_trait]
impl LobbyApi for MockLobbyApi {
    async fn fetch_rooms(&self) -> Result<Vec<Room>> {
        Ok(self.rooms.lock().unwrap().clone())
    }

    async fn create_room(&self, request: CreateRoomRequest) -> Result<Room> {
        let mut rooms = self.rooms.lock().unwrap();
        if rooms.iter().any(|r| r.room_id == request.room_id) {
            return Err(SerpentiaError::Api {
                status: Some(409),
                message: format!("room {} already exists", request.room_id),
            });
        }
        let mut created = room(&request.room_id, &request.host, request.max_players, &[]);
        created.game_mode = request.game_mode;
        created.target_score = request.target_score;
        created.powerups = request.powerups;
        created.current_players.push(request.host.clone());
        rooms.push(created.clone());
        Ok(created)
    }

    async fn join_room(&self, room_id: &str) -> Result<Room> {
        let mut rooms = self.rooms.lock().unwrap();
        let Some(slot) = rooms.iter_mut().find(|r| r.room_id == room_id) else {
            return Err(SerpentiaError::Api {
                status: Some(404),
                message: format!("room {room_id} not found"),
            });
        };
        // The capacity invariant is enforced here, at the collaborator
        // layer: a full room rejects the join instead of overfilling.
        if slot.is_full() {
            return Err(SerpentiaError::Api {
                status: Some(409),
                message: format!("room {room_id} is full"),
            });
        }
        if !slot.has_player(&self.user) {
            slot.current_players.push(self.user.clone());
        }
        Ok(slot.clone())
    }

    async fn leave_room(&self, room_id: &str) -> Result<()> {
        let mut rooms = self.rooms.lock().unwrap();
        if let Some(slot) = rooms.iter_mut().find(|r| r.room_id == room_id) {
            slot.current_players.retain(|p| p != &self.user);
        }
        Ok(())
    }

    async fn start_game(&self, room_id: &str) -> Result<()> {
        let rooms = self.rooms.lock().unwrap();
        match rooms.iter().find(|r| r.room_id == room_id) {
            Some(_) => Ok(()),
            None => Err(SerpentiaError::Api {
                status: Some(404),
                message: format!("room {room_id} not found"),
            }),
        }
    }
}

/// Collaborator that always fails, for error-propagation tests.
struct FailingLobbyApi;

#[async_trait]
impl LobbyApi for FailingLobbyApi {
    async fn fetch_rooms(&self) -> Result<Vec<Room>> {
        Err(SerpentiaError::Api {
            status: Some(503),
            message: "service unavailable".into(),
        })
    }

    async fn create_room(&self, _request: CreateRoomRequest) -> Result<Room> {
        Err(SerpentiaError::Api {
            status: Some(503),
            message: "service unavailable".into(),
        })
    }

    async fn join_room(&self, _room_id: &str) -> Result<Room> {
        Err(SerpentiaError::Api {
            status: Some(503),
            message: "service unavailable".into(),
        })
    }

    async fn leave_room(&self, _room_id: &str) -> Result<()> {
        Err(SerpentiaError::Api {
            status: Some(503),
            message: "service unavailable".into(),
        })
    }

    async fn start_game(&self, _room_id: &str) -> Result<()> {
        Err(SerpentiaError::Api {
            status: Some(503),
            message: "service unavailable".into(),
        })
    }
}

// ════════════════════════════════════════════════════════════════════
// Full fetch integration
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn refresh_replaces_local_list_with_server_answer() {
    let api = MockLobbyApi::new(
        "alice",
        vec![room("R1", "bob", 4, &["bob"]), room("R2", "carol", 2, &[])],
    );
    let lobby = LobbyReconciler::new();
    // Local state that a missed DELETED event left behind.
    lobby.replace_all(vec![room("stale", "ghost", 2, &[])]);

    lobby.refresh_from(&api).await.unwrap();

    let rooms = lobby.rooms();
    assert_eq!(rooms.len(), 2);
    assert!(rooms.iter().all(|r| r.room_id != "stale"));
}

#[tokio::test]
async fn refresh_failure_propagates_and_preserves_state() {
    let lobby = LobbyReconciler::new();
    lobby.replace_all(vec![room("R1", "alice", 2, &[])]);

    let err = lobby.refresh_from(&FailingLobbyApi).await.unwrap_err();
    assert!(matches!(err, SerpentiaError::Api { status: Some(503), .. }));
    assert_eq!(lobby.rooms().len(), 1, "list untouched on failure");
}

#[tokio::test]
async fn refresh_notifies_listeners_once() {
    let api = MockLobbyApi::new("alice", vec![room("R1", "bob", 4, &[])]);
    let lobby = LobbyReconciler::new();

    let seen = Arc::new(StdMutex::new(0usize));
    let sink = Arc::clone(&seen);
    let _watch = lobby.add_listener(move |_| {
        *sink.lock().unwrap() += 1;
    });

    lobby.refresh_from(&api).await.unwrap();
    // Initial replay + one replacement notification.
    assert_eq!(*seen.lock().unwrap(), 2);
}

// ════════════════════════════════════════════════════════════════════
// Join capacity boundary
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn join_at_capacity_is_rejected_by_collaborator() {
    let api = MockLobbyApi::new("carol", vec![room("R1", "alice", 2, &["alice", "bob"])]);

    let err = api.join_room("R1").await.unwrap_err();
    assert!(matches!(err, SerpentiaError::Api { status: Some(409), .. }));

    // The room is not overfilled.
    let rooms = api.fetch_rooms().await.unwrap();
    assert_eq!(rooms[0].current_players.len(), 2);
}

#[tokio::test]
async fn join_below_capacity_appends_in_join_order() {
    let api = MockLobbyApi::new("carol", vec![room("R1", "alice", 3, &["alice", "bob"])]);

    let joined = api.join_room("R1").await.unwrap();
    assert_eq!(joined.current_players, vec!["alice", "bob", "carol"]);
    assert!(joined.is_full());
}

#[tokio::test]
async fn join_unknown_room_fails() {
    let api = MockLobbyApi::new("carol", vec![]);
    let err = api.join_room("nowhere").await.unwrap_err();
    assert!(matches!(err, SerpentiaError::Api { status: Some(404), .. }));
}

// ════════════════════════════════════════════════════════════════════
// Create / leave round trip
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn create_join_leave_flow() {
    let api = MockLobbyApi::new("dave", vec![]);

    let created = api
        .create_room(CreateRoomRequest {
            room_id: "fresh".into(),
            host: "dave".into(),
            game_mode: GameMode::Cooperative,
            max_players: 4,
            target_score: Some(50),
            powerups: true,
        })
        .await
        .unwrap();
    assert_eq!(created.host, "dave");
    assert_eq!(created.current_players, vec!["dave"]);
    assert_eq!(created.game_mode, GameMode::Cooperative);

    // Duplicate creation is refused.
    let err = api
        .create_room(CreateRoomRequest {
            room_id: "fresh".into(),
            host: "eve".into(),
            game_mode: GameMode::Competitive,
            max_players: 2,
            target_score: None,
            powerups: false,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SerpentiaError::Api { status: Some(409), .. }));

    api.leave_room("fresh").await.unwrap();
    let rooms = api.fetch_rooms().await.unwrap();
    assert!(rooms[0].current_players.is_empty());

    // The reconciler sees the collaborator's view after a refresh.
    let lobby = LobbyReconciler::new();
    lobby.refresh_from(&api).await.unwrap();
    assert_eq!(lobby.rooms().len(), 1);
}
