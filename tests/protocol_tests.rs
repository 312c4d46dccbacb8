#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Protocol serialization tests for the Serpentia client.
//!
//! Verifies round-trip serialization of the frame envelopes and both event
//! families, plus JSON fixtures matching real server output — camelCase
//! fields, SCREAMING_SNAKE_CASE tags, and the two board shapes.

mod common;

use serde_json::json;
use serpentia_client::protocol::{
    topics, BoardPayload, ClientFrame, Direction, GameEvent, GameMode, GameStatus, MoveCommand,
    Position, Room, RoomChangeEvent, ServerFrame, TeamInfo,
};

use common::room;

// ════════════════════════════════════════════════════════════════════
// Helper
// ════════════════════════════════════════════════════════════════════

/// Serialize `val` to JSON, then deserialize back to `T` and return it.
fn round_trip<T: serde::Serialize + serde::de::DeserializeOwned>(val: &T) -> T {
    let json = serde_json::to_string(val).expect("serialize");
    serde_json::from_str(&json).expect("deserialize")
}

// ════════════════════════════════════════════════════════════════════
// Enums
// ════════════════════════════════════════════════════════════════════

#[test]
fn direction_uses_uppercase_wire_names() {
    assert_eq!(serde_json::to_string(&Direction::Up).unwrap(), "\"UP\"");
    assert_eq!(serde_json::to_string(&Direction::Down).unwrap(), "\"DOWN\"");
    assert_eq!(serde_json::to_string(&Direction::Left).unwrap(), "\"LEFT\"");
    assert_eq!(
        serde_json::to_string(&Direction::Right).unwrap(),
        "\"RIGHT\""
    );
}

#[test]
fn direction_opposites() {
    assert_eq!(Direction::Up.opposite(), Direction::Down);
    assert_eq!(Direction::Left.opposite(), Direction::Right);
    assert!(Direction::Up.is_opposite(Direction::Down));
    assert!(!Direction::Up.is_opposite(Direction::Left));
    assert!(!Direction::Up.is_opposite(Direction::Up));
}

#[test]
fn game_status_uses_screaming_snake_case() {
    assert_eq!(
        serde_json::to_string(&GameStatus::InGame).unwrap(),
        "\"IN_GAME\""
    );
    assert_eq!(
        serde_json::from_str::<GameStatus>("\"FINISHED\"").unwrap(),
        GameStatus::Finished
    );
}

#[test]
fn game_mode_wire_names() {
    assert_eq!(
        serde_json::to_string(&GameMode::Cooperative).unwrap(),
        "\"COOPERATIVE\""
    );
    assert_eq!(
        serde_json::from_str::<GameMode>("\"TEAM\"").unwrap(),
        GameMode::Team
    );
}

// ════════════════════════════════════════════════════════════════════
// Room and room events
// ════════════════════════════════════════════════════════════════════

#[test]
fn room_serializes_camel_case() {
    let value = serde_json::to_value(room("R1", "alice", 4, &["alice"])).unwrap();
    assert_eq!(value["roomId"], "R1");
    assert_eq!(value["maxPlayers"], 4);
    assert_eq!(value["currentPlayers"][0], "alice");
    assert_eq!(value["gameMode"], "COMPETITIVE");
    assert_eq!(value["status"], "WAITING");
    assert!(
        value.get("targetScore").is_none(),
        "absent optionals are omitted"
    );
}

#[test]
fn room_fixture_from_server_parses() {
    let fixture = json!({
        "roomId": "R7",
        "host": "carol",
        "gameMode": "TEAM",
        "maxPlayers": 6,
        "currentPlayers": ["carol", "dave"],
        "targetScore": 100,
        "powerups": true,
        "status": "IN_GAME",
        "teams": {
            "red": {"name": "red", "color": "#FF0000", "members": ["carol"]}
        },
        "playerToTeam": {"carol": "red"}
    });
    let parsed: Room = serde_json::from_value(fixture).unwrap();
    assert_eq!(parsed.room_id, "R7");
    assert_eq!(parsed.game_mode, GameMode::Team);
    assert_eq!(parsed.target_score, Some(100));
    assert!(!parsed.is_full());
    assert!(parsed.has_player("dave"));
    let teams = parsed.teams.unwrap();
    assert_eq!(
        teams["red"],
        TeamInfo {
            name: "red".into(),
            color: "#FF0000".into(),
            members: vec!["carol".into()]
        }
    );
}

#[test]
fn room_is_full_at_capacity() {
    assert!(room("R1", "a", 2, &["a", "b"]).is_full());
    assert!(!room("R1", "a", 3, &["a", "b"]).is_full());
}

#[test]
fn room_change_event_round_trips() {
    let events = vec![
        RoomChangeEvent::Created {
            room: room("R1", "alice", 2, &[]),
            timestamp: Some(1715000000),
        },
        RoomChangeEvent::Updated {
            room: room("R1", "alice", 2, &["alice"]),
            timestamp: None,
        },
        RoomChangeEvent::Deleted {
            room: room("R1", "alice", 2, &[]),
            timestamp: None,
        },
        RoomChangeEvent::Cleared,
    ];
    for event in &events {
        assert_eq!(&round_trip(event), event);
    }
}

#[test]
fn room_change_event_fixture_tags() {
    let value = serde_json::to_value(RoomChangeEvent::Created {
        room: room("R1", "alice", 2, &[]),
        timestamp: None,
    })
    .unwrap();
    assert_eq!(value["type"], "CREATED");
    assert_eq!(value["room"]["roomId"], "R1");

    let cleared: RoomChangeEvent = serde_json::from_value(json!({"type": "CLEARED"})).unwrap();
    assert_eq!(cleared, RoomChangeEvent::Cleared);

    // Legacy aliases still parse.
    let joined: RoomChangeEvent = serde_json::from_value(json!({
        "type": "JOINED",
        "room": serde_json::to_value(room("R1", "alice", 2, &["alice", "bob"])).unwrap(),
        "timestamp": 1715000001i64
    }))
    .unwrap();
    assert!(matches!(joined, RoomChangeEvent::Joined { .. }));
}

// ════════════════════════════════════════════════════════════════════
// Game events
// ════════════════════════════════════════════════════════════════════

#[test]
fn game_event_round_trips() {
    let events = vec![
        GameEvent::Start {
            board: Some(json!({"players": [], "width": 10, "height": 10})),
        },
        GameEvent::Update { board: None },
        GameEvent::ScoreUpdate {
            players: vec![],
            player_id: Some("alice".into()),
            points_gained: Some(3),
        },
        GameEvent::GameEnd {
            players: None,
            message: Some("alice wins".into()),
        },
        GameEvent::End { message: None },
        GameEvent::Collision {
            player_id: Some("bob".into()),
            message: None,
        },
        GameEvent::Fruit {
            player_id: Some("bob".into()),
            points_gained: Some(1),
        },
        GameEvent::PlayerJoin {
            player_name: Some("carol".into()),
        },
        GameEvent::PlayerLeave { player_name: None },
    ];
    for event in &events {
        assert_eq!(&round_trip(event), event);
    }
}

#[test]
fn game_event_fixture_tags_and_fields() {
    let value = serde_json::to_value(GameEvent::ScoreUpdate {
        players: vec![],
        player_id: Some("alice".into()),
        points_gained: Some(5),
    })
    .unwrap();
    assert_eq!(value["type"], "SCORE_UPDATE");
    assert_eq!(value["playerId"], "alice");
    assert_eq!(value["pointsGained"], 5);

    let parsed: GameEvent = serde_json::from_value(json!({
        "type": "START",
        "board": {"players": []}
    }))
    .unwrap();
    assert!(matches!(parsed, GameEvent::Start { board: Some(_) }));
}

#[test]
fn unknown_game_event_type_fails_to_parse() {
    let result = serde_json::from_value::<GameEvent>(json!({"type": "TELEPORT"}));
    assert!(result.is_err());
}

// ════════════════════════════════════════════════════════════════════
// Board shape sniffing
// ════════════════════════════════════════════════════════════════════

#[test]
fn players_array_board_sniffs_as_players_shape() {
    let payload: BoardPayload = serde_json::from_value(json!({
        "players": [
            {"name": "alice", "snake": [{"x": 0, "y": 0}], "direction": "UP"}
        ],
        "fruits": []
    }))
    .unwrap();
    match payload {
        BoardPayload::Players(board) => {
            assert_eq!(board.players.len(), 1);
            // Omitted optionals take the fixed defaults.
            assert_eq!(board.players[0].score, 0);
            assert!(board.players[0].alive);
            assert_eq!(board.players[0].color, "#4CAF50");
        }
        BoardPayload::Tables(_) => panic!("expected players shape"),
    }
}

#[test]
fn parallel_tables_board_sniffs_as_tables_shape() {
    let payload: BoardPayload = serde_json::from_value(json!({
        "snakePositions": {"alice": [{"x": 0, "y": 0}]},
        "snakeDirections": {"alice": "LEFT"},
        "playerScores": {"alice": 4},
        "playerAlive": {"alice": false}
    }))
    .unwrap();
    match payload {
        BoardPayload::Tables(board) => {
            assert_eq!(board.snake_positions["alice"], vec![Position { x: 0, y: 0 }]);
            assert_eq!(board.snake_directions["alice"], Direction::Left);
            assert_eq!(board.player_scores["alice"], 4);
            assert!(!board.player_alive["alice"]);
        }
        BoardPayload::Players(_) => panic!("expected tables shape"),
    }
}

#[test]
fn board_matching_neither_shape_fails() {
    assert!(serde_json::from_value::<BoardPayload>(json!({"width": 40})).is_err());
    assert!(serde_json::from_value::<BoardPayload>(json!("nonsense")).is_err());
}

// ════════════════════════════════════════════════════════════════════
// Frames and outbound payloads
// ════════════════════════════════════════════════════════════════════

#[test]
fn client_frame_round_trips() {
    let frames = vec![
        ClientFrame::Subscribe {
            topic: topics::LOBBY.into(),
        },
        ClientFrame::Unsubscribe {
            topic: topics::game("R1"),
        },
        ClientFrame::Send {
            destination: topics::submit_move("R1"),
            body: json!({"player": "alice", "direction": "UP"}),
        },
    ];
    for frame in &frames {
        assert_eq!(&round_trip(frame), frame);
    }
}

#[test]
fn server_frame_round_trips() {
    let frames = vec![
        ServerFrame::Message {
            topic: topics::LOBBY.into(),
            body: json!({"type": "CLEARED"}),
        },
        ServerFrame::Error {
            message: "bad destination".into(),
        },
    ];
    for frame in &frames {
        assert_eq!(&round_trip(frame), frame);
    }
}

#[test]
fn frame_envelope_fixture() {
    let value = serde_json::to_value(ClientFrame::Subscribe {
        topic: "/topic/lobby".into(),
    })
    .unwrap();
    assert_eq!(value, json!({"type": "Subscribe", "data": {"topic": "/topic/lobby"}}));
}

#[test]
fn move_command_matches_server_contract() {
    let value = serde_json::to_value(MoveCommand {
        player: "alice".into(),
        direction: Direction::Right,
    })
    .unwrap();
    assert_eq!(value, json!({"player": "alice", "direction": "RIGHT"}));
}

#[test]
fn topic_names_are_deterministic() {
    assert_eq!(topics::LOBBY, "/topic/lobby");
    assert_eq!(topics::game("R1"), "/topic/game/R1");
    assert_eq!(topics::submit_move("R1"), "/app/room/R1/move");
    assert_eq!(topics::start_game("R1"), "/app/room/R1/start");
    // Case-sensitive: ids embed verbatim.
    assert_ne!(topics::game("r1"), topics::game("R1"));
}
