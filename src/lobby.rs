//! Lobby reconciler: folds room-change events into one authoritative list.
//!
//! The server is the single source of truth. The reconciler tolerates the
//! delivery quirks of the lobby topic — duplicate CREATED, UPDATED arriving
//! before its CREATED, DELETED for unknown rooms — by reducing every event
//! to upsert/remove-by-id, and recovers from missed events by replacing the
//! whole list from a full fetch ([`LobbyReconciler::refresh_from`]).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::LobbyApi;
use crate::connection::{ConnectionManager, SubscriptionHandle};
use crate::error::Result;
use crate::protocol::{topics, Room, RoomChangeEvent};

/// Callback invoked with a full copy of the room list after every change.
pub type RoomsListener = Arc<dyn Fn(&[Room]) + Send + Sync>;

struct LobbyState {
    rooms: Vec<Room>,
    listeners: Vec<(Uuid, RoomsListener)>,
}

/// Maintains the authoritative local room list for the lobby.
///
/// Cheap to clone; all clones share the same list and listeners.
#[derive(Clone)]
pub struct LobbyReconciler {
    inner: Arc<StdMutex<LobbyState>>,
}

impl Default for LobbyReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl LobbyReconciler {
    /// Create a reconciler with an empty room list.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StdMutex::new(LobbyState {
                rooms: Vec::new(),
                listeners: Vec::new(),
            })),
        }
    }

    /// Current room list (an independent copy).
    pub fn rooms(&self) -> Vec<Room> {
        self.inner
            .lock()
            .map(|s| s.rooms.clone())
            .unwrap_or_default()
    }

    /// Fold one room-change event into the list and notify listeners.
    ///
    /// Every call yields exactly one notification, even when the event is a
    /// logical no-op (duplicate CREATED, DELETED for an absent id) — no
    /// batching, no coalescing.
    pub fn apply_event(&self, event: RoomChangeEvent) {
        let (rooms, listeners) = {
            let Ok(mut state) = self.inner.lock() else {
                return;
            };
            match event {
                RoomChangeEvent::Created { room, .. } => {
                    // Redelivered CREATED for a known id is a no-op.
                    if state.rooms.iter().any(|r| r.room_id == room.room_id) {
                        debug!(room_id = %room.room_id, "duplicate CREATED ignored");
                    } else {
                        state.rooms.push(room);
                    }
                }
                RoomChangeEvent::Updated { room, .. }
                | RoomChangeEvent::Joined { room, .. }
                | RoomChangeEvent::Left { room, .. } => {
                    // An UPDATED for an unseen room is an implicit create:
                    // CREATE/UPDATE may be delivered out of order.
                    match state.rooms.iter_mut().find(|r| r.room_id == room.room_id) {
                        Some(slot) => *slot = room,
                        None => state.rooms.push(room),
                    }
                }
                RoomChangeEvent::Deleted { room, .. } => {
                    state.rooms.retain(|r| r.room_id != room.room_id);
                }
                RoomChangeEvent::Cleared => state.rooms.clear(),
            }
            (state.rooms.clone(), state.listeners.clone())
        };
        for (_, listener) in &listeners {
            listener(&rooms);
        }
    }

    /// Replace the entire list with the server's authoritative answer and
    /// notify listeners. Used for initial load and post-reconnect recovery.
    pub fn replace_all(&self, rooms: Vec<Room>) {
        let (rooms, listeners) = {
            let Ok(mut state) = self.inner.lock() else {
                return;
            };
            state.rooms = rooms;
            (state.rooms.clone(), state.listeners.clone())
        };
        for (_, listener) in &listeners {
            listener(&rooms);
        }
    }

    /// Fetch the full room list from the lobby collaborator and replace the
    /// local list with it.
    ///
    /// # Errors
    ///
    /// Propagates the collaborator failure; the local list is left untouched
    /// in that case.
    pub async fn refresh_from(&self, api: &dyn LobbyApi) -> Result<()> {
        let rooms = api.fetch_rooms().await?;
        self.replace_all(rooms);
        Ok(())
    }

    /// Register a listener for room-list changes.
    ///
    /// The current list is replayed synchronously to the new listener before
    /// this call returns, so late subscribers never observe a stale empty
    /// state.
    pub fn add_listener(
        &self,
        listener: impl Fn(&[Room]) + Send + Sync + 'static,
    ) -> RoomsListenerHandle {
        let id = Uuid::new_v4();
        let listener: RoomsListener = Arc::new(listener);
        let rooms = {
            match self.inner.lock() {
                Ok(mut state) => {
                    state.listeners.push((id, Arc::clone(&listener)));
                    state.rooms.clone()
                }
                Err(_) => Vec::new(),
            }
        };
        listener(&rooms);
        RoomsListenerHandle {
            inner: Arc::downgrade(&self.inner),
            id,
            disposed: AtomicBool::new(false),
        }
    }

    /// Wire this reconciler to the lobby topic of `manager`.
    ///
    /// Malformed lobby payloads are logged and dropped; they never disturb
    /// the current list.
    pub fn subscribe(&self, manager: &ConnectionManager) -> SubscriptionHandle {
        let reconciler = self.clone();
        manager.subscribe(topics::LOBBY, move |body| {
            match serde_json::from_value::<RoomChangeEvent>(body.clone()) {
                Ok(event) => reconciler.apply_event(event),
                Err(e) => warn!("malformed lobby event dropped: {e}"),
            }
        })
    }
}

impl std::fmt::Debug for LobbyReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.inner.lock().map(|s| s.rooms.len()).unwrap_or(0);
        f.debug_struct("LobbyReconciler")
            .field("rooms", &count)
            .finish()
    }
}

/// Disposer for one lobby listener. Removing twice is a no-op.
pub struct RoomsListenerHandle {
    inner: Weak<StdMutex<LobbyState>>,
    id: Uuid,
    disposed: AtomicBool,
}

impl RoomsListenerHandle {
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
    use crate::protocol::{GameMode, GameStatus};
    use pretty_assertions::assert_eq;

    fn room(id: &str, host: &str, max_players: u32, players: &[&str]) -> Room {
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

    fn created(r: Room) -> RoomChangeEvent {
        RoomChangeEvent::Created {
            room: r,
            timestamp: None,
        }
    }

    fn updated(r: Room) -> RoomChangeEvent {
        RoomChangeEvent::Updated {
            room: r,
            timestamp: None,
        }
    }

    fn deleted(r: Room) -> RoomChangeEvent {
        RoomChangeEvent::Deleted {
            room: r,
            timestamp: None,
        }
    }

    /// Collects every notified room list for later assertions.
    fn recording_listener(
        reconciler: &LobbyReconciler,
    ) -> (Arc<StdMutex<Vec<Vec<Room>>>>, RoomsListenerHandle) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = reconciler.add_listener(move |rooms| {
            sink.lock().unwrap().push(rooms.to_vec());
        });
        (seen, handle)
    }

    #[test]
    fn create_update_delete_scenario() {
        let reconciler = LobbyReconciler::new();
        let (seen, _handle) = recording_listener(&reconciler);

        reconciler.apply_event(created(room("R1", "alice", 2, &["alice"])));
        reconciler.apply_event(updated(room("R1", "alice", 2, &["alice", "bob"])));
        reconciler.apply_event(deleted(room("R1", "alice", 2, &["alice", "bob"])));

        let seen = seen.lock().unwrap();
        // Initial replay + three events.
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0], Vec::<Room>::new());
        assert_eq!(seen[1].len(), 1);
        assert_eq!(seen[2][0].current_players, vec!["alice", "bob"]);
        assert_eq!(seen[3], Vec::<Room>::new());
    }

    #[test]
    fn duplicate_created_is_noop_but_still_notifies() {
        let reconciler = LobbyReconciler::new();
        let (seen, _handle) = recording_listener(&reconciler);

        reconciler.apply_event(created(room("R1", "alice", 4, &["alice"])));
        reconciler.apply_event(created(room("R1", "mallory", 8, &[])));

        assert_eq!(reconciler.rooms().len(), 1);
        assert_eq!(reconciler.rooms()[0].host, "alice", "original room kept");
        // Replay + two notifications, one per event.
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn updated_before_created_is_implicit_create() {
        let reconciler = LobbyReconciler::new();
        reconciler.apply_event(updated(room("R9", "carol", 4, &["carol"])));
        assert_eq!(reconciler.rooms().len(), 1);

        // The late CREATED redelivery is then a duplicate no-op.
        reconciler.apply_event(created(room("R9", "carol", 4, &[])));
        assert_eq!(reconciler.rooms()[0].current_players, vec!["carol"]);
    }

    #[test]
    fn legacy_joined_left_events_upsert() {
        let reconciler = LobbyReconciler::new();
        reconciler.apply_event(RoomChangeEvent::Joined {
            room: room("R1", "alice", 4, &["alice", "bob"]),
            timestamp: None,
        });
        assert_eq!(reconciler.rooms()[0].current_players.len(), 2);

        reconciler.apply_event(RoomChangeEvent::Left {
            room: room("R1", "alice", 4, &["alice"]),
            timestamp: None,
        });
        assert_eq!(reconciler.rooms()[0].current_players, vec!["alice"]);
    }

    #[test]
    fn delete_of_absent_room_is_noop() {
        let reconciler = LobbyReconciler::new();
        reconciler.apply_event(created(room("R1", "alice", 2, &[])));
        reconciler.apply_event(deleted(room("ghost", "nobody", 2, &[])));
        assert_eq!(reconciler.rooms().len(), 1);
    }

    #[test]
    fn cleared_empties_the_list() {
        let reconciler = LobbyReconciler::new();
        reconciler.apply_event(created(room("R1", "alice", 2, &[])));
        reconciler.apply_event(created(room("R2", "bob", 2, &[])));
        reconciler.apply_event(RoomChangeEvent::Cleared);
        assert_eq!(reconciler.rooms(), Vec::<Room>::new());
    }

    #[test]
    fn event_order_independence_reduces_to_upsert_by_id() {
        // Same multiset of events, different orders, same final list.
        let a = LobbyReconciler::new();
        a.apply_event(created(room("R1", "alice", 2, &[])));
        a.apply_event(updated(room("R2", "bob", 2, &["bob"])));
        a.apply_event(created(room("R2", "bob", 2, &[])));

        let b = LobbyReconciler::new();
        b.apply_event(updated(room("R2", "bob", 2, &["bob"])));
        b.apply_event(created(room("R1", "alice", 2, &[])));
        b.apply_event(created(room("R2", "bob", 2, &[])));

        let mut rooms_a = a.rooms();
        let mut rooms_b = b.rooms();
        rooms_a.sort_by(|x, y| x.room_id.cmp(&y.room_id));
        rooms_b.sort_by(|x, y| x.room_id.cmp(&y.room_id));
        assert_eq!(rooms_a, rooms_b);
    }

    #[test]
    fn late_listener_gets_synchronous_replay() {
        let reconciler = LobbyReconciler::new();
        reconciler.apply_event(created(room("R1", "alice", 2, &[])));

        let (seen, _handle) = recording_listener(&reconciler);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1, "replay happens before add_listener returns");
        assert_eq!(seen[0].len(), 1);
    }

    #[test]
    fn replace_all_overwrites_local_state() {
        let reconciler = LobbyReconciler::new();
        reconciler.apply_event(created(room("stale", "alice", 2, &[])));

        reconciler.replace_all(vec![
            room("R1", "bob", 4, &["bob"]),
            room("R2", "carol", 4, &[]),
        ]);
        let rooms = reconciler.rooms();
        assert_eq!(rooms.len(), 2);
        assert!(rooms.iter().all(|r| r.room_id != "stale"));
    }

    #[test]
    fn removed_listener_stops_receiving() {
        let reconciler = LobbyReconciler::new();
        let (seen, handle) = recording_listener(&reconciler);

        handle.remove();
        handle.remove(); // idempotent
        reconciler.apply_event(created(room("R1", "alice", 2, &[])));

        assert_eq!(seen.lock().unwrap().len(), 1, "only the initial replay");
    }
}
