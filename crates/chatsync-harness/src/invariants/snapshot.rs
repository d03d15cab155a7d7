//! Frozen copies of client state.
//!
//! Checks read a copy taken between two events, never the live client, so
//! every invariant sees the same state.

use std::collections::HashMap;

use chatsync_client::{Client, ConnectionState, Environment};
use chatsync_core::{Message, Timestamp};
use chatsync_proto::RoomId;

/// Everything the checks look at.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// One entry per simulated client
    pub clients: Vec<ClientSnapshot>,
}

impl SystemSnapshot {
    /// No clients.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Just `client`.
    pub fn single(client: ClientSnapshot) -> Self {
        Self { clients: vec![client] }
    }
}

/// What one client exposes.
#[derive(Debug, Clone)]
pub struct ClientSnapshot {
    /// Index of the client in the run
    pub id: u64,
    /// Push channel state.
    pub connection: ConnectionState,
    /// Focused room.
    pub active_room: Option<RoomId>,
    /// Directory entries.
    pub rooms: HashMap<RoomId, RoomSnapshot>,
    /// Timelines, oldest message first.
    pub timelines: HashMap<RoomId, Vec<Message>>,
    /// `last_activity_at` observations per room (for monotonicity checks).
    pub activity_history: HashMap<RoomId, Vec<Timestamp>>,
}

impl ClientSnapshot {
    /// Closed client with nothing loaded.
    pub fn new(id: u64) -> Self {
        Self {
            id,
            connection: ConnectionState::Closed,
            active_room: None,
            rooms: HashMap::new(),
            timelines: HashMap::new(),
            activity_history: HashMap::new(),
        }
    }

    /// Capture everything observable from a live client.
    pub fn capture<E: Environment>(id: u64, client: &Client<E>) -> Self {
        let rooms = client
            .all_rooms()
            .map(|room| {
                let snapshot = RoomSnapshot {
                    last_activity_at: room.last_activity_at,
                    message_count: room.message_count,
                    unread: client.unread(&room.id),
                };
                (room.id.clone(), snapshot)
            })
            .collect();
        let timelines = client
            .timelines()
            .map(|timeline| (timeline.room_id().clone(), timeline.iter().cloned().collect()))
            .collect();

        Self {
            id,
            connection: client.connection_state(),
            active_room: client.directory().active_room_id().cloned(),
            rooms,
            timelines,
            activity_history: HashMap::new(),
        }
    }

    /// Replace the focused room.
    pub fn with_active_room(mut self, room_id: Option<RoomId>) -> Self {
        self.active_room = room_id;
        self
    }

    /// Add a directory entry.
    pub fn with_room(mut self, room_id: RoomId, snapshot: RoomSnapshot) -> Self {
        self.rooms.insert(room_id, snapshot);
        self
    }

    /// Add a room's messages, in display order.
    pub fn with_timeline(mut self, room_id: RoomId, messages: Vec<Message>) -> Self {
        self.timelines.insert(room_id, messages);
        self
    }

    /// Append one observation of a room's `last_activity_at`.
    pub fn record_activity(&mut self, room_id: RoomId, last_activity_at: Timestamp) {
        self.activity_history.entry(room_id).or_default().push(last_activity_at);
    }
}

/// Snapshot of a directory entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomSnapshot {
    /// Newest activity, Unix milliseconds.
    pub last_activity_at: Timestamp,
    /// Denormalized message counter.
    pub message_count: u64,
    /// Unread messages.
    pub unread: u64,
}

impl RoomSnapshot {
    /// Entry with only `last_activity_at` set.
    pub fn with_activity(last_activity_at: Timestamp) -> Self {
        Self { last_activity_at, ..Default::default() }
    }

    /// Set message count.
    pub fn with_message_count(mut self, count: u64) -> Self {
        self.message_count = count;
        self
    }

    /// Set unread count.
    pub fn with_unread(mut self, unread: u64) -> Self {
        self.unread = unread;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_holds_one_client() {
        assert!(SystemSnapshot::empty().clients.is_empty());
        assert_eq!(SystemSnapshot::single(ClientSnapshot::new(3)).clients[0].id, 3);
    }

    #[test]
    fn client_snapshot_builder() {
        let room = RoomSnapshot::with_activity(5).with_message_count(10).with_unread(2);
        let id = RoomId::from("r1");

        let client =
            ClientSnapshot::new(42).with_active_room(Some(id.clone())).with_room(id.clone(), room);

        assert_eq!(client.id, 42);
        assert_eq!(client.active_room, Some(id.clone()));
        assert_eq!(client.rooms[&id].last_activity_at, 5);
        assert_eq!(client.rooms[&id].unread, 2);
        assert!(client.timelines.is_empty());
    }
}
