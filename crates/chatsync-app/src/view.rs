//! Read-only snapshots of client state for the UI layer.

use std::collections::HashMap;

use chatsync_client::{Client, ConnectionState, Environment};
use chatsync_core::{Message, Room};
use chatsync_proto::{RoomId, RoomKind};

/// Point-in-time copy of everything the UI renders.
///
/// Published through a watch channel after every batch of changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncView {
    /// Bumped on every publish
    pub version: u64,
    /// Push channel state
    pub connection: ConnectionState,
    /// Every room, newest activity first
    pub rooms: Vec<Room>,
    /// Focused room
    pub active_room: Option<RoomId>,
    /// Ordered timeline per room
    pub timelines: HashMap<RoomId, Vec<Message>>,
    /// Non-zero unread counters
    pub unread: HashMap<RoomId, u64>,
}

impl Default for SyncView {
    fn default() -> Self {
        Self {
            version: 0,
            connection: ConnectionState::Closed,
            rooms: Vec::new(),
            active_room: None,
            timelines: HashMap::new(),
            unread: HashMap::new(),
        }
    }
}

impl SyncView {
    pub(crate) fn capture<E: Environment>(client: &Client<E>, version: u64) -> Self {
        Self {
            version,
            connection: client.connection_state(),
            rooms: client.all_rooms().cloned().collect(),
            active_room: client.directory().active_room_id().cloned(),
            timelines: client
                .timelines()
                .map(|timeline| (timeline.room_id().clone(), timeline.iter().cloned().collect()))
                .collect(),
            unread: client
                .read_state()
                .unread_rooms()
                .filter(|(_, count)| *count > 0)
                .map(|(room, count)| (room.clone(), count))
                .collect(),
        }
    }

    /// Rooms of one kind, newest activity first.
    pub fn rooms(&self, kind: RoomKind) -> impl Iterator<Item = &Room> + '_ {
        self.rooms.iter().filter(move |room| room.kind == kind)
    }

    /// Look up one room.
    pub fn room(&self, room_id: &RoomId) -> Option<&Room> {
        self.rooms.iter().find(|room| &room.id == room_id)
    }

    /// The focused room.
    pub fn active_room(&self) -> Option<&Room> {
        self.active_room.as_ref().and_then(|id| self.room(id))
    }

    /// Ordered messages of a room. Empty if nothing is known.
    pub fn timeline(&self, room_id: &RoomId) -> &[Message] {
        self.timelines.get(room_id).map_or(&[], Vec::as_slice)
    }

    /// Unread messages in a room.
    pub fn unread(&self, room_id: &RoomId) -> u64 {
        self.unread.get(room_id).copied().unwrap_or(0)
    }

    /// Unread messages across all rooms.
    pub fn total_unread(&self) -> u64 {
        self.unread.values().sum()
    }
}
