//! Read-state tracking.
//!
//! Local unread counters per room and the read acknowledgement sent when a
//! room gains focus. `read_by_others` on messages is server-owned and does
//! not live here.

use std::collections::HashMap;

use chatsync_proto::RoomId;

/// Number of silent retries after a failed read acknowledgement.
pub const MAX_ACK_RETRIES: u8 = 1;

/// Side effect requested by the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadAction {
    /// Tell the backend the session user has read `room_id`
    Acknowledge {
        /// Room that was read
        room_id: RoomId,
        /// Zero for the first try
        attempt: u8,
    },
}

/// Unread counters and focus.
#[derive(Debug, Clone, Default)]
pub struct ReadStateTracker {
    unread: HashMap<RoomId, u64>,
    active: Option<RoomId>,
}

impl ReadStateTracker {
    /// Tracker with no unread messages.
    pub fn new() -> Self {
        Self::default()
    }

    /// A room gained focus: everything in it is read.
    pub fn on_active_room_changed(&mut self, room_id: &RoomId) -> ReadAction {
        self.active = Some(room_id.clone());
        self.mark_read(room_id);
        ReadAction::Acknowledge { room_id: room_id.clone(), attempt: 0 }
    }

    /// No room has focus any more.
    pub fn clear_active(&mut self) {
        self.active = None;
    }

    /// Focused room.
    pub fn active(&self) -> Option<&RoomId> {
        self.active.as_ref()
    }

    /// A timeline accepted a message it did not have before.
    ///
    /// Counts it unless the room has focus or the session user wrote it.
    /// Returns the room's unread count afterwards.
    pub fn on_message_accepted(&mut self, room_id: &RoomId, from_self: bool) -> u64 {
        if from_self || self.active.as_ref() == Some(room_id) {
            return self.unread(room_id);
        }
        let count = self.unread.entry(room_id.clone()).or_insert(0);
        *count += 1;
        *count
    }

    /// A read acknowledgement failed. Returns the retry, if any is left.
    pub fn on_ack_failed(&mut self, room_id: &RoomId, attempt: u8) -> Option<ReadAction> {
        if attempt >= MAX_ACK_RETRIES {
            return None;
        }
        Some(ReadAction::Acknowledge { room_id: room_id.clone(), attempt: attempt + 1 })
    }

    /// Reset a room's counter.
    pub fn mark_read(&mut self, room_id: &RoomId) {
        self.unread.remove(room_id);
    }

    /// Unread messages in a room.
    pub fn unread(&self, room_id: &RoomId) -> u64 {
        self.unread.get(room_id).copied().unwrap_or(0)
    }

    /// Unread messages across all rooms.
    pub fn total_unread(&self) -> u64 {
        self.unread.values().sum()
    }

    /// Rooms with a non-zero counter.
    pub fn unread_rooms(&self) -> impl Iterator<Item = (&RoomId, u64)> + '_ {
        self.unread.iter().map(|(room, count)| (room, *count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_only_foreign_messages_in_unfocused_rooms() {
        let mut tracker = ReadStateTracker::new();
        let a = RoomId::from("a");
        let b = RoomId::from("b");
        tracker.on_active_room_changed(&a);

        assert_eq!(tracker.on_message_accepted(&a, false), 0);
        assert_eq!(tracker.on_message_accepted(&b, true), 0);
        assert_eq!(tracker.on_message_accepted(&b, false), 1);
        assert_eq!(tracker.on_message_accepted(&b, false), 2);
        assert_eq!(tracker.total_unread(), 2);
    }

    #[test]
    fn focusing_a_room_zeroes_it_and_acknowledges() {
        let mut tracker = ReadStateTracker::new();
        let a = RoomId::from("a");
        tracker.on_message_accepted(&a, false);

        let action = tracker.on_active_room_changed(&a);
        assert_eq!(action, ReadAction::Acknowledge { room_id: a.clone(), attempt: 0 });
        assert_eq!(tracker.unread(&a), 0);
    }

    #[test]
    fn failed_ack_is_retried_once() {
        let mut tracker = ReadStateTracker::new();
        let a = RoomId::from("a");

        let retry = tracker.on_ack_failed(&a, 0);
        assert_eq!(retry, Some(ReadAction::Acknowledge { room_id: a.clone(), attempt: 1 }));
        assert_eq!(tracker.on_ack_failed(&a, 1), None);
    }
}
