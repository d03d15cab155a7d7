//! Standard invariant checks.
//!
//! These invariants capture behavioral properties that must always hold.
//! They verify WHAT must be true, not specific test scenarios.

use std::collections::HashSet;

use chatsync_core::DeliveryState;

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};

/// Active room must be a directory entry.
///
/// If `active_room` is `Some(room_id)`, then `rooms` must contain `room_id`.
/// This prevents the UI from showing a selected room that doesn't exist.
pub struct ActiveRoomInDirectory;

impl Invariant for ActiveRoomInDirectory {
    fn name(&self) -> &'static str {
        "active_room_in_directory"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            if let Some(active) = &client.active_room
                && !client.rooms.contains_key(active)
            {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "client {}: active room {} not in directory {:?}",
                        client.id,
                        active,
                        client.rooms.keys().collect::<Vec<_>>()
                    ),
                });
            }
        }
        Ok(())
    }
}

/// A message id appears at most once per timeline.
pub struct NoDuplicateMessages;

impl Invariant for NoDuplicateMessages {
    fn name(&self) -> &'static str {
        "no_duplicate_messages"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            for (room_id, messages) in &client.timelines {
                let mut seen = HashSet::new();
                for message in messages {
                    if !seen.insert(&message.id) {
                        return Err(Violation {
                            invariant: self.name(),
                            message: format!(
                                "client {} room {}: message {} appears twice",
                                client.id, room_id, message.id
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Messages that never were local sends are ordered by `(created_at, id)`.
///
/// Entries that started as optimistic sends keep the position they had while
/// pending, so only messages without a correlation token are compared.
pub struct TimelineOrdering;

impl Invariant for TimelineOrdering {
    fn name(&self) -> &'static str {
        "timeline_ordering"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            for (room_id, messages) in &client.timelines {
                let remote: Vec<_> = messages
                    .iter()
                    .filter(|m| m.client_ref.is_none())
                    .map(|m| (m.created_at, &m.id))
                    .collect();
                for window in remote.windows(2) {
                    if window[1] < window[0] {
                        return Err(Violation {
                            invariant: self.name(),
                            message: format!(
                                "client {} room {}: {}@{} listed before {}@{}",
                                client.id,
                                room_id,
                                window[0].1,
                                window[0].0,
                                window[1].1,
                                window[1].0
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// A room's `last_activity_at` is at least the timestamp of its newest
/// confirmed message.
pub struct ActivityCoversNewestMessage;

impl Invariant for ActivityCoversNewestMessage {
    fn name(&self) -> &'static str {
        "activity_covers_newest_message"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            for (room_id, messages) in &client.timelines {
                let Some(room) = client.rooms.get(room_id) else {
                    continue;
                };
                let newest = messages
                    .iter()
                    .filter(|m| m.delivery_state == DeliveryState::Confirmed)
                    .map(|m| m.created_at)
                    .max();
                if let Some(newest) = newest
                    && room.last_activity_at < newest
                {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "client {} room {}: last activity {} behind newest message {}",
                            client.id, room_id, room.last_activity_at, newest
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A room's `last_activity_at` never decreases.
pub struct ActivityMonotonicity;

impl Invariant for ActivityMonotonicity {
    fn name(&self) -> &'static str {
        "activity_monotonicity"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            for (room_id, history) in &client.activity_history {
                for window in history.windows(2) {
                    if window[1] < window[0] {
                        return Err(Violation {
                            invariant: self.name(),
                            message: format!(
                                "client {} room {}: activity went back {} → {}",
                                client.id, room_id, window[0], window[1]
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// The focused room never counts unread messages.
pub struct ActiveRoomHasNoUnread;

impl Invariant for ActiveRoomHasNoUnread {
    fn name(&self) -> &'static str {
        "active_room_has_no_unread"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let Some(active) = &client.active_room else {
                continue;
            };
            if let Some(room) = client.rooms.get(active)
                && room.unread > 0
            {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "client {}: active room {} has {} unread",
                        client.id, active, room.unread
                    ),
                });
            }
        }
        Ok(())
    }
}

/// A room's message counter is at least the number of confirmed messages
/// its timeline holds.
pub struct MessageCountCoversTimeline;

impl Invariant for MessageCountCoversTimeline {
    fn name(&self) -> &'static str {
        "message_count_covers_timeline"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            for (room_id, messages) in &client.timelines {
                let Some(room) = client.rooms.get(room_id) else {
                    continue;
                };
                let confirmed = messages
                    .iter()
                    .filter(|m| m.delivery_state == DeliveryState::Confirmed)
                    .count() as u64;
                if room.message_count < confirmed {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "client {} room {}: counter {} below {} confirmed messages",
                            client.id, room_id, room.message_count, confirmed
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chatsync_core::Message;
    use chatsync_proto::{MessageKind, RoomId};

    use super::*;
    use crate::invariants::{ClientSnapshot, RoomSnapshot};

    fn message(id: &str, at: u64, client_ref: Option<&str>) -> Message {
        Message {
            id: id.into(),
            room_id: "r1".into(),
            sender_id: "bob".into(),
            sender_display_name: "Bob".into(),
            body: format!("body {id}"),
            kind: MessageKind::Text,
            attachment_ref: None,
            created_at: at,
            read_by_others: false,
            delivery_state: DeliveryState::Confirmed,
            client_ref: client_ref.map(str::to_owned),
        }
    }

    fn client_with(messages: Vec<Message>, room: RoomSnapshot) -> SystemSnapshot {
        let id = RoomId::from("r1");
        SystemSnapshot::single(
            ClientSnapshot::new(0).with_room(id.clone(), room).with_timeline(id, messages),
        )
    }

    #[test]
    fn duplicate_ids_are_detected() {
        let state = client_with(
            vec![message("m1", 10, None), message("m1", 10, None)],
            RoomSnapshot::with_activity(10).with_message_count(2),
        );
        assert!(NoDuplicateMessages.check(&state).is_err());
    }

    #[test]
    fn ordering_ignores_former_local_sends() {
        let ordered = client_with(
            vec![
                message("m1", 10, None),
                message("m9", 30, Some("local-1")),
                message("m3", 20, None),
            ],
            RoomSnapshot::with_activity(30).with_message_count(3),
        );
        assert!(TimelineOrdering.check(&ordered).is_ok());

        let unordered = client_with(
            vec![message("m2", 20, None), message("m1", 10, None)],
            RoomSnapshot::with_activity(20).with_message_count(2),
        );
        assert!(TimelineOrdering.check(&unordered).is_err());
    }

    #[test]
    fn activity_must_cover_newest_confirmed() {
        let behind = client_with(
            vec![message("m1", 50, None)],
            RoomSnapshot::with_activity(40).with_message_count(1),
        );
        assert!(ActivityCoversNewestMessage.check(&behind).is_err());

        let mut pending = message("local-1", 90, Some("local-1"));
        pending.delivery_state = DeliveryState::Pending;
        let ahead_pending = client_with(
            vec![message("m1", 50, None), pending],
            RoomSnapshot::with_activity(50).with_message_count(1),
        );
        assert!(ActivityCoversNewestMessage.check(&ahead_pending).is_ok());
        assert!(MessageCountCoversTimeline.check(&ahead_pending).is_ok());
    }

    #[test]
    fn activity_regression_is_detected() {
        let mut client = ClientSnapshot::new(0);
        client.record_activity("r1".into(), 10);
        client.record_activity("r1".into(), 20);
        assert!(ActivityMonotonicity.check(&SystemSnapshot::single(client.clone())).is_ok());

        client.record_activity("r1".into(), 15);
        assert!(ActivityMonotonicity.check(&SystemSnapshot::single(client)).is_err());
    }

    #[test]
    fn active_room_with_unread_is_detected() {
        let id = RoomId::from("r1");
        let client = ClientSnapshot::new(0)
            .with_active_room(Some(id.clone()))
            .with_room(id, RoomSnapshot::with_activity(0).with_unread(1));
        assert!(ActiveRoomHasNoUnread.check(&SystemSnapshot::single(client)).is_err());
    }
}
