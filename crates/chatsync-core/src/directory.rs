//! Room directory.
//!
//! Rooms keyed by id, plus the focus (active room) and an insertion recency
//! order used to break ties between rooms with the same activity time.
//! Rooms are never removed while a session is running; closed rooms stay
//! listed with `active` cleared.

use std::collections::{HashMap, VecDeque};

use chatsync_proto::{RoomId, RoomKind};

use crate::model::{Message, Room};

/// Outcome of [`RoomDirectory::apply_room_changed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomChange {
    /// Room was not known before
    Inserted,
    /// Known room, some field changed
    Updated,
    /// Known room, nothing changed
    Unchanged,
}

/// Rooms visible to the session user.
#[derive(Debug, Clone, Default)]
pub struct RoomDirectory {
    rooms: HashMap<RoomId, Room>,
    /// Front is the most recently inserted room.
    recency: VecDeque<RoomId>,
    active: Option<RoomId>,
    loaded: bool,
}

impl RoomDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a fetched room list.
    ///
    /// Every listed room is upserted with the same merge rules as
    /// [`apply_room_changed`](Self::apply_room_changed). Rooms missing from
    /// the list are kept: a room is never removed while the session runs,
    /// and one created after the list was produced must not vanish. Rooms
    /// new to the directory go to the head of the recency order, keeping the
    /// list's relative order.
    pub fn replace_all(&mut self, rooms: impl IntoIterator<Item = Room>) {
        let mut fresh = Vec::new();
        for room in rooms {
            if let Some(existing) = self.rooms.get_mut(&room.id) {
                merge_room(existing, room);
            } else {
                fresh.push(room.id.clone());
                self.rooms.insert(room.id.clone(), room);
            }
        }
        for id in fresh.into_iter().rev() {
            self.recency.push_front(id);
        }
        self.loaded = true;
    }

    /// Whether a room list has been applied.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Upsert a room from a push event or create-room response.
    ///
    /// Summary fields of a known room are merged: activity never regresses,
    /// the message count never shrinks and the kind never changes.
    pub fn apply_room_changed(&mut self, room: Room) -> RoomChange {
        match self.rooms.get_mut(&room.id) {
            Some(existing) => {
                let before = existing.clone();
                merge_room(existing, room);
                if *existing == before { RoomChange::Unchanged } else { RoomChange::Updated }
            },
            None => {
                self.recency.push_front(room.id.clone());
                self.rooms.insert(room.id.clone(), room);
                RoomChange::Inserted
            },
        }
    }

    /// Fold an accepted message into the room summary.
    ///
    /// `accepted` is the number of distinct authoritative messages the room's
    /// timeline holds. Provisional messages carry a local clock reading and
    /// never move activity or the preview. Returns `false` if the room is
    /// unknown.
    pub fn note_message(&mut self, message: &Message, accepted: u64) -> bool {
        let Some(room) = self.rooms.get_mut(&message.room_id) else {
            return false;
        };

        if !message.is_provisional() && message.created_at >= room.last_activity_at {
            room.last_activity_at = message.created_at;
            room.last_message_preview = Some(message.preview());
        }
        room.message_count = room.message_count.max(accepted);
        true
    }

    /// Focus a room. Unknown ids return `None` and leave the focus unchanged.
    pub fn set_active_room(&mut self, room_id: &RoomId) -> Option<&Room> {
        let room = self.rooms.get(room_id)?;
        self.active = Some(room_id.clone());
        Some(room)
    }

    /// Drop the focus.
    pub fn clear_active_room(&mut self) {
        self.active = None;
    }

    /// Id of the focused room.
    pub fn active_room_id(&self) -> Option<&RoomId> {
        self.active.as_ref()
    }

    /// The focused room.
    pub fn active_room(&self) -> Option<&Room> {
        self.active.as_ref().and_then(|id| self.rooms.get(id))
    }

    /// Look up a room.
    pub fn get(&self, room_id: &RoomId) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    /// Whether a room is known.
    pub fn contains(&self, room_id: &RoomId) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Number of known rooms.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Whether no room is known.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Rooms of one kind, newest activity first.
    ///
    /// Ties are broken by recency of insertion. Computed fresh on every call.
    pub fn list_for_kind(&self, kind: RoomKind) -> impl Iterator<Item = &Room> + '_ {
        self.sorted(Some(kind)).into_iter()
    }

    /// Every room, newest activity first. Inactive rooms are included.
    pub fn list_all(&self) -> impl Iterator<Item = &Room> + '_ {
        self.sorted(None).into_iter()
    }

    fn sorted(&self, kind: Option<RoomKind>) -> Vec<&Room> {
        let mut rooms: Vec<(usize, &Room)> = self
            .recency
            .iter()
            .enumerate()
            .filter_map(|(position, id)| self.rooms.get(id).map(|room| (position, room)))
            .filter(|(_, room)| kind.is_none_or(|kind| room.kind == kind))
            .collect();

        rooms.sort_by(|(pa, a), (pb, b)| {
            b.last_activity_at.cmp(&a.last_activity_at).then_with(|| pa.cmp(pb))
        });
        rooms.into_iter().map(|(_, room)| room).collect()
    }
}

fn merge_room(existing: &mut Room, incoming: Room) {
    if incoming.kind != existing.kind {
        tracing::debug!(
            room = %existing.id,
            old = %existing.kind,
            new = %incoming.kind,
            "ignoring room kind change"
        );
    }
    if !incoming.title.is_empty() {
        existing.title = incoming.title;
    }
    if !incoming.participant_ids.is_empty() {
        existing.participant_ids = incoming.participant_ids;
    }
    if existing.created_by.is_none() {
        existing.created_by = incoming.created_by;
    }
    if let Some(creator) = &existing.created_by {
        existing.participant_ids.insert(creator.clone());
    }
    if incoming.last_activity_at >= existing.last_activity_at {
        existing.last_activity_at = incoming.last_activity_at;
        if incoming.last_message_preview.is_some() {
            existing.last_message_preview = incoming.last_message_preview;
        }
    }
    existing.message_count = existing.message_count.max(incoming.message_count);
    existing.active = incoming.active;
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::model::DeliveryState;

    fn room(id: &str, kind: RoomKind, last_activity_at: u64) -> Room {
        Room {
            id: id.into(),
            title: format!("room {id}"),
            kind,
            participant_ids: BTreeSet::from(["me".into()]),
            created_by: None,
            last_message_preview: None,
            last_activity_at,
            message_count: 0,
            active: true,
        }
    }

    fn message(room: &str, created_at: u64, body: &str) -> Message {
        Message {
            id: format!("m{created_at}").into(),
            room_id: room.into(),
            sender_id: "peer".into(),
            sender_display_name: "Peer".into(),
            body: body.into(),
            kind: chatsync_proto::MessageKind::Text,
            attachment_ref: None,
            created_at,
            read_by_others: false,
            delivery_state: DeliveryState::Confirmed,
            client_ref: None,
        }
    }

    fn ids<'a>(rooms: impl Iterator<Item = &'a Room>) -> Vec<&'a str> {
        rooms.map(|room| room.id.as_str()).collect()
    }

    #[test]
    fn lists_by_activity_then_recency() {
        let mut directory = RoomDirectory::new();
        directory.replace_all([
            room("a", RoomKind::Group, 10),
            room("b", RoomKind::Group, 30),
            room("c", RoomKind::Group, 10),
            room("d", RoomKind::Mentoring, 99),
        ]);

        assert_eq!(ids(directory.list_for_kind(RoomKind::Group)), vec!["b", "a", "c"]);
        assert_eq!(ids(directory.list_all()), vec!["d", "b", "a", "c"]);
    }

    #[test]
    fn new_room_goes_to_head_of_recency() {
        let mut directory = RoomDirectory::new();
        directory.replace_all([room("a", RoomKind::Group, 10)]);

        let change = directory.apply_room_changed(room("z", RoomKind::Group, 10));
        assert_eq!(change, RoomChange::Inserted);
        assert_eq!(ids(directory.list_all()), vec!["z", "a"]);
    }

    #[test]
    fn merge_never_regresses_activity_or_kind() {
        let mut directory = RoomDirectory::new();
        directory.replace_all([room("a", RoomKind::Counseling, 50)]);

        let mut stale = room("a", RoomKind::Group, 20);
        stale.last_message_preview = Some("old".into());
        stale.title = "renamed".into();
        assert_eq!(directory.apply_room_changed(stale), RoomChange::Updated);

        let merged = directory.get(&"a".into()).unwrap();
        assert_eq!(merged.last_activity_at, 50);
        assert_eq!(merged.kind, RoomKind::Counseling);
        assert_eq!(merged.title, "renamed");
        assert_eq!(merged.last_message_preview, None);
    }

    #[test]
    fn identical_update_is_unchanged() {
        let mut directory = RoomDirectory::new();
        directory.replace_all([room("a", RoomKind::Group, 5)]);
        assert_eq!(
            directory.apply_room_changed(room("a", RoomKind::Group, 5)),
            RoomChange::Unchanged
        );
    }

    #[test]
    fn inactive_rooms_stay_listed() {
        let mut directory = RoomDirectory::new();
        directory.replace_all([room("a", RoomKind::Group, 5)]);

        let mut closed = room("a", RoomKind::Group, 5);
        closed.active = false;
        directory.apply_room_changed(closed);

        let listed: Vec<_> = directory.list_for_kind(RoomKind::Group).collect();
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].active);
    }

    #[test]
    fn note_message_updates_summary_monotonically() {
        let mut directory = RoomDirectory::new();
        directory.replace_all([room("a", RoomKind::Group, 100)]);

        assert!(directory.note_message(&message("a", 150, "newest"), 3));
        assert!(directory.note_message(&message("a", 120, "older"), 4));

        let summary = directory.get(&"a".into()).unwrap();
        assert_eq!(summary.last_activity_at, 150);
        assert_eq!(summary.last_message_preview.as_deref(), Some("newest"));
        assert_eq!(summary.message_count, 4);

        assert!(!directory.note_message(&message("unknown", 1, "x"), 1));
    }

    #[test]
    fn provisional_message_does_not_move_activity() {
        let mut directory = RoomDirectory::new();
        directory.replace_all([room("a", RoomKind::Group, 100)]);

        // A client clock an hour ahead of the server.
        let mut ahead = message("a", 100 + 3_600_000, "mine");
        ahead.delivery_state = DeliveryState::Pending;
        assert!(directory.note_message(&ahead, 0));
        assert!(directory.note_message(&message("a", 200, "from peer"), 1));

        let summary = directory.get(&"a".into()).unwrap();
        assert_eq!(summary.last_activity_at, 200);
        assert_eq!(summary.last_message_preview.as_deref(), Some("from peer"));
    }

    #[test]
    fn set_active_room_rejects_unknown_ids() {
        let mut directory = RoomDirectory::new();
        directory.replace_all([room("a", RoomKind::Group, 1)]);

        assert!(directory.set_active_room(&"a".into()).is_some());
        assert!(directory.set_active_room(&"nope".into()).is_none());
        assert_eq!(directory.active_room_id().map(RoomId::as_str), Some("a"));
    }

    #[test]
    fn replace_all_keeps_unlisted_rooms_and_focus() {
        let mut directory = RoomDirectory::new();
        directory.replace_all([room("a", RoomKind::Group, 1), room("b", RoomKind::Group, 1)]);
        directory.set_active_room(&"a".into());

        directory.replace_all([room("b", RoomKind::Group, 2), room("c", RoomKind::Group, 1)]);
        assert_eq!(directory.len(), 3);
        assert_eq!(directory.active_room().map(|r| r.id.as_str()), Some("a"));
        assert_eq!(ids(directory.list_all()), vec!["b", "c", "a"]);
        assert!(directory.is_loaded());
    }
}
