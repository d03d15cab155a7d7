//! Per-room message timeline.
//!
//! Three sources feed a timeline: history fetches, push events and local
//! optimistic sends. All of them go through one acceptance path that
//! deduplicates by authoritative id and collapses a pending entry with its
//! confirmed counterpart, so the result is independent of the order in
//! which the sources deliver.
//!
//! # Ordering
//!
//! Authoritative messages are ordered by `(created_at, id)`. Provisional
//! entries are anchored at `max(local clock, newest entry)` and ordered among
//! themselves by a local counter, which keeps them at the bottom while they
//! are in flight. A confirmed entry keeps the position it had while pending.

use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

use chatsync_proto::{MessageId, RoomId};

use crate::model::{DeliveryState, Message, MessageDraft, Session, Timestamp};

/// Secondary ordering component.
///
/// Authoritative entries sort before provisional ones at the same timestamp.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Tiebreak {
    Authoritative(MessageId),
    Provisional(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct OrderKey {
    at: Timestamp,
    tie: Tiebreak,
}

/// Outcome of accepting one authoritative message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accepted {
    /// New entry
    Inserted,
    /// A provisional entry was confirmed in place
    Confirmed {
        /// Id the entry carried while provisional
        provisional_id: MessageId,
    },
    /// Already present; some server-owned field changed
    Updated,
    /// Already present, nothing changed
    Duplicate,
    /// Message belongs to another room
    Ignored,
}

impl Accepted {
    /// Whether the timeline changed.
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Inserted | Self::Confirmed { .. } | Self::Updated)
    }
}

/// Counts of what a history merge did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// New entries
    pub inserted: usize,
    /// Provisional entries confirmed
    pub confirmed: usize,
    /// Known entries with changed server-owned fields
    pub updated: usize,
    /// Known entries left untouched
    pub duplicates: usize,
}

impl MergeSummary {
    /// Whether the merge changed anything.
    pub fn is_change(&self) -> bool {
        self.inserted + self.confirmed + self.updated > 0
    }

    fn record(&mut self, outcome: &Accepted) {
        match outcome {
            Accepted::Inserted => self.inserted += 1,
            Accepted::Confirmed { .. } => self.confirmed += 1,
            Accepted::Updated => self.updated += 1,
            Accepted::Duplicate | Accepted::Ignored => self.duplicates += 1,
        }
    }
}

/// Ordered, duplicate-free messages of one room.
#[derive(Debug, Clone)]
pub struct Timeline {
    room_id: RoomId,
    entries: BTreeMap<OrderKey, Message>,
    /// Authoritative and provisional ids to their entry.
    by_id: HashMap<MessageId, OrderKey>,
    next_seq: u64,
    accepted: u64,
    grace_window_ms: u64,
}

impl Timeline {
    /// Empty timeline for `room_id`.
    pub fn new(room_id: RoomId, grace_window: Duration) -> Self {
        Self {
            room_id,
            entries: BTreeMap::new(),
            by_id: HashMap::new(),
            next_seq: 0,
            accepted: 0,
            grace_window_ms: u64::try_from(grace_window.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Owning room.
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Messages in display order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Message> + '_ {
        self.entries.values()
    }

    /// Number of entries, provisional included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the timeline has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by authoritative or provisional id.
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.by_id.get(id).and_then(|key| self.entries.get(key))
    }

    /// Distinct authoritative messages accepted so far.
    pub fn accepted_count(&self) -> u64 {
        self.accepted
    }

    /// Entries still waiting for confirmation.
    pub fn pending_count(&self) -> usize {
        self.entries.values().filter(|m| m.delivery_state == DeliveryState::Pending).count()
    }

    /// Newest creation time of any entry.
    pub fn newest_created_at(&self) -> Option<Timestamp> {
        self.entries.values().map(|m| m.created_at).max()
    }

    /// Newest entry in display order.
    pub fn last(&self) -> Option<&Message> {
        self.entries.values().next_back()
    }

    /// Merge a fetched history page. Idempotent.
    pub fn merge_history(&mut self, messages: impl IntoIterator<Item = Message>) -> MergeSummary {
        let mut summary = MergeSummary::default();
        for message in messages {
            let outcome = self.accept(message);
            summary.record(&outcome);
        }
        summary
    }

    /// Accept one message delivered by the push channel.
    pub fn append_from_push(&mut self, message: Message) -> Accepted {
        self.accept(message)
    }

    /// Insert a pending entry for a message this session is about to send.
    ///
    /// `now` is the local wall clock; it becomes the entry's `created_at`
    /// until the backend assigns one.
    pub fn append_optimistic(
        &mut self,
        draft: MessageDraft,
        provisional_id: MessageId,
        sender: &Session,
        now: Timestamp,
    ) -> MessageId {
        let newest = self.entries.keys().next_back().map_or(0, |key| key.at);
        let key = OrderKey { at: now.max(newest), tie: Tiebreak::Provisional(self.next_seq) };
        self.next_seq += 1;

        let message = Message {
            id: provisional_id.clone(),
            room_id: self.room_id.clone(),
            sender_id: sender.user_id.clone(),
            sender_display_name: sender.display_name.clone(),
            body: draft.body,
            kind: draft.kind,
            attachment_ref: draft.attachment_ref,
            created_at: now,
            read_by_others: false,
            delivery_state: DeliveryState::Pending,
            client_ref: Some(provisional_id.to_string()),
        };

        self.by_id.insert(provisional_id.clone(), key.clone());
        self.entries.insert(key, message);
        provisional_id
    }

    /// Reconcile a provisional entry with the backend's send response.
    ///
    /// Works for pending and failed entries alike: a send that was marked
    /// failed after a timeout but did land is confirmed. If the entry was
    /// already confirmed under a different id, or was discarded, the response
    /// is accepted as a regular message.
    pub fn confirm(&mut self, provisional_id: &MessageId, message: Message) -> Accepted {
        if message.room_id != self.room_id {
            return Accepted::Ignored;
        }

        let Some(key) = self.by_id.get(provisional_id).cloned() else {
            return self.accept(message);
        };
        let Some(entry) = self.entries.get(&key) else {
            return self.accept(message);
        };

        if entry.id == *provisional_id {
            if self.by_id.contains_key(&message.id) {
                // The echo landed as its own entry first; fold the
                // provisional one into it.
                self.entries.remove(&key);
                if let Some(existing) = self.by_id.get(&message.id).cloned() {
                    self.by_id.insert(provisional_id.clone(), existing);
                }
                self.merge_known(&message.id, &message);
                return Accepted::Confirmed { provisional_id: provisional_id.clone() };
            }
            return self.confirm_at(key, message);
        }

        if entry.id == message.id {
            return self.merge_known(&message.id, &message);
        }
        if self.by_id.contains_key(&message.id) {
            return self.merge_known(&message.id, &message);
        }
        // A content match confirmed this entry with another message.
        self.insert_new(message)
    }

    /// Mark a pending entry failed. Returns `false` if there is no pending
    /// entry under `provisional_id`.
    pub fn mark_failed(&mut self, provisional_id: &MessageId) -> bool {
        match self.provisional_entry_mut(provisional_id) {
            Some(entry) if entry.delivery_state == DeliveryState::Pending => {
                entry.delivery_state = DeliveryState::Failed;
                true
            },
            _ => false,
        }
    }

    /// Remove a failed entry.
    pub fn discard(&mut self, provisional_id: &MessageId) -> Option<Message> {
        let key = self.by_id.get(provisional_id)?.clone();
        let entry = self.entries.get(&key)?;
        if entry.id != *provisional_id || entry.delivery_state != DeliveryState::Failed {
            return None;
        }
        self.by_id.remove(provisional_id);
        self.entries.remove(&key)
    }

    fn accept(&mut self, message: Message) -> Accepted {
        if message.room_id != self.room_id {
            tracing::debug!(
                room = %self.room_id,
                message_room = %message.room_id,
                "ignoring message for another room"
            );
            return Accepted::Ignored;
        }

        if self.by_id.contains_key(&message.id) {
            return self.merge_known(&message.id, &message);
        }

        if let Some(key) = self.find_provisional_match(&message) {
            return self.confirm_at(key, message);
        }

        self.insert_new(message)
    }

    fn find_provisional_match(&self, message: &Message) -> Option<OrderKey> {
        if let Some(client_ref) = &message.client_ref
            && let Some(key) = self.by_id.get(&MessageId::from(client_ref.as_str()))
            && self
                .entries
                .get(key)
                .is_some_and(|e| e.is_provisional() && e.id.as_str() == client_ref)
        {
            return Some(key.clone());
        }

        // A token that names none of our entries belongs to another send,
        // possibly from another device of the same user.
        if message.client_ref.is_some() {
            return None;
        }

        // Content match is only for pending entries: a failed entry is
        // waiting for the user, and a send response will still reconcile it.
        self.entries
            .iter()
            .find(|(_, entry)| {
                entry.delivery_state == DeliveryState::Pending
                    && entry.sender_id == message.sender_id
                    && entry.kind == message.kind
                    && entry.body == message.body
                    && entry.created_at.abs_diff(message.created_at) <= self.grace_window_ms
            })
            .map(|(key, _)| key.clone())
    }

    fn confirm_at(&mut self, key: OrderKey, message: Message) -> Accepted {
        let Some(entry) = self.entries.get_mut(&key) else {
            return Accepted::Ignored;
        };
        let provisional_id = entry.id.clone();
        let client_ref = message.client_ref.clone().or_else(|| entry.client_ref.clone());

        *entry = Message { delivery_state: DeliveryState::Confirmed, client_ref, ..message };
        self.by_id.insert(entry.id.clone(), key);
        self.accepted += 1;
        Accepted::Confirmed { provisional_id }
    }

    fn insert_new(&mut self, message: Message) -> Accepted {
        let key =
            OrderKey { at: message.created_at, tie: Tiebreak::Authoritative(message.id.clone()) };
        self.by_id.insert(message.id.clone(), key.clone());
        self.entries.insert(key, Message { delivery_state: DeliveryState::Confirmed, ..message });
        self.accepted += 1;
        Accepted::Inserted
    }

    fn merge_known(&mut self, id: &MessageId, incoming: &Message) -> Accepted {
        let Some(entry) = self.by_id.get(id).and_then(|key| self.entries.get_mut(key)) else {
            return Accepted::Duplicate;
        };
        if incoming.read_by_others && !entry.read_by_others {
            entry.read_by_others = true;
            return Accepted::Updated;
        }
        Accepted::Duplicate
    }

    fn provisional_entry_mut(&mut self, provisional_id: &MessageId) -> Option<&mut Message> {
        let key = self.by_id.get(provisional_id)?;
        self.entries.get_mut(key).filter(|entry| entry.id == *provisional_id)
    }
}

#[cfg(test)]
mod tests {
    use chatsync_proto::MessageKind;

    use super::*;

    const GRACE: Duration = Duration::from_secs(10);

    fn session() -> Session {
        Session::new("me", "Me")
    }

    fn msg(id: &str, created_at: Timestamp) -> Message {
        Message {
            id: id.into(),
            room_id: "r".into(),
            sender_id: "peer".into(),
            sender_display_name: "Peer".into(),
            body: format!("body of {id}"),
            kind: MessageKind::Text,
            attachment_ref: None,
            created_at,
            read_by_others: false,
            delivery_state: DeliveryState::Confirmed,
            client_ref: None,
        }
    }

    fn own(id: &str, body: &str, created_at: Timestamp, client_ref: Option<&str>) -> Message {
        Message {
            sender_id: "me".into(),
            body: body.into(),
            client_ref: client_ref.map(str::to_owned),
            ..msg(id, created_at)
        }
    }

    fn ids(timeline: &Timeline) -> Vec<&str> {
        timeline.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn out_of_order_arrivals_sort_by_created_at() {
        let mut timeline = Timeline::new("r".into(), GRACE);
        timeline.append_from_push(msg("m1", 10));
        timeline.append_from_push(msg("m2", 20));
        timeline.append_from_push(msg("m3", 15));

        assert_eq!(ids(&timeline), vec!["m1", "m3", "m2"]);
    }

    #[test]
    fn equal_timestamps_break_ties_by_id() {
        let mut timeline = Timeline::new("r".into(), GRACE);
        timeline.append_from_push(msg("b", 10));
        timeline.append_from_push(msg("a", 10));

        assert_eq!(ids(&timeline), vec!["a", "b"]);
    }

    #[test]
    fn history_merge_is_idempotent() {
        let mut timeline = Timeline::new("r".into(), GRACE);
        let page = vec![msg("m1", 1), msg("m2", 2), msg("m3", 3)];

        let first = timeline.merge_history(page.clone());
        assert_eq!(first.inserted, 3);
        let second = timeline.merge_history(page);
        assert_eq!(second.duplicates, 3);
        assert!(!second.is_change());
        assert_eq!(ids(&timeline), vec!["m1", "m2", "m3"]);
        assert_eq!(timeline.accepted_count(), 3);
    }

    #[test]
    fn read_by_others_is_or_merged() {
        let mut timeline = Timeline::new("r".into(), GRACE);
        timeline.append_from_push(msg("m1", 1));

        let read = Message { read_by_others: true, ..msg("m1", 1) };
        assert_eq!(timeline.append_from_push(read), Accepted::Updated);
        assert_eq!(timeline.append_from_push(msg("m1", 1)), Accepted::Duplicate);
        assert!(timeline.get(&"m1".into()).unwrap().read_by_others);
    }

    #[test]
    fn optimistic_entry_confirmed_by_send_response_keeps_position() {
        let mut timeline = Timeline::new("r".into(), GRACE);
        timeline.append_from_push(msg("m1", 100));
        let provisional = timeline.append_optimistic(
            MessageDraft::text("r", "hello"),
            "local-1".into(),
            &session(),
            90,
        );
        assert_eq!(timeline.get(&provisional).unwrap().delivery_state, DeliveryState::Pending);
        assert_eq!(ids(&timeline), vec!["m1", "local-1"]);

        // Server stamped it earlier than m1 but the entry does not jump.
        let outcome = timeline.confirm(&provisional, own("s1", "hello", 95, Some("local-1")));
        assert_eq!(outcome, Accepted::Confirmed { provisional_id: provisional.clone() });
        assert_eq!(ids(&timeline), vec!["m1", "s1"]);
        assert_eq!(timeline.get(&"s1".into()).unwrap().delivery_state, DeliveryState::Confirmed);

        // Echo afterwards is a duplicate.
        let echo = own("s1", "hello", 95, Some("local-1"));
        assert_eq!(timeline.append_from_push(echo), Accepted::Duplicate);
        assert_eq!(timeline.len(), 2);
    }

    #[test]
    fn echo_with_client_ref_confirms_before_send_response() {
        let mut timeline = Timeline::new("r".into(), GRACE);
        let provisional = timeline.append_optimistic(
            MessageDraft::text("r", "hi"),
            "local-1".into(),
            &session(),
            50,
        );

        let echo = own("s1", "hi", 55, Some("local-1"));
        assert!(matches!(timeline.append_from_push(echo.clone()), Accepted::Confirmed { .. }));
        assert_eq!(timeline.confirm(&provisional, echo), Accepted::Duplicate);
        assert_eq!(ids(&timeline), vec!["s1"]);
        assert_eq!(timeline.accepted_count(), 1);
    }

    #[test]
    fn uncorrelated_echo_matches_by_content_within_grace_window() {
        let mut timeline = Timeline::new("r".into(), GRACE);
        timeline.append_optimistic(
            MessageDraft::text("r", "same"),
            "local-1".into(),
            &session(),
            1_000,
        );
        timeline.append_optimistic(
            MessageDraft::text("r", "same"),
            "local-2".into(),
            &session(),
            1_001,
        );

        let echo = own("s1", "same", 1_500, None);
        assert_eq!(
            timeline.append_from_push(echo),
            Accepted::Confirmed { provisional_id: "local-1".into() }
        );
        assert_eq!(ids(&timeline), vec!["s1", "local-2"]);

        // Outside the window the echo is a new message.
        let late = own("s2", "same", 1_001 + 60_000, None);
        assert_eq!(timeline.append_from_push(late), Accepted::Inserted);
        assert_eq!(timeline.pending_count(), 1);
    }

    #[test]
    fn echo_tokened_for_another_send_is_not_content_matched() {
        let mut timeline = Timeline::new("r".into(), GRACE);
        let provisional = timeline.append_optimistic(
            MessageDraft::text("r", "ok"),
            "local-new".into(),
            &session(),
            1_000,
        );

        // Same sender, body and time, but sent from another device.
        let other_device = own("s0", "ok", 1_005, Some("local-other-device"));
        assert_eq!(timeline.append_from_push(other_device), Accepted::Inserted);
        assert_eq!(timeline.pending_count(), 1);
        assert_eq!(ids(&timeline), vec!["local-new", "s0"]);

        // The local send can still fail visibly.
        assert!(timeline.mark_failed(&provisional));
        assert_eq!(timeline.get(&provisional).unwrap().delivery_state, DeliveryState::Failed);
    }

    #[test]
    fn peer_message_with_same_text_is_not_confused_with_own_pending() {
        let mut timeline = Timeline::new("r".into(), GRACE);
        timeline.append_optimistic(MessageDraft::text("r", "ok"), "local-1".into(), &session(), 10);

        let peer = Message { body: "ok".into(), ..msg("p1", 11) };
        assert_eq!(timeline.append_from_push(peer), Accepted::Inserted);
        assert_eq!(timeline.pending_count(), 1);
    }

    #[test]
    fn uncorrelated_echo_then_send_response_collapses() {
        let mut timeline = Timeline::new("r".into(), GRACE);
        let provisional = timeline.append_optimistic(
            MessageDraft::text("r", "x"),
            "local-1".into(),
            &session(),
            10,
        );

        // Echo too far from the local clock to content-match.
        timeline.append_from_push(own("s1", "x", 10 + 60_000, None));
        assert_eq!(timeline.len(), 2);

        let outcome = timeline.confirm(&provisional, own("s1", "x", 10 + 60_000, None));
        assert!(matches!(outcome, Accepted::Confirmed { .. }));
        assert_eq!(ids(&timeline), vec!["s1"]);
        assert_eq!(timeline.accepted_count(), 1);
    }

    #[test]
    fn failed_send_stays_visible_and_late_success_confirms() {
        let mut timeline = Timeline::new("r".into(), GRACE);
        let provisional = timeline.append_optimistic(
            MessageDraft::text("r", "x"),
            "local-1".into(),
            &session(),
            10,
        );

        assert!(timeline.mark_failed(&provisional));
        assert!(!timeline.mark_failed(&provisional));
        assert_eq!(timeline.get(&provisional).unwrap().delivery_state, DeliveryState::Failed);

        // A content match does not pick up failed entries.
        assert_eq!(timeline.append_from_push(own("other", "x", 11, None)), Accepted::Inserted);

        let outcome = timeline.confirm(&provisional, own("s1", "x", 12, Some("local-1")));
        assert!(matches!(outcome, Accepted::Confirmed { .. }));
        assert_eq!(timeline.get(&"s1".into()).unwrap().delivery_state, DeliveryState::Confirmed);
    }

    #[test]
    fn discard_only_removes_failed_entries() {
        let mut timeline = Timeline::new("r".into(), GRACE);
        let provisional = timeline.append_optimistic(
            MessageDraft::text("r", "x"),
            "local-1".into(),
            &session(),
            10,
        );

        assert!(timeline.discard(&provisional).is_none());
        timeline.mark_failed(&provisional);
        assert!(timeline.discard(&provisional).is_some());
        assert!(timeline.is_empty());
        assert!(timeline.get(&provisional).is_none());
    }

    #[test]
    fn provisional_entries_stay_below_newer_history() {
        let mut timeline = Timeline::new("r".into(), GRACE);
        timeline.append_from_push(msg("m1", 500));
        // Local clock behind the server.
        timeline.append_optimistic(MessageDraft::text("r", "a"), "local-1".into(), &session(), 100);
        timeline.append_optimistic(MessageDraft::text("r", "b"), "local-2".into(), &session(), 100);

        assert_eq!(ids(&timeline), vec!["m1", "local-1", "local-2"]);
    }

    #[test]
    fn messages_for_other_rooms_are_ignored() {
        let mut timeline = Timeline::new("r".into(), GRACE);
        let foreign = Message { room_id: "elsewhere".into(), ..msg("m1", 1) };
        assert_eq!(timeline.append_from_push(foreign), Accepted::Ignored);
        assert!(timeline.is_empty());
    }
}
