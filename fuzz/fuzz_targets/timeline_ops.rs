//! Fuzz target for timeline reconciliation
//!
//! Drives one timeline through arbitrary interleavings of history merges,
//! push arrivals, optimistic sends, confirmations, failures and discards.
//!
//! # Invariants
//!
//! - Message ids are unique
//! - Messages that were never local sends stay in `(created_at, id)` order
//! - Every id returned by `get` resolves to an entry in `iter`
//! - NEVER panic

#![no_main]

use std::{collections::HashSet, time::Duration};

use arbitrary::Arbitrary;
use chatsync_core::{DeliveryState, Message, MessageDraft, Session, Timeline};
use chatsync_proto::{MessageId, MessageKind};
use libfuzzer_sys::fuzz_target;

const ROOM: &str = "r1";

#[derive(Debug, Arbitrary)]
enum Op {
    Push { id: u8, at: u16, own: bool, body: u8, client_ref: Option<u8> },
    History { ids: Vec<(u8, u16)> },
    Send { body: u8, at: u16 },
    Confirm { send: u8, id: u8, at: u16 },
    Fail { send: u8 },
    Discard { send: u8 },
}

fn message(id: u8, at: u16, own: bool, body: u8, client_ref: Option<String>) -> Message {
    let sender = if own { "alice" } else { "bob" };
    Message {
        id: MessageId::new(format!("m{id}")),
        room_id: ROOM.into(),
        sender_id: sender.into(),
        sender_display_name: sender.to_owned(),
        body: format!("body {body}"),
        kind: MessageKind::Text,
        attachment_ref: None,
        created_at: u64::from(at),
        read_by_others: false,
        delivery_state: DeliveryState::Confirmed,
        client_ref,
    }
}

fuzz_target!(|ops: Vec<Op>| {
    let session = Session::new("alice", "Alice");
    let mut timeline = Timeline::new(ROOM.into(), Duration::from_millis(500));
    let mut sends: Vec<MessageId> = Vec::new();

    for op in ops {
        match op {
            Op::Push { id, at, own, body, client_ref } => {
                let client_ref = client_ref
                    .and_then(|i| sends.get(usize::from(i) % sends.len().max(1)))
                    .map(ToString::to_string);
                timeline.append_from_push(message(id, at, own, body, client_ref));
            },
            Op::History { ids } => {
                let page = ids.into_iter().map(|(id, at)| message(id, at, false, id, None));
                timeline.merge_history(page);
            },
            Op::Send { body, at } => {
                let provisional = MessageId::new(format!("local-{}", sends.len()));
                let draft = MessageDraft::text(ROOM, format!("body {body}"));
                sends.push(timeline.append_optimistic(
                    draft,
                    provisional,
                    &session,
                    u64::from(at),
                ));
            },
            Op::Confirm { send, id, at } => {
                if let Some(provisional) = sends.get(usize::from(send) % sends.len().max(1)) {
                    let client_ref = Some(provisional.to_string());
                    timeline.confirm(provisional, message(id, at, true, send, client_ref));
                }
            },
            Op::Fail { send } => {
                if let Some(provisional) = sends.get(usize::from(send) % sends.len().max(1)) {
                    timeline.mark_failed(provisional);
                }
            },
            Op::Discard { send } => {
                if let Some(provisional) = sends.get(usize::from(send) % sends.len().max(1)) {
                    timeline.discard(provisional);
                }
            },
        }
    }

    let mut seen = HashSet::new();
    for entry in timeline.iter() {
        assert!(seen.insert(entry.id.clone()), "duplicate {}", entry.id);
    }

    let remote: Vec<_> = timeline
        .iter()
        .filter(|m| m.client_ref.is_none())
        .map(|m| (m.created_at, m.id.clone()))
        .collect();
    assert!(remote.windows(2).all(|w| w[0] <= w[1]), "out of order: {remote:?}");

    for id in &sends {
        if let Some(entry) = timeline.get(id) {
            assert!(seen.contains(&entry.id));
        }
    }
});
