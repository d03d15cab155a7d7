//! Property tests for the message timeline.
//!
//! The final timeline must not depend on the order in which history pages,
//! push events and send responses arrive.

use std::time::Duration;

use chatsync_core::{DeliveryState, Message, MessageDraft, Session, Timeline};
use chatsync_proto::{MessageId, MessageKind};
use proptest::prelude::*;

const GRACE: Duration = Duration::from_secs(10);

fn message(id: u32, created_at: u64) -> Message {
    Message {
        id: MessageId::new(format!("m{id:04}")),
        room_id: "r".into(),
        sender_id: "peer".into(),
        sender_display_name: "Peer".into(),
        body: format!("message {id}"),
        kind: MessageKind::Text,
        attachment_ref: None,
        created_at,
        read_by_others: false,
        delivery_state: DeliveryState::Confirmed,
        client_ref: None,
    }
}

/// Unique ids with colliding timestamps to exercise tie-breaking.
fn arb_messages() -> impl Strategy<Value = Vec<Message>> {
    prop::collection::btree_map(0u32..500, 0u64..50, 1..40)
        .prop_map(|map| map.into_iter().map(|(id, at)| message(id, at)).collect())
}

#[derive(Debug, Clone)]
enum Delivery {
    History(Vec<usize>),
    Push(usize),
}

fn arb_deliveries(len: usize) -> impl Strategy<Value = Vec<Delivery>> {
    let one = prop_oneof![
        prop::collection::vec(0..len, 0..len.max(1)).prop_map(Delivery::History),
        (0..len).prop_map(Delivery::Push),
    ];
    prop::collection::vec(one, 0..30)
}

fn ids(timeline: &Timeline) -> Vec<String> {
    timeline.iter().map(|m| m.id.to_string()).collect()
}

fn expected_order(messages: &[Message]) -> Vec<String> {
    let mut sorted: Vec<_> = messages.iter().map(|m| (m.created_at, m.id.clone())).collect();
    sorted.sort();
    sorted.into_iter().map(|(_, id)| id.to_string()).collect()
}

proptest! {
    #[test]
    fn order_is_independent_of_arrival(
        (messages, shuffled) in arb_messages().prop_flat_map(|messages| {
            let shuffled = Just(messages.clone()).prop_shuffle();
            (Just(messages), shuffled)
        }),
    ) {
        let mut timeline = Timeline::new("r".into(), GRACE);
        for message in shuffled {
            timeline.append_from_push(message);
        }

        prop_assert_eq!(ids(&timeline), expected_order(&messages));
    }

    #[test]
    fn interleaved_history_and_push_converge(
        (messages, deliveries) in arb_messages().prop_flat_map(|messages| {
            let len = messages.len();
            (Just(messages), arb_deliveries(len))
        }),
    ) {
        let mut timeline = Timeline::new("r".into(), GRACE);
        for delivery in deliveries {
            match delivery {
                Delivery::History(indices) => {
                    timeline.merge_history(indices.into_iter().map(|i| messages[i].clone()));
                },
                Delivery::Push(index) => {
                    timeline.append_from_push(messages[index].clone());
                },
            }
        }
        // Final full resync.
        timeline.merge_history(messages.clone());

        prop_assert_eq!(ids(&timeline), expected_order(&messages));
        prop_assert_eq!(timeline.accepted_count(), messages.len() as u64);
    }

    #[test]
    fn history_merge_is_idempotent(messages in arb_messages()) {
        let mut timeline = Timeline::new("r".into(), GRACE);
        timeline.merge_history(messages.clone());
        let before = ids(&timeline);

        let summary = timeline.merge_history(messages);
        prop_assert!(!summary.is_change());
        prop_assert_eq!(ids(&timeline), before);
    }

    #[test]
    fn optimistic_send_collapses_regardless_of_confirmation_order(
        order in Just(vec![0u8, 1, 2]).prop_shuffle(),
        server_at in 0u64..100_000,
        local_at in 0u64..100_000,
    ) {
        let session = Session::new("me", "Me");
        let mut timeline = Timeline::new("r".into(), GRACE);
        let provisional = timeline.append_optimistic(
            MessageDraft::text("r", "hello"),
            "local-1".into(),
            &session,
            local_at,
        );

        let authoritative = Message {
            id: "s1".into(),
            sender_id: "me".into(),
            body: "hello".into(),
            client_ref: Some("local-1".into()),
            ..message(0, server_at)
        };
        for step in order {
            match step {
                0 => {
                    timeline.confirm(&provisional, authoritative.clone());
                },
                1 => {
                    timeline.append_from_push(authoritative.clone());
                },
                _ => {
                    timeline.merge_history([authoritative.clone()]);
                },
            }
        }

        prop_assert_eq!(timeline.len(), 1);
        prop_assert_eq!(timeline.accepted_count(), 1);
        let only = timeline.iter().next();
        prop_assert!(only.is_some_and(|m| m.id.as_str() == "s1"
            && m.delivery_state == DeliveryState::Confirmed));
    }
}

#[test]
fn concrete_out_of_order_scenario() {
    let mut timeline = Timeline::new("r".into(), GRACE);
    let m1 = Message { id: "m1".into(), ..message(1, 10) };
    let m2 = Message { id: "m2".into(), ..message(2, 20) };
    let m3 = Message { id: "m3".into(), ..message(3, 15) };

    timeline.append_from_push(m1);
    timeline.append_from_push(m2);
    timeline.append_from_push(m3);

    let order: Vec<_> = timeline.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(order, vec!["m1", "m3", "m2"]);
}
