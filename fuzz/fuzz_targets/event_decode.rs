//! Fuzz target for push envelope decoding
//!
//! Arbitrary bytes are parsed as an envelope and, if that succeeds, decoded
//! into a push event. Decoding is total: anything malformed must come back
//! as `Unrecognized`, never as a panic.

#![no_main]

use chatsync_proto::{MessageKind, PushEvent, RawEvent, decode};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = RawEvent::from_slice(data) else {
        return;
    };
    match decode(&raw) {
        PushEvent::RoomChanged(room) => assert!(!room.participant_ids.is_empty()),
        PushEvent::MessageCreated(message) => {
            assert!(message.kind != MessageKind::Text || !message.body.is_empty());
        },
        PushEvent::Unrecognized(_) => {},
    }
});
