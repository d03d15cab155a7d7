//! Event envelope decoder.
//!
//! Maps a [`RawEvent`] to a closed set of typed events. The mapping is pure
//! and total: malformed input yields [`PushEvent::Unrecognized`].

use serde::Deserialize;

use crate::{
    dto::{MessageDto, MessageKind, RoomDto},
    errors::DecodeError,
    event::{ROOMS_CHANNEL, RawEvent},
};

/// Typed push event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    /// A room was created, updated or closed
    RoomChanged(RoomDto),
    /// A message was created
    MessageCreated(MessageDto),
    /// The envelope could not be decoded
    Unrecognized(DecodeError),
}

/// Where an envelope was published.
enum Target<'a> {
    Rooms,
    Messages(Option<&'a str>),
}

/// Decode a raw envelope.
///
/// Room events with verb `delete` are reported as a [`PushEvent::RoomChanged`]
/// with `active` cleared; rooms are never removed.
pub fn decode(raw: &RawEvent) -> PushEvent {
    match classify(raw) {
        Ok(event) => event,
        Err(reason) => PushEvent::Unrecognized(reason),
    }
}

fn classify(raw: &RawEvent) -> Result<PushEvent, DecodeError> {
    let target = parse_channel(&raw.channel)?;
    let verb = raw.event.rsplit('.').next().unwrap_or_default();

    match (target, verb) {
        (Target::Rooms, "create" | "update" | "upsert") => {
            decode_room(&raw.payload).map(PushEvent::RoomChanged)
        },
        (Target::Rooms, "delete") => {
            let mut room = decode_room(&raw.payload)?;
            room.active = false;
            Ok(PushEvent::RoomChanged(room))
        },
        (Target::Messages(channel_room), "create") => {
            let message = decode_message(&raw.payload)?;
            if let Some(channel_room) = channel_room
                && channel_room != message.room_id.as_str()
            {
                return Err(DecodeError::RoomMismatch {
                    channel_room: channel_room.to_owned(),
                    message_room: message.room_id.to_string(),
                });
            }
            Ok(PushEvent::MessageCreated(message))
        },
        _ => Err(DecodeError::UnsupportedEvent {
            channel: raw.channel.clone(),
            event: raw.event.clone(),
        }),
    }
}

fn parse_channel(channel: &str) -> Result<Target<'_>, DecodeError> {
    let mut parts = channel.splitn(3, '.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(ROOMS_CHANNEL), None, None) => Ok(Target::Rooms),
        (Some(ROOMS_CHANNEL), Some(id), None) if !id.is_empty() => Ok(Target::Rooms),
        (Some(ROOMS_CHANNEL), Some(id), Some("messages")) if !id.is_empty() => {
            Ok(Target::Messages(Some(id)))
        },
        (Some("messages"), None, None) => Ok(Target::Messages(None)),
        _ => Err(DecodeError::UnknownChannel(channel.to_owned())),
    }
}

fn decode_room(payload: &serde_json::Value) -> Result<RoomDto, DecodeError> {
    let room = RoomDto::deserialize(payload).map_err(|e| DecodeError::InvalidPayload {
        expected: "room",
        reason: e.to_string(),
    })?;

    if room.participant_ids.is_empty() {
        return Err(DecodeError::EmptyParticipants(room.id.to_string()));
    }
    Ok(room)
}

fn decode_message(payload: &serde_json::Value) -> Result<MessageDto, DecodeError> {
    let message = MessageDto::deserialize(payload).map_err(|e| DecodeError::InvalidPayload {
        expected: "message",
        reason: e.to_string(),
    })?;

    if message.kind == MessageKind::Text && message.body.is_empty() {
        return Err(DecodeError::EmptyBody(message.id.to_string()));
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{RoomKind, UserId};

    fn message_payload() -> serde_json::Value {
        json!({
            "$id": "m1",
            "roomId": "r1",
            "senderId": "alice",
            "senderDisplayName": "Alice",
            "body": "hello",
            "createdAt": 1_000,
        })
    }

    #[test]
    fn decodes_room_update() {
        let raw = RawEvent::new(
            "rooms",
            "databases.main.collections.rooms.documents.r1.update",
            json!({
                "id": "r1",
                "title": "Mentoring",
                "kind": "mentoring",
                "participantIds": ["a", "b"]
            }),
        );

        match decode(&raw) {
            PushEvent::RoomChanged(room) => {
                assert_eq!(room.kind, RoomKind::Mentoring);
                assert_eq!(room.participant_ids, vec![UserId::from("a"), UserId::from("b")]);
            },
            other => panic!("expected room change, got {other:?}"),
        }
    }

    #[test]
    fn room_delete_marks_inactive() {
        let raw = RawEvent::new(
            "rooms.r1",
            "delete",
            json!({"id": "r1", "kind": "group", "participantIds": ["a"]}),
        );

        match decode(&raw) {
            PushEvent::RoomChanged(room) => assert!(!room.active),
            other => panic!("expected room change, got {other:?}"),
        }
    }

    #[test]
    fn decodes_message_on_room_channel() {
        let raw = RawEvent::new("rooms.r1.messages", "create", message_payload());

        match decode(&raw) {
            PushEvent::MessageCreated(message) => {
                assert_eq!(message.id.as_str(), "m1");
                assert_eq!(message.created_at, 1_000);
            },
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn message_on_foreign_room_channel_is_unrecognized() {
        let raw = RawEvent::new("rooms.r2.messages", "create", message_payload());
        assert!(matches!(
            decode(&raw),
            PushEvent::Unrecognized(DecodeError::RoomMismatch { .. })
        ));
    }

    #[test]
    fn room_without_participants_is_unrecognized() {
        let raw = RawEvent::new(
            "rooms",
            "create",
            json!({"id": "r1", "kind": "group", "participantIds": []}),
        );
        assert_eq!(
            decode(&raw),
            PushEvent::Unrecognized(DecodeError::EmptyParticipants("r1".to_owned()))
        );
    }

    #[test]
    fn empty_text_body_is_unrecognized_but_empty_image_is_not() {
        let mut payload = message_payload();
        payload["body"] = json!("");
        let raw = RawEvent::new("messages", "create", payload.clone());
        assert!(matches!(decode(&raw), PushEvent::Unrecognized(DecodeError::EmptyBody(_))));

        payload["kind"] = json!("image");
        payload["attachmentRef"] = json!("files/42");
        let raw = RawEvent::new("messages", "create", payload);
        assert!(matches!(decode(&raw), PushEvent::MessageCreated(_)));
    }

    #[test]
    fn unknown_channel_and_verb_are_unrecognized() {
        let raw = RawEvent::new("presence", "update", json!({}));
        assert_eq!(decode(&raw).reason_kind(), Some("unknown_channel"));

        let raw = RawEvent::new("rooms.r1.messages", "delete", message_payload());
        assert_eq!(decode(&raw).reason_kind(), Some("unsupported_event"));
    }

    #[test]
    fn wrong_payload_shape_is_unrecognized() {
        let raw = RawEvent::new("rooms", "create", json!([1, 2, 3]));
        assert_eq!(decode(&raw).reason_kind(), Some("invalid_payload"));

        let raw = RawEvent::new("rooms", "create", serde_json::Value::Null);
        assert_eq!(decode(&raw).reason_kind(), Some("invalid_payload"));
    }

    impl PushEvent {
        fn reason_kind(&self) -> Option<&'static str> {
            match self {
                Self::Unrecognized(reason) => Some(reason.kind()),
                _ => None,
            }
        }
    }
}
