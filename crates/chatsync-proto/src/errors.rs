//! Protocol-level errors.

use thiserror::Error;

/// Failure to parse or build a raw envelope.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Envelope bytes were not valid JSON of the expected shape
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Reason a push envelope could not be decoded into a typed event.
///
/// Decode errors are never propagated. They ride inside
/// [`PushEvent::Unrecognized`](crate::PushEvent::Unrecognized) and end up in
/// diagnostic counters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Channel name does not match any known channel
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    /// Event verb is not handled on this channel
    #[error("unsupported event {event} on channel {channel}")]
    UnsupportedEvent {
        /// Channel the event arrived on
        channel: String,
        /// Verb that was not understood
        event: String,
    },

    /// Payload does not deserialize into the expected DTO
    #[error("invalid {expected} payload: {reason}")]
    InvalidPayload {
        /// DTO the payload was decoded as
        expected: &'static str,
        /// Deserializer message
        reason: String,
    },

    /// Room payload without participants
    #[error("room {0} has no participants")]
    EmptyParticipants(String),

    /// Text message without a body
    #[error("text message {0} has an empty body")]
    EmptyBody(String),

    /// Message arrived on another room's channel
    #[error("message for room {message_room} arrived on channel of room {channel_room}")]
    RoomMismatch {
        /// Room named by the channel
        channel_room: String,
        /// Room named by the payload
        message_room: String,
    },
}

impl DecodeError {
    /// Stable short name, used as a diagnostic counter key.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownChannel(_) => "unknown_channel",
            Self::UnsupportedEvent { .. } => "unsupported_event",
            Self::InvalidPayload { .. } => "invalid_payload",
            Self::EmptyParticipants(_) => "empty_participants",
            Self::EmptyBody(_) => "empty_body",
            Self::RoomMismatch { .. } => "room_mismatch",
        }
    }
}
