//! Raw push envelopes and subscription filters.

use serde::{Deserialize, Serialize};

use crate::{
    dto::{MessageDto, RoomDto},
    errors::ProtocolError,
    ids::{RoomId, UserId},
};

/// Channel carrying room create/update events.
pub const ROOMS_CHANNEL: &str = "rooms";

/// Channel carrying message events of one room.
pub fn messages_channel(room_id: &RoomId) -> String {
    format!("{ROOMS_CHANNEL}.{room_id}.messages")
}

/// Undecoded push envelope as delivered by the push source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Channel the event was published on
    pub channel: String,
    /// Event verb; dotted forms such as `documents.x.create` are allowed
    pub event: String,
    /// Event payload
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RawEvent {
    /// Build an envelope from parts.
    pub fn new(
        channel: impl Into<String>,
        event: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self { channel: channel.into(), event: event.into(), payload }
    }

    /// Parse an envelope from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] if the bytes are not a JSON
    /// object with `channel` and `event` strings.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serialize the envelope to JSON bytes.
    ///
    /// # Errors
    ///
    /// Propagates serializer failures.
    pub fn to_vec(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Envelope announcing a created or updated room.
    ///
    /// # Errors
    ///
    /// Propagates serializer failures.
    pub fn room_changed(room: &RoomDto, verb: &str) -> Result<Self, ProtocolError> {
        Ok(Self::new(ROOMS_CHANNEL, verb, serde_json::to_value(room)?))
    }

    /// Envelope announcing a created message.
    ///
    /// # Errors
    ///
    /// Propagates serializer failures.
    pub fn message_created(message: &MessageDto) -> Result<Self, ProtocolError> {
        Ok(Self::new(messages_channel(&message.room_id), "create", serde_json::to_value(message)?))
    }
}

/// One item yielded by a push subscription stream.
#[derive(Debug, Clone, PartialEq)]
pub enum PushItem {
    /// A published event
    Event(RawEvent),
    /// Keep-alive from the push source; carries no data
    Heartbeat,
}

/// What a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionFilter {
    /// Room changes and new messages for every room the user participates in
    Directory {
        /// Session user
        user_id: UserId,
    },
    /// New messages of a single room
    Room {
        /// Room to follow
        room_id: RoomId,
    },
}

impl SubscriptionFilter {
    /// Whether an event on `channel` is in scope of this filter.
    ///
    /// Membership of the directory user is enforced by the push source, not
    /// by the channel name.
    pub fn matches_channel(&self, channel: &str) -> bool {
        match self {
            Self::Directory { .. } => {
                channel == ROOMS_CHANNEL
                    || channel.starts_with("rooms.")
                    || channel == "messages"
            },
            Self::Room { room_id } => channel == messages_channel(room_id),
        }
    }
}
