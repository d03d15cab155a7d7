//! Client errors.

use chatsync_proto::{MessageId, RoomId};
use thiserror::Error;

/// A user intent the client refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Room is not in the directory
    #[error("room not found: {room_id}")]
    RoomNotFound {
        /// Requested room
        room_id: RoomId,
    },

    /// Operation needs the room to be focused
    #[error("room {room_id} is not the active room")]
    RoomNotActive {
        /// Requested room
        room_id: RoomId,
    },

    /// Text message without text
    #[error("message is empty")]
    EmptyMessage,

    /// Room creation without any participant
    #[error("room needs at least one participant besides the creator")]
    NoParticipants,

    /// No local message under this id
    #[error("unknown message: {id}")]
    UnknownMessage {
        /// Requested message
        id: MessageId,
    },

    /// Message exists but is not in the failed state
    #[error("message {id} has not failed")]
    NotFailed {
        /// Requested message
        id: MessageId,
    },

    /// Session was not started or was shut down
    #[error("session is not running")]
    SessionClosed,
}
