//! Chatsync wire protocol.
//!
//! Everything that crosses the boundary between the sync core and the
//! backend lives here: identifier newtypes, the room and message DTOs
//! returned by fetch/send calls, the raw push envelope and the decoder that
//! turns envelopes into typed [`PushEvent`]s.
//!
//! # Decoding
//!
//! The push channel delivers heterogeneous payloads. [`decode`] is total: it
//! never panics and never errors. Anything it cannot make sense of comes back
//! as [`PushEvent::Unrecognized`] carrying the [`DecodeError`] that explains
//! why, so callers can count and discard it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod decode;
mod dto;
mod errors;
mod event;
mod ids;

pub use decode::{PushEvent, decode};
pub use dto::{CreateRoomRequest, MessageDto, MessageKind, RoomDto, RoomKind, SendRequest};
pub use errors::{DecodeError, ProtocolError};
pub use event::{PushItem, ROOMS_CHANNEL, RawEvent, SubscriptionFilter, messages_channel};
pub use ids::{MessageId, RoomId, UserId};
