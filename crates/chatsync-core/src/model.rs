//! Domain model: rooms, messages and the session context.

use std::collections::BTreeSet;

pub use chatsync_proto::{MessageId, MessageKind, RoomId, RoomKind, UserId};
use chatsync_proto::{MessageDto, RoomDto};

/// Unix milliseconds.
pub type Timestamp = u64;

/// Maximum number of characters kept in a room's message preview.
pub const PREVIEW_CHARS: usize = 80;

/// The signed-in user, passed explicitly to everything that needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Session user
    pub user_id: UserId,
    /// Name shown on the user's own messages
    pub display_name: String,
}

impl Session {
    /// Create a session context.
    pub fn new(user_id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), display_name: display_name.into() }
    }
}

/// A chat room with denormalized summary fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    /// Stable identifier
    pub id: RoomId,
    /// Human readable title
    pub title: String,
    /// Category, fixed at creation
    pub kind: RoomKind,
    /// Members; never empty, always contains the creator when known
    pub participant_ids: BTreeSet<UserId>,
    /// Creator of the room
    pub created_by: Option<UserId>,
    /// Short text of the newest message
    pub last_message_preview: Option<String>,
    /// Newest activity, never decreases
    pub last_activity_at: Timestamp,
    /// Number of messages in the room
    pub message_count: u64,
    /// Cleared when the room is closed
    pub active: bool,
}

impl Room {
    /// Whether `user` is a member.
    pub fn is_participant(&self, user: &UserId) -> bool {
        self.participant_ids.contains(user)
    }
}

impl From<RoomDto> for Room {
    fn from(dto: RoomDto) -> Self {
        let mut participant_ids: BTreeSet<UserId> = dto.participant_ids.into_iter().collect();
        if let Some(creator) = &dto.created_by {
            participant_ids.insert(creator.clone());
        }

        Self {
            id: dto.id,
            title: dto.title,
            kind: dto.kind,
            participant_ids,
            created_by: dto.created_by,
            last_message_preview: dto.last_message_preview,
            last_activity_at: dto.last_activity_at,
            message_count: dto.message_count,
            active: dto.active,
        }
    }
}

/// Delivery state of a message.
///
/// Only messages sent from this session are ever anything but `Confirmed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryState {
    /// Sent optimistically, not yet acknowledged
    Pending,
    /// Known to the backend
    Confirmed,
    /// Send failed or timed out; kept visible for retry or discard
    Failed,
}

/// A message in a room timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Authoritative id, or a provisional id while unconfirmed
    pub id: MessageId,
    /// Owning room
    pub room_id: RoomId,
    /// Author
    pub sender_id: UserId,
    /// Author's display name
    pub sender_display_name: String,
    /// Text; may be empty for non-text kinds
    pub body: String,
    /// Content kind
    pub kind: MessageKind,
    /// Attachment reference for file and image messages
    pub attachment_ref: Option<String>,
    /// Server time for authoritative messages, local wall clock otherwise
    pub created_at: Timestamp,
    /// Some other participant has read it
    pub read_by_others: bool,
    /// Local delivery state
    pub delivery_state: DeliveryState,
    /// Correlation token of the send that produced this message
    pub client_ref: Option<String>,
}

impl Message {
    /// Whether this entry still carries a provisional id.
    pub fn is_provisional(&self) -> bool {
        self.delivery_state != DeliveryState::Confirmed
    }

    /// Preview text for the room list.
    pub fn preview(&self) -> String {
        if self.body.is_empty() {
            return format!("[{}]", self.kind.as_str());
        }
        self.body.chars().take(PREVIEW_CHARS).collect()
    }
}

impl From<MessageDto> for Message {
    fn from(dto: MessageDto) -> Self {
        Self {
            id: dto.id,
            room_id: dto.room_id,
            sender_id: dto.sender_id,
            sender_display_name: dto.sender_display_name,
            body: dto.body,
            kind: dto.kind,
            attachment_ref: dto.attachment_ref,
            created_at: dto.created_at,
            read_by_others: dto.read_by_others,
            delivery_state: DeliveryState::Confirmed,
            client_ref: dto.client_ref,
        }
    }
}

/// User input for a new message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    /// Target room
    pub room_id: RoomId,
    /// Text
    pub body: String,
    /// Content kind
    pub kind: MessageKind,
    /// Attachment reference for file and image messages
    pub attachment_ref: Option<String>,
}

impl MessageDraft {
    /// Plain text draft.
    pub fn text(room_id: impl Into<RoomId>, body: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            body: body.into(),
            kind: MessageKind::Text,
            attachment_ref: None,
        }
    }

    /// Whether the draft has nothing to send.
    pub fn is_empty(&self) -> bool {
        self.kind == MessageKind::Text && self.body.trim().is_empty()
    }

    /// Rebuild a draft from an existing (failed) message.
    pub fn from_message(message: &Message) -> Self {
        Self {
            room_id: message.room_id.clone(),
            body: message.body.clone(),
            kind: message.kind,
            attachment_ref: message.attachment_ref.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_from_dto_adds_creator_to_participants() {
        let dto = RoomDto {
            id: "r1".into(),
            title: "t".into(),
            kind: RoomKind::Group,
            participant_ids: vec!["bob".into()],
            created_by: Some("alice".into()),
            last_message_preview: None,
            last_activity_at: 0,
            message_count: 0,
            active: true,
        };
        let room = Room::from(dto);
        assert!(room.is_participant(&"alice".into()));
        assert!(room.is_participant(&"bob".into()));
    }

    #[test]
    fn preview_truncates_and_labels_attachments() {
        let mut message = Message {
            id: "m".into(),
            room_id: "r".into(),
            sender_id: "s".into(),
            sender_display_name: String::new(),
            body: "x".repeat(200),
            kind: MessageKind::Text,
            attachment_ref: None,
            created_at: 0,
            read_by_others: false,
            delivery_state: DeliveryState::Confirmed,
            client_ref: None,
        };
        assert_eq!(message.preview().chars().count(), PREVIEW_CHARS);

        message.body.clear();
        message.kind = MessageKind::Image;
        assert_eq!(message.preview(), "[image]");
    }

    #[test]
    fn whitespace_text_draft_is_empty() {
        assert!(MessageDraft::text("r", "  \n").is_empty());
        assert!(!MessageDraft::text("r", "hi").is_empty());
    }
}
