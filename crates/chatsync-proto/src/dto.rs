//! Backend data transfer objects.
//!
//! The backend has grown several spellings for the same fields over time
//! (`$id` next to `id`, snake_case next to camelCase). The DTOs accept all of
//! them on input and always serialize the canonical camelCase form.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, RoomId, UserId};

/// Category of a room. Fixed when the room is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    /// One-to-one session between a student and a counselor
    #[serde(alias = "counselling")]
    Counseling,
    /// Mentor and mentee conversation
    Mentoring,
    /// Group discussion
    Group,
}

impl RoomKind {
    /// Every room kind, in display order.
    pub const ALL: [Self; 3] = [Self::Counseling, Self::Mentoring, Self::Group];

    /// Canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Counseling => "counseling",
            Self::Mentoring => "mentoring",
            Self::Group => "group",
        }
    }
}

impl fmt::Display for RoomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "counseling" | "counselling" => Ok(Self::Counseling),
            "mentoring" => Ok(Self::Mentoring),
            "group" => Ok(Self::Group),
            other => Err(format!("unknown room kind: {other}")),
        }
    }
}

/// Content kind of a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text
    #[default]
    Text,
    /// File attachment
    File,
    /// Inline image
    Image,
}

impl MessageKind {
    /// Canonical lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::File => "file",
            Self::Image => "image",
        }
    }
}

/// A room as the backend reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDto {
    /// Room identifier
    #[serde(alias = "$id")]
    pub id: RoomId,

    /// Human readable title
    #[serde(default)]
    pub title: String,

    /// Room category
    #[serde(alias = "type", alias = "roomType", alias = "room_type")]
    pub kind: RoomKind,

    /// Members of the room
    #[serde(alias = "participants", alias = "participant_ids")]
    pub participant_ids: Vec<UserId>,

    /// User who created the room
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "created_by")]
    pub created_by: Option<UserId>,

    /// Short preview of the newest message
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "lastMessage",
        alias = "last_message_preview"
    )]
    pub last_message_preview: Option<String>,

    /// Unix milliseconds of the newest activity
    #[serde(default, alias = "last_activity_at", alias = "lastMessageAt")]
    pub last_activity_at: u64,

    /// Server-side message counter
    #[serde(default, alias = "message_count")]
    pub message_count: u64,

    /// Soft-delete flag; `false` means the room was closed
    #[serde(default = "default_active", alias = "isActive", alias = "is_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// A message as the backend reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    /// Authoritative message identifier
    #[serde(alias = "$id")]
    pub id: MessageId,

    /// Room the message belongs to
    #[serde(alias = "room_id")]
    pub room_id: RoomId,

    /// Author of the message
    #[serde(alias = "sender_id", alias = "userId")]
    pub sender_id: UserId,

    /// Author's display name at the time of sending
    #[serde(default, alias = "sender_display_name", alias = "senderName")]
    pub sender_display_name: String,

    /// Message text; may be empty for non-text kinds
    #[serde(default, alias = "content")]
    pub body: String,

    /// Content kind
    #[serde(default, alias = "type", alias = "messageType")]
    pub kind: MessageKind,

    /// Reference to an uploaded attachment
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "attachment_ref",
        alias = "fileUrl"
    )]
    pub attachment_ref: Option<String>,

    /// Unix milliseconds assigned by the backend
    #[serde(alias = "created_at", alias = "timestamp")]
    pub created_at: u64,

    /// Whether any other participant has read the message
    #[serde(default, alias = "read_by_others", alias = "isRead")]
    pub read_by_others: bool,

    /// Correlation token echoed from the originating send, if any
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "client_ref")]
    pub client_ref: Option<String>,
}

/// Outbound send call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    /// Target room
    pub room_id: RoomId,
    /// Message text
    pub body: String,
    /// Content kind
    pub kind: MessageKind,
    /// Attachment reference for file and image messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_ref: Option<String>,
    /// Correlation token the backend echoes on the resulting message
    pub client_ref: String,
}

/// Outbound create-room call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    /// Members of the new room, creator included
    pub participant_ids: Vec<UserId>,
    /// Room category
    pub kind: RoomKind,
    /// Optional title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_accepts_legacy_field_names() {
        let json = r#"{
            "$id": "r1",
            "title": "Career planning",
            "type": "counselling",
            "participants": ["alice", "bob"],
            "created_by": "alice",
            "last_activity_at": 42,
            "isActive": false
        }"#;
        let room: RoomDto = serde_json::from_str(json).unwrap();

        assert_eq!(room.id.as_str(), "r1");
        assert_eq!(room.kind, RoomKind::Counseling);
        assert_eq!(room.participant_ids.len(), 2);
        assert_eq!(room.created_by, Some(UserId::from("alice")));
        assert_eq!(room.last_activity_at, 42);
        assert!(!room.active);
    }

    #[test]
    fn room_defaults_to_active() {
        let json = r#"{"id":"r1","kind":"group","participantIds":["a"]}"#;
        let room: RoomDto = serde_json::from_str(json).unwrap();
        assert!(room.active);
        assert_eq!(room.message_count, 0);
    }

    #[test]
    fn message_defaults_kind_to_text() {
        let json = r#"{"id":"m1","roomId":"r1","senderId":"a","body":"hi","createdAt":10}"#;
        let message: MessageDto = serde_json::from_str(json).unwrap();
        assert_eq!(message.kind, MessageKind::Text);
        assert!(message.client_ref.is_none());
    }

    #[test]
    fn room_kind_parses_case_insensitively() {
        assert_eq!("Mentoring".parse::<RoomKind>(), Ok(RoomKind::Mentoring));
        assert!("lecture".parse::<RoomKind>().is_err());
    }
}
