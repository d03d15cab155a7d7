//! Opaque identifiers.
//!
//! Ids are issued by the backend (or generated locally for provisional
//! messages) and are only ever compared, hashed and displayed. They compare
//! as plain strings, which is what timeline tie-breaking relies on.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Stable identifier of a chat room.
    RoomId
);

string_id!(
    /// Identifier of a message.
    ///
    /// Either authoritative (assigned by the backend) or provisional
    /// (generated locally for an optimistic send until it is confirmed).
    MessageId
);

string_id!(
    /// Identifier of a platform user.
    UserId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_compare_as_strings() {
        assert!(MessageId::from("m10") < MessageId::from("m2"));
        assert!(MessageId::from("a") < MessageId::from("b"));
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&RoomId::from("room-1")).unwrap();
        assert_eq!(json, "\"room-1\"");

        let id: UserId = serde_json::from_str("\"u-7\"").unwrap();
        assert_eq!(id.as_str(), "u-7");
    }
}
