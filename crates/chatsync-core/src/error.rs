//! Error types for the chatsync core.
//!
//! One enum per external collaborator: fetches, sends and the push
//! subscription channel. Each knows whether it is worth retrying.

use std::time::Duration;

use thiserror::Error;

/// Failure of a bulk fetch (`fetch_rooms`, `fetch_messages`) or a read
/// acknowledgement.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Network or backend failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Session is not allowed to read this resource
    #[error("unauthorized")]
    Unauthorized,

    /// Backend did not answer in time
    #[error("fetch timed out after {elapsed:?}")]
    Timeout {
        /// How long we waited
        elapsed: Duration,
    },

    /// Backend answered with something that does not decode
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Returns true if this error is transient and may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout { .. })
    }
}

/// Failure of an outbound send or create-room call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// Backend refused the request (validation, permissions on the room)
    #[error("rejected by backend: {0}")]
    Rejected(String),

    /// No response within the send timeout
    #[error("send timed out after {elapsed:?}")]
    Timeout {
        /// How long we waited
        elapsed: Duration,
    },

    /// Network or backend failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Session is not allowed to post
    #[error("unauthorized")]
    Unauthorized,
}

impl SendError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// A timed out send may still have landed; retrying it can produce a
    /// second copy on the backend.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout { .. })
    }
}

/// Failure of the push subscription channel. Never user-facing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// Channel dropped or could not be established
    #[error("transport error: {0}")]
    Transport(String),

    /// Subscription was not acknowledged in time
    #[error("handshake timeout after {elapsed:?}")]
    HandshakeTimeout {
        /// How long we waited
        elapsed: Duration,
    },

    /// No event or heartbeat within the idle timeout
    #[error("heartbeat timeout after {elapsed:?}")]
    HeartbeatTimeout {
        /// How long the channel was silent
        elapsed: Duration,
    },

    /// Push source closed the stream
    #[error("subscription stream closed")]
    Closed,

    /// Session is not allowed to subscribe
    #[error("unauthorized")]
    Unauthorized,
}

impl SubscriptionError {
    /// Returns true if reconnecting may help.
    ///
    /// Everything except an authorization failure is transient.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Unauthorized)
    }
}
