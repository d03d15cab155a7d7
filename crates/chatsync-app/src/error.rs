//! Runtime errors.

use chatsync_client::ClientError;
use chatsync_core::SendError;
use thiserror::Error;

/// Failure of a [`SyncHandle`](crate::SyncHandle) call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// The runtime task has exited.
    #[error("sync runtime stopped")]
    Stopped,

    /// The client refused the intent.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The backend rejected the request.
    #[error("backend rejected request: {0}")]
    Rejected(#[from] SendError),

    /// The client accepted a send intent but queued no send for it.
    #[error("send intent accepted without a queued send")]
    SendNotQueued,
}
