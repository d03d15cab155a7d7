//! Client events and actions.

use std::fmt;

use chatsync_core::{
    ConnectionState, FetchError, MessageDraft, SendError, SubscriptionError, SubscriptionId,
};
use chatsync_proto::{
    MessageDto, MessageId, MessageKind, PushItem, RoomDto, RoomId, RoomKind, SubscriptionFilter,
    UserId,
};

/// Correlates an outbound request with the event carrying its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Events the caller feeds into the client.
///
/// The caller is responsible for:
/// - Forwarding results of executed actions (fetches, sends, subscriptions)
/// - Forwarding push stream items tagged with their subscription
/// - Driving time forward via ticks
/// - Forwarding user intents
///
/// Generic over `I` (Instant type) to support both production and
/// simulation environments.
#[derive(Debug, Clone)]
pub enum ClientEvent<I = std::time::Instant> {
    /// Session start: load the directory and open the push channel.
    Start,

    /// Session teardown: close the channel and cancel outstanding fetches.
    Shutdown,

    /// Time tick for timeout and reconnect processing.
    Tick {
        /// Current time from the environment.
        now: I,
    },

    /// Push source acknowledged a subscription.
    SubscriptionReady {
        /// Subscription that is now live.
        subscription: SubscriptionId,
    },

    /// Subscription could not be established, failed, or its stream ended.
    SubscriptionFailed {
        /// Failed subscription.
        subscription: SubscriptionId,
        /// What went wrong.
        error: SubscriptionError,
    },

    /// Item received on a subscription stream.
    Push {
        /// Subscription the item arrived on.
        subscription: SubscriptionId,
        /// Event or heartbeat.
        item: PushItem,
    },

    /// Result of [`ClientAction::FetchRooms`].
    RoomsFetched {
        /// Request being answered.
        request: RequestId,
        /// Rooms or failure.
        result: Result<Vec<RoomDto>, FetchError>,
    },

    /// Result of [`ClientAction::FetchMessages`].
    HistoryFetched {
        /// Request being answered.
        request: RequestId,
        /// Room the history belongs to.
        room_id: RoomId,
        /// Messages or failure.
        result: Result<Vec<MessageDto>, FetchError>,
    },

    /// Result of [`ClientAction::Send`].
    SendCompleted {
        /// Provisional id of the optimistic entry.
        provisional_id: MessageId,
        /// Target room.
        room_id: RoomId,
        /// Stored message or failure.
        result: Result<MessageDto, SendError>,
    },

    /// Result of [`ClientAction::CreateRoom`].
    RoomCreated {
        /// Request being answered.
        request: RequestId,
        /// Created room or failure.
        result: Result<RoomDto, SendError>,
    },

    /// Result of [`ClientAction::AcknowledgeRead`].
    ReadAcknowledged {
        /// Room that was acknowledged.
        room_id: RoomId,
        /// Attempt number of the acknowledgement.
        attempt: u8,
        /// Outcome.
        result: Result<(), FetchError>,
    },

    /// User focused a room.
    OpenRoom {
        /// Room to focus.
        room_id: RoomId,
    },

    /// User left the focused room without opening another.
    CloseRoom,

    /// User wants to send a message.
    SendMessage {
        /// Message content and target room.
        draft: MessageDraft,
    },

    /// User wants to resend a failed message.
    RetrySend {
        /// Provisional id of the failed entry.
        provisional_id: MessageId,
    },

    /// User dismisses a failed message.
    DiscardFailed {
        /// Provisional id of the failed entry.
        provisional_id: MessageId,
    },

    /// User wants to create a room.
    CreateRoom {
        /// Members besides the session user.
        participant_ids: Vec<UserId>,
        /// Room category.
        kind: RoomKind,
        /// Optional title.
        title: Option<String>,
    },

    /// User asks for the directory to be reloaded.
    ReloadRooms,

    /// User asks for the focused room's history to be reloaded.
    ReloadHistory {
        /// Room to reload; must be the focused room.
        room_id: RoomId,
    },
}

/// Which fetch a failure belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchScope {
    /// Directory load
    Directory,
    /// History load of one room
    History(RoomId),
    /// Read acknowledgement of one room
    ReadAcknowledgement(RoomId),
}

/// State changes reported to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Push channel state changed.
    ConnectionChanged(ConnectionState),
    /// Room list, summaries, focus or unread counts changed.
    DirectoryChanged,
    /// A room's timeline changed.
    TimelineChanged {
        /// Affected room.
        room_id: RoomId,
    },
    /// A fetch failed. Not retried automatically.
    FetchFailed {
        /// What was being fetched.
        scope: FetchScope,
        /// Failure.
        error: FetchError,
    },
    /// A send failed or timed out; the entry is now `failed`.
    SendFailed {
        /// Provisional id of the entry.
        provisional_id: MessageId,
        /// Room of the entry.
        room_id: RoomId,
        /// Failure.
        error: SendError,
    },
    /// A room was created.
    RoomCreated {
        /// Create request.
        request: RequestId,
        /// New room.
        room_id: RoomId,
    },
    /// Room creation failed.
    RoomCreateFailed {
        /// Create request.
        request: RequestId,
        /// Failure.
        error: SendError,
    },
}

/// Actions the client produces for the caller to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Fetch the room list; answer with [`ClientEvent::RoomsFetched`].
    FetchRooms {
        /// Request id to echo.
        request: RequestId,
    },

    /// Fetch a room's history; answer with [`ClientEvent::HistoryFetched`].
    FetchMessages {
        /// Request id to echo.
        request: RequestId,
        /// Room to fetch.
        room_id: RoomId,
    },

    /// Abort an outstanding fetch. Its result, if it still arrives, is
    /// discarded.
    CancelFetch {
        /// Fetch to abort.
        request: RequestId,
    },

    /// Send a message; answer with [`ClientEvent::SendCompleted`].
    Send {
        /// Provisional id to echo.
        provisional_id: MessageId,
        /// Target room.
        room_id: RoomId,
        /// Text.
        body: String,
        /// Content kind.
        kind: MessageKind,
        /// Attachment reference.
        attachment_ref: Option<String>,
        /// Correlation token for the backend to echo on the message.
        client_ref: String,
    },

    /// Create a room; answer with [`ClientEvent::RoomCreated`].
    CreateRoom {
        /// Request id to echo.
        request: RequestId,
        /// Members, session user included.
        participant_ids: Vec<UserId>,
        /// Room category.
        kind: RoomKind,
        /// Optional title.
        title: Option<String>,
    },

    /// Acknowledge reading a room; answer with
    /// [`ClientEvent::ReadAcknowledged`].
    AcknowledgeRead {
        /// Room that was read.
        room_id: RoomId,
        /// Attempt number to echo.
        attempt: u8,
    },

    /// Open a push subscription; answer with
    /// [`ClientEvent::SubscriptionReady`] or
    /// [`ClientEvent::SubscriptionFailed`], then forward stream items as
    /// [`ClientEvent::Push`].
    Subscribe {
        /// Id to tag readiness, items and failures with.
        subscription: SubscriptionId,
        /// What to listen to.
        filter: SubscriptionFilter,
    },

    /// Close a push subscription.
    Unsubscribe {
        /// Subscription to close.
        subscription: SubscriptionId,
    },

    /// Report a state change to the UI layer.
    Notify(Notification),
}
