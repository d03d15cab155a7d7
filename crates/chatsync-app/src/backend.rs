//! Backend and push source abstractions.
//!
//! The runtime never talks to a network directly. Request/response calls go
//! through [`Backend`], the subscription channel through [`PushSource`].
//! Production plugs in an HTTP/websocket adapter, tests and the simulator
//! plug in the in-memory server from `chatsync-harness`.

use std::future::Future;

use chatsync_core::{FetchError, SendError, SubscriptionError};
use chatsync_proto::{
    CreateRoomRequest, MessageDto, PushItem, RoomDto, RoomId, SendRequest, SubscriptionFilter,
};
use futures::Stream;

/// Request/response calls of the remote store.
///
/// Implementations are cloned into spawned tasks, so they should be cheap
/// handles around shared state.
pub trait Backend: Clone + Send + Sync + 'static {
    /// Rooms visible to the session user.
    fn fetch_rooms(&self) -> impl Future<Output = Result<Vec<RoomDto>, FetchError>> + Send;

    /// Full history of one room.
    fn fetch_messages(
        &self,
        room_id: RoomId,
    ) -> impl Future<Output = Result<Vec<MessageDto>, FetchError>> + Send;

    /// Store a message.
    fn send(
        &self,
        request: SendRequest,
    ) -> impl Future<Output = Result<MessageDto, SendError>> + Send;

    /// Create a room.
    fn create_room(
        &self,
        request: CreateRoomRequest,
    ) -> impl Future<Output = Result<RoomDto, SendError>> + Send;

    /// Record that the session user has read a room.
    fn acknowledge_read(
        &self,
        room_id: RoomId,
    ) -> impl Future<Output = Result<(), FetchError>> + Send;
}

/// Push subscription channel.
///
/// A subscription is acknowledged when [`subscribe`](Self::subscribe)
/// resolves. Its stream yields events and heartbeats until it ends or fails;
/// either way the runtime reports the failure to the client, which decides
/// whether to reconnect.
pub trait PushSource: Clone + Send + Sync + 'static {
    /// Token identifying a subscription to [`unsubscribe`](Self::unsubscribe).
    type Handle: Send + 'static;

    /// Stream of push items of one subscription.
    type Stream: Stream<Item = Result<PushItem, SubscriptionError>> + Send + Unpin + 'static;

    /// Open a subscription.
    fn subscribe(
        &self,
        filter: SubscriptionFilter,
    ) -> impl Future<Output = Result<(Self::Handle, Self::Stream), SubscriptionError>> + Send;

    /// Close a subscription. Best effort, never fails.
    fn unsubscribe(&self, handle: Self::Handle) -> impl Future<Output = ()> + Send;
}
