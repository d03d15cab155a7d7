//! UI-facing handle to a running [`SyncRuntime`](crate::SyncRuntime).
//!
//! Queries read the latest published [`SyncView`]. Intents are queued to the
//! runtime and answered once the client has applied them; none of them wait
//! for the backend.

use std::sync::Arc;

use chatsync_client::ConnectionState;
use chatsync_core::{Message, MessageDraft, Room};
use chatsync_proto::{MessageId, RoomId, RoomKind, UserId};
use tokio::sync::{mpsc, oneshot, watch};

use crate::{error::RuntimeError, runtime::Command, view::SyncView};

/// Cloneable handle to the runtime.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<Arc<SyncView>>,
}

impl SyncHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<Command>,
        view: watch::Receiver<Arc<SyncView>>,
    ) -> Self {
        Self { commands, view }
    }

    /// Latest snapshot.
    pub fn view(&self) -> Arc<SyncView> {
        Arc::clone(&*self.view.borrow())
    }

    /// Watch channel of snapshots, for UIs that re-render on change.
    pub fn changes(&self) -> watch::Receiver<Arc<SyncView>> {
        self.view.clone()
    }

    /// Rooms of one kind, newest activity first.
    pub fn rooms(&self, kind: RoomKind) -> Vec<Room> {
        self.view().rooms(kind).cloned().collect()
    }

    /// Every room, newest activity first.
    pub fn all_rooms(&self) -> Vec<Room> {
        self.view().rooms.clone()
    }

    /// Focused room.
    pub fn active_room(&self) -> Option<Room> {
        self.view().active_room().cloned()
    }

    /// Ordered messages of a room.
    pub fn timeline(&self, room_id: &RoomId) -> Vec<Message> {
        self.view().timeline(room_id).to_vec()
    }

    /// Unread messages in a room.
    pub fn unread(&self, room_id: &RoomId) -> u64 {
        self.view().unread(room_id)
    }

    /// Push channel state.
    pub fn connection_state(&self) -> ConnectionState {
        self.view().connection
    }

    /// Focus a room, or drop the focus with `None`.
    pub async fn set_active_room(&self, room_id: Option<RoomId>) -> Result<(), RuntimeError> {
        self.request(|reply| Command::SetActiveRoom { room_id, reply }).await
    }

    /// Send a text message. Returns the provisional entry.
    pub async fn send_message(
        &self,
        room_id: RoomId,
        text: impl Into<String>,
    ) -> Result<Message, RuntimeError> {
        self.send_draft(MessageDraft::text(room_id, text)).await
    }

    /// Send any kind of message. Returns the provisional entry.
    pub async fn send_draft(&self, draft: MessageDraft) -> Result<Message, RuntimeError> {
        self.request(|reply| Command::Send { draft, reply }).await
    }

    /// Resend a failed message under a new provisional id.
    pub async fn retry_send(&self, provisional_id: MessageId) -> Result<Message, RuntimeError> {
        self.request(|reply| Command::RetrySend { provisional_id, reply }).await
    }

    /// Drop a failed message.
    pub async fn discard_failed(&self, provisional_id: MessageId) -> Result<(), RuntimeError> {
        self.request(|reply| Command::DiscardFailed { provisional_id, reply }).await
    }

    /// Create a room and wait for the backend to store it.
    pub async fn create_room(
        &self,
        participant_ids: Vec<UserId>,
        kind: RoomKind,
        title: Option<String>,
    ) -> Result<RoomId, RuntimeError> {
        self.request(|reply| Command::CreateRoom { participant_ids, kind, title, reply }).await
    }

    /// Reload the directory.
    pub async fn reload_rooms(&self) -> Result<(), RuntimeError> {
        self.request(|reply| Command::ReloadRooms { reply }).await
    }

    /// Reload the focused room's history.
    pub async fn reload_history(&self, room_id: RoomId) -> Result<(), RuntimeError> {
        self.request(|reply| Command::ReloadHistory { room_id, reply }).await
    }

    /// Stop the runtime. Resolves once the session is torn down.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T, RuntimeError>>) -> Command,
    ) -> Result<T, RuntimeError> {
        let (reply, response) = oneshot::channel();
        self.commands.send(command(reply)).await.map_err(|_| RuntimeError::Stopped)?;
        response.await.map_err(|_| RuntimeError::Stopped)?
    }
}
