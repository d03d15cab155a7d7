//! Client state machine.
//!
//! Owns every piece of sync state and is driven from a single serialized
//! path: one event in, a list of actions out. Fetch and send results re-enter
//! as events tagged with the request they answer.

use std::collections::{BTreeMap, HashMap, HashSet};

use chatsync_core::{
    Accepted, ConnectionState, DeliveryState, Environment, FetchError, Message, MessageDraft,
    ReadAction, ReadStateTracker, Room, RoomChange, RoomDirectory, SendError, Session,
    SubscriptionAction, SubscriptionError, SubscriptionId, SubscriptionManager, SyncConfig,
    Timeline,
};
use chatsync_proto::{
    MessageDto, MessageId, PushEvent, PushItem, RoomDto, RoomId, RoomKind, UserId, decode,
};

use crate::{
    error::ClientError,
    event::{ClientAction, ClientEvent, FetchScope, Notification, RequestId},
    stats::DecodeStats,
};

/// Outstanding directory fetch.
#[derive(Debug, Clone)]
struct DirectoryFetch {
    request: RequestId,
    /// Another load was requested while this one was in flight.
    refetch: bool,
}

/// Outstanding history fetch of the focused room.
#[derive(Debug, Clone)]
struct HistoryFetch {
    request: RequestId,
    room_id: RoomId,
    refetch: bool,
}

/// Send awaiting its response.
#[derive(Debug, Clone)]
struct PendingSend<I> {
    room_id: RoomId,
    started: I,
}

/// Chat synchronization client.
///
/// Generic over the environment so the same logic runs against real time and
/// against the simulation harness.
pub struct Client<E: Environment> {
    env: E,
    session: Session,
    config: SyncConfig,
    running: bool,
    directory: RoomDirectory,
    timelines: HashMap<RoomId, Timeline>,
    read_state: ReadStateTracker,
    subscriptions: SubscriptionManager<E::Instant>,
    next_request: u64,
    directory_fetch: Option<DirectoryFetch>,
    history_fetch: Option<HistoryFetch>,
    pending_sends: BTreeMap<MessageId, PendingSend<E::Instant>>,
    pending_creates: HashSet<RequestId>,
    decode_stats: DecodeStats,
}

impl<E: Environment> Client<E> {
    /// Create a client for `session`. Nothing happens until
    /// [`ClientEvent::Start`].
    pub fn new(env: E, session: Session, config: SyncConfig) -> Self {
        let subscriptions =
            SubscriptionManager::new(session.user_id.clone(), config.subscription.clone());
        Self {
            env,
            session,
            config,
            running: false,
            directory: RoomDirectory::new(),
            timelines: HashMap::new(),
            read_state: ReadStateTracker::new(),
            subscriptions,
            next_request: 1,
            directory_fetch: None,
            history_fetch: None,
            pending_sends: BTreeMap::new(),
            pending_creates: HashSet::new(),
            decode_stats: DecodeStats::default(),
        }
    }

    /// Session context.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Whether the session has been started and not shut down.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Push channel state.
    pub fn connection_state(&self) -> ConnectionState {
        self.subscriptions.state()
    }

    /// Subscription manager, for inspection.
    pub fn subscriptions(&self) -> &SubscriptionManager<E::Instant> {
        &self.subscriptions
    }

    /// Room directory.
    pub fn directory(&self) -> &RoomDirectory {
        &self.directory
    }

    /// Rooms of one kind, newest activity first.
    pub fn rooms(&self, kind: RoomKind) -> impl Iterator<Item = &Room> + '_ {
        self.directory.list_for_kind(kind)
    }

    /// Every room, newest activity first.
    pub fn all_rooms(&self) -> impl Iterator<Item = &Room> + '_ {
        self.directory.list_all()
    }

    /// Focused room.
    pub fn active_room(&self) -> Option<&Room> {
        self.directory.active_room()
    }

    /// Timeline of a room, if anything is known about its messages.
    pub fn timeline(&self, room_id: &RoomId) -> Option<&Timeline> {
        self.timelines.get(room_id)
    }

    /// Every timeline.
    pub fn timelines(&self) -> impl Iterator<Item = &Timeline> + '_ {
        self.timelines.values()
    }

    /// Look up one message by authoritative or provisional id.
    pub fn message(&self, room_id: &RoomId, id: &MessageId) -> Option<&Message> {
        self.timelines.get(room_id).and_then(|timeline| timeline.get(id))
    }

    /// Unread messages in a room.
    pub fn unread(&self, room_id: &RoomId) -> u64 {
        self.read_state.unread(room_id)
    }

    /// Unread messages across all rooms.
    pub fn total_unread(&self) -> u64 {
        self.read_state.total_unread()
    }

    /// Read-state tracker.
    pub fn read_state(&self) -> &ReadStateTracker {
        &self.read_state
    }

    /// Counters of discarded push events.
    pub fn decode_stats(&self) -> &DecodeStats {
        &self.decode_stats
    }

    /// Sends still waiting for a response.
    pub fn pending_send_count(&self) -> usize {
        self.pending_sends.len()
    }

    /// Outstanding directory fetch.
    pub fn directory_request(&self) -> Option<RequestId> {
        self.directory_fetch.as_ref().map(|fetch| fetch.request)
    }

    /// Outstanding history fetch and the room it is for.
    pub fn history_request(&self) -> Option<(RequestId, &RoomId)> {
        self.history_fetch.as_ref().map(|fetch| (fetch.request, &fetch.room_id))
    }

    /// Process an event and return actions for the caller to execute.
    ///
    /// # Errors
    ///
    /// Only user intents fail, with a [`ClientError`] describing why the
    /// intent was refused. Results, push items and ticks never fail; stale or
    /// malformed input is logged and dropped.
    pub fn handle(
        &mut self,
        event: ClientEvent<E::Instant>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        match event {
            ClientEvent::Start => Ok(self.handle_start()),
            ClientEvent::Shutdown => Ok(self.handle_shutdown()),
            ClientEvent::Tick { now } => Ok(self.handle_tick(now)),
            ClientEvent::SubscriptionReady { subscription } => {
                Ok(self.handle_subscription_ready(subscription))
            },
            ClientEvent::SubscriptionFailed { subscription, error } => {
                Ok(self.handle_subscription_failed(subscription, error))
            },
            ClientEvent::Push { subscription, item } => Ok(self.handle_push(subscription, item)),
            ClientEvent::RoomsFetched { request, result } => {
                Ok(self.handle_rooms_fetched(request, result))
            },
            ClientEvent::HistoryFetched { request, room_id, result } => {
                Ok(self.handle_history_fetched(request, room_id, result))
            },
            ClientEvent::SendCompleted { provisional_id, room_id, result } => {
                Ok(self.handle_send_completed(&provisional_id, room_id, result))
            },
            ClientEvent::RoomCreated { request, result } => {
                Ok(self.handle_room_created(request, result))
            },
            ClientEvent::ReadAcknowledged { room_id, attempt, result } => {
                Ok(self.handle_read_acknowledged(room_id, attempt, result))
            },
            ClientEvent::OpenRoom { room_id } => self.handle_open_room(room_id),
            ClientEvent::CloseRoom => Ok(self.handle_close_room()),
            ClientEvent::SendMessage { draft } => self.handle_send_message(draft),
            ClientEvent::RetrySend { provisional_id } => self.handle_retry_send(&provisional_id),
            ClientEvent::DiscardFailed { provisional_id } => {
                self.handle_discard_failed(&provisional_id)
            },
            ClientEvent::CreateRoom { participant_ids, kind, title } => {
                self.handle_create_room(participant_ids, kind, title)
            },
            ClientEvent::ReloadRooms => {
                self.ensure_running()?;
                Ok(self.request_directory_fetch())
            },
            ClientEvent::ReloadHistory { room_id } => self.handle_reload_history(room_id),
        }
    }

    fn handle_start(&mut self) -> Vec<ClientAction> {
        if self.running {
            return Vec::new();
        }
        self.running = true;
        tracing::info!(user = %self.session.user_id, "starting sync session");

        let now = self.env.now();
        let mut actions = self.request_directory_fetch();
        let opened = self.subscriptions.open(now);
        actions.extend(self.apply_subscription_actions(opened));
        actions
    }

    fn handle_shutdown(&mut self) -> Vec<ClientAction> {
        if !self.running {
            return Vec::new();
        }
        self.running = false;
        tracing::info!(user = %self.session.user_id, "stopping sync session");

        let closed = self.subscriptions.close();
        let mut actions = self.apply_subscription_actions(closed);
        if let Some(fetch) = self.directory_fetch.take() {
            actions.push(ClientAction::CancelFetch { request: fetch.request });
        }
        if let Some(fetch) = self.history_fetch.take() {
            actions.push(ClientAction::CancelFetch { request: fetch.request });
        }
        self.pending_creates.clear();
        actions
    }

    fn handle_tick(&mut self, now: E::Instant) -> Vec<ClientAction> {
        let ticked = self.subscriptions.tick(now);
        let mut actions = self.apply_subscription_actions(ticked);

        let timeout = self.config.send_timeout;
        let expired: Vec<MessageId> = self
            .pending_sends
            .iter()
            .filter(|(_, pending)| now - pending.started >= timeout)
            .map(|(id, _)| id.clone())
            .collect();

        for provisional_id in expired {
            if let Some(pending) = self.pending_sends.remove(&provisional_id) {
                let elapsed = now - pending.started;
                actions.extend(self.fail_send(
                    &provisional_id,
                    &pending.room_id,
                    SendError::Timeout { elapsed },
                ));
            }
        }
        actions
    }

    fn handle_subscription_ready(&mut self, subscription: SubscriptionId) -> Vec<ClientAction> {
        let now = self.env.now();
        let acknowledged = self.subscriptions.handshake_succeeded(subscription, now);
        self.apply_subscription_actions(acknowledged)
    }

    fn handle_subscription_failed(
        &mut self,
        subscription: SubscriptionId,
        error: SubscriptionError,
    ) -> Vec<ClientAction> {
        let now = self.env.now();
        let failed = self.subscriptions.channel_failed(subscription, error, now);
        self.apply_subscription_actions(failed)
    }

    fn handle_push(&mut self, subscription: SubscriptionId, item: PushItem) -> Vec<ClientAction> {
        let now = self.env.now();
        if !self.subscriptions.record_activity(subscription, now) {
            tracing::debug!(%subscription, "dropping item from stale subscription");
            self.decode_stats.record_stale();
            return Vec::new();
        }

        let PushItem::Event(raw) = item else {
            return Vec::new();
        };

        match decode(&raw) {
            PushEvent::RoomChanged(dto) => self.apply_room(Room::from(dto)),
            PushEvent::MessageCreated(dto) => self.accept_message(Message::from(dto)),
            PushEvent::Unrecognized(reason) => {
                tracing::debug!(
                    channel = %raw.channel,
                    event = %raw.event,
                    %reason,
                    "discarding unrecognized push event"
                );
                self.decode_stats.record(&reason);
                Vec::new()
            },
        }
    }

    fn handle_rooms_fetched(
        &mut self,
        request: RequestId,
        result: Result<Vec<RoomDto>, FetchError>,
    ) -> Vec<ClientAction> {
        let Some(fetch) = self.directory_fetch.take_if(|fetch| fetch.request == request) else {
            tracing::debug!(%request, "discarding stale room list");
            return Vec::new();
        };

        let mut actions = Vec::new();
        match result {
            Ok(rooms) => {
                tracing::debug!(%request, rooms = rooms.len(), "room list loaded");
                self.directory.replace_all(rooms.into_iter().map(Room::from));
                let known: Vec<RoomId> = self.timelines.keys().cloned().collect();
                for room_id in &known {
                    self.refresh_room_summary(room_id);
                }
                actions.push(ClientAction::Notify(Notification::DirectoryChanged));
            },
            Err(error) => {
                tracing::warn!(%request, %error, "room list fetch failed");
                actions.push(ClientAction::Notify(Notification::FetchFailed {
                    scope: FetchScope::Directory,
                    error,
                }));
            },
        }

        if fetch.refetch && self.running {
            actions.extend(self.request_directory_fetch());
        }
        actions
    }

    fn handle_history_fetched(
        &mut self,
        request: RequestId,
        room_id: RoomId,
        result: Result<Vec<MessageDto>, FetchError>,
    ) -> Vec<ClientAction> {
        let Some(fetch) = self
            .history_fetch
            .take_if(|fetch| fetch.request == request && fetch.room_id == room_id)
        else {
            tracing::debug!(%request, room = %room_id, "discarding stale history");
            return Vec::new();
        };

        let mut actions = Vec::new();
        match result {
            Ok(messages) => {
                let summary = self
                    .timeline_mut(&room_id)
                    .merge_history(messages.into_iter().map(Message::from));
                tracing::debug!(room = %room_id, ?summary, "history merged");

                if summary.is_change() {
                    self.prune_pending_sends(&room_id);
                    self.refresh_room_summary(&room_id);
                    actions.push(ClientAction::Notify(Notification::TimelineChanged {
                        room_id: room_id.clone(),
                    }));
                    actions.push(ClientAction::Notify(Notification::DirectoryChanged));
                }
            },
            Err(error) => {
                tracing::warn!(room = %room_id, %error, "history fetch failed");
                actions.push(ClientAction::Notify(Notification::FetchFailed {
                    scope: FetchScope::History(room_id.clone()),
                    error,
                }));
            },
        }

        if fetch.refetch && self.directory.active_room_id() == Some(&room_id) {
            actions.extend(self.request_history_fetch(room_id));
        }
        actions
    }

    fn handle_send_completed(
        &mut self,
        provisional_id: &MessageId,
        room_id: RoomId,
        result: Result<MessageDto, SendError>,
    ) -> Vec<ClientAction> {
        self.pending_sends.remove(provisional_id);

        match result {
            Ok(dto) => {
                let message = Message::from(dto);
                let outcome = self.timeline_mut(&room_id).confirm(provisional_id, message);
                tracing::debug!(%provisional_id, ?outcome, "send confirmed");
                if !outcome.is_change() {
                    return Vec::new();
                }
                self.refresh_room_summary(&room_id);
                vec![
                    ClientAction::Notify(Notification::TimelineChanged { room_id }),
                    ClientAction::Notify(Notification::DirectoryChanged),
                ]
            },
            Err(error) => self.fail_send(provisional_id, &room_id, error),
        }
    }

    fn handle_room_created(
        &mut self,
        request: RequestId,
        result: Result<RoomDto, SendError>,
    ) -> Vec<ClientAction> {
        if !self.pending_creates.remove(&request) {
            tracing::debug!(%request, "discarding stale room creation result");
            return Vec::new();
        }

        let result = result.and_then(|dto| {
            if dto.participant_ids.is_empty() && dto.created_by.is_none() {
                Err(SendError::Rejected("room without participants".to_owned()))
            } else {
                Ok(dto)
            }
        });

        match result {
            Ok(dto) => {
                let room = Room::from(dto);
                let room_id = room.id.clone();
                tracing::info!(room = %room_id, kind = %room.kind, "room created");
                self.directory.apply_room_changed(room);
                self.refresh_room_summary(&room_id);
                vec![
                    ClientAction::Notify(Notification::RoomCreated { request, room_id }),
                    ClientAction::Notify(Notification::DirectoryChanged),
                ]
            },
            Err(error) => {
                tracing::warn!(%request, %error, "room creation failed");
                vec![ClientAction::Notify(Notification::RoomCreateFailed { request, error })]
            },
        }
    }

    fn handle_read_acknowledged(
        &mut self,
        room_id: RoomId,
        attempt: u8,
        result: Result<(), FetchError>,
    ) -> Vec<ClientAction> {
        let Err(error) = result else {
            return Vec::new();
        };

        match self.read_state.on_ack_failed(&room_id, attempt) {
            Some(ReadAction::Acknowledge { room_id, attempt }) => {
                tracing::debug!(room = %room_id, attempt, %error, "retrying read acknowledgement");
                vec![ClientAction::AcknowledgeRead { room_id, attempt }]
            },
            None => {
                tracing::warn!(room = %room_id, %error, "read acknowledgement failed");
                vec![ClientAction::Notify(Notification::FetchFailed {
                    scope: FetchScope::ReadAcknowledgement(room_id),
                    error,
                })]
            },
        }
    }

    fn handle_open_room(&mut self, room_id: RoomId) -> Result<Vec<ClientAction>, ClientError> {
        self.ensure_running()?;
        if self.directory.set_active_room(&room_id).is_none() {
            return Err(ClientError::RoomNotFound { room_id });
        }
        tracing::debug!(room = %room_id, "room opened");

        let now = self.env.now();
        let switched = self.subscriptions.switch_room(Some(room_id.clone()), now);
        let mut actions = self.apply_subscription_actions(switched);

        let ReadAction::Acknowledge { room_id: read_room, attempt } =
            self.read_state.on_active_room_changed(&room_id);
        actions.push(ClientAction::AcknowledgeRead { room_id: read_room, attempt });

        actions.extend(self.request_history_fetch(room_id));
        actions.push(ClientAction::Notify(Notification::DirectoryChanged));
        Ok(actions)
    }

    fn handle_close_room(&mut self) -> Vec<ClientAction> {
        if self.directory.active_room_id().is_none() {
            return Vec::new();
        }
        self.directory.clear_active_room();
        self.read_state.clear_active();

        let now = self.env.now();
        let switched = self.subscriptions.switch_room(None, now);
        let mut actions = self.apply_subscription_actions(switched);
        if let Some(fetch) = self.history_fetch.take() {
            actions.push(ClientAction::CancelFetch { request: fetch.request });
        }
        actions.push(ClientAction::Notify(Notification::DirectoryChanged));
        actions
    }

    fn handle_send_message(
        &mut self,
        draft: MessageDraft,
    ) -> Result<Vec<ClientAction>, ClientError> {
        self.ensure_running()?;
        if draft.is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        if !self.directory.contains(&draft.room_id) {
            return Err(ClientError::RoomNotFound { room_id: draft.room_id });
        }
        Ok(self.enqueue_send(draft))
    }

    fn handle_retry_send(
        &mut self,
        provisional_id: &MessageId,
    ) -> Result<Vec<ClientAction>, ClientError> {
        self.ensure_running()?;
        let failed = self.find_failed(provisional_id)?;
        let room_id = failed.room_id.clone();
        let draft = MessageDraft::from_message(failed);

        self.timeline_mut(&room_id).discard(provisional_id);
        tracing::debug!(%provisional_id, "retrying failed send");
        Ok(self.enqueue_send(draft))
    }

    fn handle_discard_failed(
        &mut self,
        provisional_id: &MessageId,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let room_id = self.find_failed(provisional_id)?.room_id.clone();
        self.timeline_mut(&room_id).discard(provisional_id);
        self.refresh_room_summary(&room_id);
        tracing::debug!(%provisional_id, "discarded failed send");
        Ok(vec![
            ClientAction::Notify(Notification::TimelineChanged { room_id }),
            ClientAction::Notify(Notification::DirectoryChanged),
        ])
    }

    fn handle_create_room(
        &mut self,
        participant_ids: Vec<UserId>,
        kind: RoomKind,
        title: Option<String>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        self.ensure_running()?;

        let mut members = vec![self.session.user_id.clone()];
        for participant in participant_ids {
            if !members.contains(&participant) {
                members.push(participant);
            }
        }
        if members.len() < 2 {
            return Err(ClientError::NoParticipants);
        }

        let request = self.allocate_request();
        self.pending_creates.insert(request);
        Ok(vec![ClientAction::CreateRoom {
            request,
            participant_ids: members,
            kind,
            title: title.filter(|title| !title.trim().is_empty()),
        }])
    }

    fn handle_reload_history(&mut self, room_id: RoomId) -> Result<Vec<ClientAction>, ClientError> {
        self.ensure_running()?;
        if self.directory.active_room_id() != Some(&room_id) {
            return Err(ClientError::RoomNotActive { room_id });
        }
        Ok(self.request_history_fetch(room_id))
    }

    fn ensure_running(&self) -> Result<(), ClientError> {
        if self.running { Ok(()) } else { Err(ClientError::SessionClosed) }
    }

    fn apply_subscription_actions(
        &mut self,
        actions: Vec<SubscriptionAction>,
    ) -> Vec<ClientAction> {
        let mut out = Vec::with_capacity(actions.len());
        for action in actions {
            match action {
                SubscriptionAction::Subscribe { subscription, filter } => {
                    out.push(ClientAction::Subscribe { subscription, filter });
                },
                SubscriptionAction::Unsubscribe { subscription } => {
                    out.push(ClientAction::Unsubscribe { subscription });
                },
                SubscriptionAction::Resync { room } => {
                    tracing::debug!(room = ?room, "resyncing after channel open");
                    out.extend(self.request_directory_fetch());
                    if let Some(room_id) = room {
                        out.extend(self.request_history_fetch(room_id));
                    }
                },
                SubscriptionAction::StateChanged(state) => {
                    out.push(ClientAction::Notify(Notification::ConnectionChanged(state)));
                },
            }
        }
        out
    }

    fn request_directory_fetch(&mut self) -> Vec<ClientAction> {
        if let Some(fetch) = &mut self.directory_fetch {
            fetch.refetch = true;
            return Vec::new();
        }
        let request = self.allocate_request();
        self.directory_fetch = Some(DirectoryFetch { request, refetch: false });
        vec![ClientAction::FetchRooms { request }]
    }

    fn request_history_fetch(&mut self, room_id: RoomId) -> Vec<ClientAction> {
        if let Some(fetch) = &mut self.history_fetch
            && fetch.room_id == room_id
        {
            fetch.refetch = true;
            return Vec::new();
        }

        let mut actions = Vec::new();
        if let Some(stale) = self.history_fetch.take() {
            tracing::debug!(
                request = %stale.request,
                room = %stale.room_id,
                "cancelling history fetch"
            );
            actions.push(ClientAction::CancelFetch { request: stale.request });
        }

        let request = self.allocate_request();
        self.history_fetch =
            Some(HistoryFetch { request, room_id: room_id.clone(), refetch: false });
        actions.push(ClientAction::FetchMessages { request, room_id });
        actions
    }

    fn apply_room(&mut self, room: Room) -> Vec<ClientAction> {
        let room_id = room.id.clone();
        if self.directory.apply_room_changed(room) == RoomChange::Unchanged {
            return Vec::new();
        }
        self.refresh_room_summary(&room_id);
        vec![ClientAction::Notify(Notification::DirectoryChanged)]
    }

    fn accept_message(&mut self, message: Message) -> Vec<ClientAction> {
        let room_id = message.room_id.clone();
        let from_self = message.sender_id == self.session.user_id;
        let message_id = message.id.clone();

        let outcome = self.timeline_mut(&room_id).append_from_push(message);
        match &outcome {
            Accepted::Inserted => {
                self.read_state.on_message_accepted(&room_id, from_self);
            },
            Accepted::Confirmed { provisional_id } => {
                self.pending_sends.remove(provisional_id);
            },
            Accepted::Updated => {},
            Accepted::Duplicate | Accepted::Ignored => {
                tracing::debug!(message = %message_id, room = %room_id, "duplicate push message");
                return Vec::new();
            },
        }

        self.refresh_room_summary(&room_id);
        let mut actions = vec![
            ClientAction::Notify(Notification::TimelineChanged { room_id: room_id.clone() }),
            ClientAction::Notify(Notification::DirectoryChanged),
        ];
        if !self.directory.contains(&room_id) {
            tracing::debug!(room = %room_id, "message for unknown room, reloading directory");
            actions.extend(self.request_directory_fetch());
        }
        actions
    }

    fn enqueue_send(&mut self, draft: MessageDraft) -> Vec<ClientAction> {
        let provisional_id = MessageId::new(format!("local-{:016x}", self.env.random_u64()));
        let room_id = draft.room_id.clone();
        let now_ms = self.env.wall_clock_millis();

        let action = ClientAction::Send {
            provisional_id: provisional_id.clone(),
            room_id: room_id.clone(),
            body: draft.body.clone(),
            kind: draft.kind,
            attachment_ref: draft.attachment_ref.clone(),
            client_ref: provisional_id.to_string(),
        };

        let grace = self.config.grace_window;
        let timeline = self
            .timelines
            .entry(room_id.clone())
            .or_insert_with(|| Timeline::new(room_id.clone(), grace));
        timeline.append_optimistic(draft, provisional_id.clone(), &self.session, now_ms);

        let started = self.env.now();
        let pending = PendingSend { room_id: room_id.clone(), started };
        self.pending_sends.insert(provisional_id, pending);
        self.refresh_room_summary(&room_id);

        vec![
            action,
            ClientAction::Notify(Notification::TimelineChanged { room_id }),
            ClientAction::Notify(Notification::DirectoryChanged),
        ]
    }

    fn fail_send(
        &mut self,
        provisional_id: &MessageId,
        room_id: &RoomId,
        error: SendError,
    ) -> Vec<ClientAction> {
        let Some(timeline) = self.timelines.get_mut(room_id) else {
            return Vec::new();
        };
        if !timeline.mark_failed(provisional_id) {
            tracing::debug!(%provisional_id, %error, "send failure for entry no longer pending");
            return Vec::new();
        }

        tracing::warn!(%provisional_id, room = %room_id, %error, "send failed");
        vec![
            ClientAction::Notify(Notification::SendFailed {
                provisional_id: provisional_id.clone(),
                room_id: room_id.clone(),
                error,
            }),
            ClientAction::Notify(Notification::TimelineChanged { room_id: room_id.clone() }),
        ]
    }

    fn find_failed(&self, provisional_id: &MessageId) -> Result<&Message, ClientError> {
        let found = self
            .timelines
            .values()
            .find_map(|timeline| timeline.get(provisional_id))
            .ok_or_else(|| ClientError::UnknownMessage { id: provisional_id.clone() })?;

        if found.id != *provisional_id || found.delivery_state != DeliveryState::Failed {
            return Err(ClientError::NotFailed { id: provisional_id.clone() });
        }
        Ok(found)
    }

    /// Drop pending-send bookkeeping for entries a merge has confirmed.
    fn prune_pending_sends(&mut self, room_id: &RoomId) {
        let Some(timeline) = self.timelines.get(room_id) else {
            return;
        };
        self.pending_sends.retain(|id, pending| {
            &pending.room_id != room_id
                || timeline
                    .get(id)
                    .is_some_and(|m| m.id == *id && m.delivery_state == DeliveryState::Pending)
        });
    }

    /// Re-derive a room's summary from its timeline so activity always
    /// covers the newest confirmed message. Provisional entries are stamped
    /// by the local clock and stay out of the summary.
    fn refresh_room_summary(&mut self, room_id: &RoomId) {
        let Some(timeline) = self.timelines.get(room_id) else {
            return;
        };
        let newest = timeline
            .iter()
            .filter(|m| m.delivery_state == DeliveryState::Confirmed)
            .max_by_key(|m| m.created_at);
        if let Some(newest) = newest {
            self.directory.note_message(newest, timeline.accepted_count());
        }
    }

    fn timeline_mut(&mut self, room_id: &RoomId) -> &mut Timeline {
        let grace = self.config.grace_window;
        self.timelines
            .entry(room_id.clone())
            .or_insert_with(|| Timeline::new(room_id.clone(), grace))
    }

    fn allocate_request(&mut self) -> RequestId {
        let request = RequestId(self.next_request);
        self.next_request += 1;
        request
    }
}
