//! In-memory backend for simulation.
//!
//! `SimServer` is the authoritative store: rooms, messages and live push
//! subscriptions. Every mutation publishes an envelope to the matching
//! subscribers, passing through the configured [`ChaosConfig`] which may
//! drop, duplicate or hold back (reorder) individual deliveries.
//!
//! The server is synchronous. [`SimDriver`](crate::SimDriver) calls it
//! directly; [`SimBackend`] and [`SimPush`] wrap it in the async traits of
//! `chatsync-app` so the real runtime can run against it.

use std::{
    collections::{BTreeMap, BTreeSet},
    future::{Future, ready},
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll},
};

use chatsync_app::{Backend, PushSource};
use chatsync_core::{Environment, FetchError, SendError, Session, SubscriptionError};
use chatsync_proto::{
    CreateRoomRequest, MessageDto, MessageKind, PushItem, RawEvent, RoomDto, RoomId, RoomKind,
    SendRequest, SubscriptionFilter, UserId,
};
use futures::Stream;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::mpsc;

use crate::SimEnv;

type PushSender = mpsc::UnboundedSender<Result<PushItem, SubscriptionError>>;

/// Fault injection on the push channel and the send call.
///
/// Rates are probabilities in `[0, 1]`; values outside are clamped, NaN
/// counts as zero.
#[derive(Debug, Clone, PartialEq)]
pub struct ChaosConfig {
    /// Probability a push delivery is lost
    pub drop_rate: f64,
    /// Probability a push delivery arrives twice
    pub duplicate_rate: f64,
    /// Probability a push delivery is held back behind the next one
    pub reorder_rate: f64,
    /// Probability a send call fails without storing the message
    pub send_failure_rate: f64,
    /// Whether push echoes carry the sender's correlation token
    pub echo_client_ref: bool,
    /// How far the session client's wall clock runs ahead of the server's,
    /// in milliseconds; negative runs behind. Read by [`crate::Scenario`]
    /// when it builds the client's environment.
    pub client_clock_skew_ms: i64,
}

impl ChaosConfig {
    /// Reliable delivery.
    pub fn none() -> Self {
        Self {
            drop_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            send_failure_rate: 0.0,
            echo_client_ref: true,
            client_clock_skew_ms: 0,
        }
    }

    /// Moderate loss, duplication and reordering.
    pub fn lossy() -> Self {
        Self {
            drop_rate: 0.1,
            duplicate_rate: 0.1,
            reorder_rate: 0.2,
            send_failure_rate: 0.05,
            echo_client_ref: true,
            client_clock_skew_ms: 0,
        }
    }
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self::none()
    }
}

fn roll(rng: &mut ChaCha8Rng, rate: f64) -> bool {
    rate > 0.0 && rng.gen_bool(rate.min(1.0))
}

struct Subscriber {
    user_id: UserId,
    filter: SubscriptionFilter,
    sender: PushSender,
    /// Delivery held back by reordering, released after the next one
    held: Option<PushItem>,
}

struct ServerState {
    env: SimEnv,
    rng: ChaCha8Rng,
    chaos: ChaosConfig,
    offline: bool,
    refuse_subscriptions: Option<SubscriptionError>,
    rooms: BTreeMap<RoomId, RoomDto>,
    messages: BTreeMap<RoomId, Vec<MessageDto>>,
    read_acks: BTreeMap<(RoomId, UserId), u64>,
    subscribers: BTreeMap<u64, Subscriber>,
    next_subscriber: u64,
    next_room: u64,
    next_message: u64,
    last_stamp: u64,
    published: u64,
}

impl ServerState {
    fn stamp(&mut self) -> u64 {
        self.last_stamp = (self.last_stamp + 1).max(self.env.wall_clock_millis());
        self.last_stamp
    }

    fn participant(&self, room_id: &RoomId, user: &UserId) -> Option<&RoomDto> {
        self.rooms.get(room_id).filter(|room| is_member(room, user))
    }

    fn publish(&mut self, raw: &RawEvent, room: &RoomDto) {
        self.published += 1;
        let ids: Vec<u64> = self.subscribers.keys().copied().collect();
        for id in ids {
            let Some(subscriber) = self.subscribers.get(&id) else {
                continue;
            };
            if !subscriber.filter.matches_channel(&raw.channel) {
                continue;
            }
            if !is_member(room, &subscriber.user_id) {
                continue;
            }
            let item = PushItem::Event(self.scoped(raw));
            self.deliver(id, item);
        }
    }

    /// Strip the correlation token from echoes if the chaos config says so.
    fn scoped(&self, raw: &RawEvent) -> RawEvent {
        let mut raw = raw.clone();
        if !self.chaos.echo_client_ref
            && let Some(payload) = raw.payload.as_object_mut()
        {
            payload.remove("clientRef");
        }
        raw
    }

    fn deliver(&mut self, subscriber_id: u64, item: PushItem) {
        let drop = roll(&mut self.rng, self.chaos.drop_rate);
        let duplicate = roll(&mut self.rng, self.chaos.duplicate_rate);
        let hold = roll(&mut self.rng, self.chaos.reorder_rate);

        let Some(subscriber) = self.subscribers.get_mut(&subscriber_id) else {
            return;
        };
        let released = subscriber.held.take();

        if drop {
            tracing::trace!(subscriber = subscriber_id, "chaos: dropped push delivery");
        } else if hold && released.is_none() {
            subscriber.held = Some(item);
        } else {
            let _ = subscriber.sender.send(Ok(item.clone()));
            if duplicate {
                let _ = subscriber.sender.send(Ok(item));
            }
        }

        if let Some(released) = released {
            let _ = subscriber.sender.send(Ok(released));
        }
    }
}

fn is_member(room: &RoomDto, user: &UserId) -> bool {
    room.participant_ids.contains(user) || room.created_by.as_ref() == Some(user)
}

/// Authoritative in-memory store.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SimServer {
    state: Arc<Mutex<ServerState>>,
}

impl SimServer {
    /// Empty server. `env` stamps messages and rooms; `seed` drives chaos.
    pub fn new(env: SimEnv, seed: u64) -> Self {
        let state = ServerState {
            env,
            rng: ChaCha8Rng::seed_from_u64(seed),
            chaos: ChaosConfig::none(),
            offline: false,
            refuse_subscriptions: None,
            rooms: BTreeMap::new(),
            messages: BTreeMap::new(),
            read_acks: BTreeMap::new(),
            subscribers: BTreeMap::new(),
            next_subscriber: 1,
            next_room: 1,
            next_message: 1,
            last_stamp: 0,
            published: 0,
        };
        Self { state: Arc::new(Mutex::new(state)) }
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the fault injection settings.
    pub fn set_chaos(&self, chaos: ChaosConfig) {
        self.lock().chaos = chaos;
    }

    /// Current fault injection settings.
    pub fn chaos(&self) -> ChaosConfig {
        self.lock().chaos.clone()
    }

    /// While offline every call fails with a transport error and new
    /// subscriptions are refused. Live subscriptions are not affected.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Refuse new subscriptions with `error` until reset with `None`.
    pub fn refuse_subscriptions(&self, error: Option<SubscriptionError>) {
        self.lock().refuse_subscriptions = error;
    }

    /// Create a room directly on the server and announce it.
    pub fn add_room(
        &self,
        creator: &UserId,
        participant_ids: Vec<UserId>,
        kind: RoomKind,
        title: &str,
    ) -> RoomDto {
        let mut state = self.lock();
        let id = RoomId::new(format!("r{:04}", state.next_room));
        state.next_room += 1;

        let mut participants: Vec<UserId> = Vec::new();
        for user in participant_ids.into_iter().chain([creator.clone()]) {
            if !participants.contains(&user) {
                participants.push(user);
            }
        }

        let room = RoomDto {
            id: id.clone(),
            title: title.to_owned(),
            kind,
            participant_ids: participants,
            created_by: Some(creator.clone()),
            last_message_preview: None,
            last_activity_at: state.stamp(),
            message_count: 0,
            active: true,
        };
        state.rooms.insert(id.clone(), room.clone());
        state.messages.insert(id, Vec::new());

        match RawEvent::room_changed(&room, "create") {
            Ok(raw) => state.publish(&raw, &room),
            Err(error) => tracing::warn!(%error, "failed to encode room event"),
        }
        room
    }

    /// Store a message from `sender` and announce it. Bypasses chaos on the
    /// call itself, not on the push delivery.
    pub fn post(
        &self,
        sender: &Session,
        room_id: &RoomId,
        body: &str,
        client_ref: Option<String>,
    ) -> Result<MessageDto, SendError> {
        let mut state = self.lock();
        let draft = Draft { room_id, body, kind: MessageKind::Text, attachment_ref: None };
        store_message(&mut state, sender, draft, client_ref)
    }

    /// Publish an arbitrary envelope to every matching subscriber, regardless
    /// of membership.
    pub fn publish_raw(&self, raw: &RawEvent) {
        let mut state = self.lock();
        let ids: Vec<u64> = state
            .subscribers
            .iter()
            .filter(|(_, s)| s.filter.matches_channel(&raw.channel))
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            state.deliver(id, PushItem::Event(raw.clone()));
        }
    }

    /// Send a heartbeat on every live subscription.
    pub fn heartbeat(&self) {
        let state = self.lock();
        for subscriber in state.subscribers.values() {
            let _ = subscriber.sender.send(Ok(PushItem::Heartbeat));
        }
    }

    /// Fail every live subscription with a transport error.
    pub fn disconnect_all(&self) {
        let mut state = self.lock();
        for (_, subscriber) in std::mem::take(&mut state.subscribers) {
            let error = SubscriptionError::Transport("disconnected".into());
            let _ = subscriber.sender.send(Err(error));
        }
    }

    /// Deliver every held-back push item.
    pub fn flush_held(&self) {
        let mut state = self.lock();
        for subscriber in state.subscribers.values_mut() {
            if let Some(item) = subscriber.held.take() {
                let _ = subscriber.sender.send(Ok(item));
            }
        }
    }

    /// Rooms `user` participates in.
    pub fn rooms_for(&self, user: &UserId) -> Vec<RoomDto> {
        self.lock().rooms.values().filter(|room| is_member(room, user)).cloned().collect()
    }

    /// One room.
    pub fn room(&self, room_id: &RoomId) -> Option<RoomDto> {
        self.lock().rooms.get(room_id).cloned()
    }

    /// Stored messages of a room, oldest first.
    pub fn messages(&self, room_id: &RoomId) -> Vec<MessageDto> {
        self.lock().messages.get(room_id).cloned().unwrap_or_default()
    }

    /// Read acknowledgements `user` has sent for a room.
    pub fn read_acks(&self, room_id: &RoomId, user: &UserId) -> u64 {
        self.lock().read_acks.get(&(room_id.clone(), user.clone())).copied().unwrap_or(0)
    }

    /// Live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Envelopes published by mutations so far.
    pub fn published(&self) -> u64 {
        self.lock().published
    }

    /// Rooms visible to `user`.
    pub fn fetch_rooms(&self, user: &UserId) -> Result<Vec<RoomDto>, FetchError> {
        let state = self.lock();
        if state.offline {
            return Err(FetchError::Transport("backend offline".into()));
        }
        Ok(state.rooms.values().filter(|room| is_member(room, user)).cloned().collect())
    }

    /// History of a room `user` participates in.
    pub fn fetch_messages(
        &self,
        user: &UserId,
        room_id: &RoomId,
    ) -> Result<Vec<MessageDto>, FetchError> {
        let state = self.lock();
        if state.offline {
            return Err(FetchError::Transport("backend offline".into()));
        }
        if state.participant(room_id, user).is_none() {
            return Err(FetchError::Unauthorized);
        }
        Ok(state.messages.get(room_id).cloned().unwrap_or_default())
    }

    /// Store a message sent by `sender`. Subject to `send_failure_rate`.
    pub fn send(&self, sender: &Session, request: SendRequest) -> Result<MessageDto, SendError> {
        let mut state = self.lock();
        if state.offline {
            return Err(SendError::Transport("backend offline".into()));
        }
        let rate = state.chaos.send_failure_rate;
        if roll(&mut state.rng, rate) {
            return Err(SendError::Transport("chaos: send failed".into()));
        }

        let draft = Draft {
            room_id: &request.room_id,
            body: &request.body,
            kind: request.kind,
            attachment_ref: request.attachment_ref.clone(),
        };
        store_message(&mut state, sender, draft, Some(request.client_ref))
    }

    /// Create a room on behalf of `creator`.
    pub fn create_room(
        &self,
        creator: &UserId,
        request: CreateRoomRequest,
    ) -> Result<RoomDto, SendError> {
        if self.lock().offline {
            return Err(SendError::Transport("backend offline".into()));
        }
        let distinct: BTreeSet<&UserId> = request.participant_ids.iter().collect();
        if distinct.len() < 2 {
            return Err(SendError::Rejected("a room needs at least two participants".into()));
        }
        let title = request.title.as_deref().unwrap_or_default();
        Ok(self.add_room(creator, request.participant_ids, request.kind, title))
    }

    /// Record a read acknowledgement.
    pub fn acknowledge_read(&self, user: &UserId, room_id: &RoomId) -> Result<(), FetchError> {
        let mut state = self.lock();
        if state.offline {
            return Err(FetchError::Transport("backend offline".into()));
        }
        if state.participant(room_id, user).is_none() {
            return Err(FetchError::Unauthorized);
        }
        *state.read_acks.entry((room_id.clone(), user.clone())).or_insert(0) += 1;
        Ok(())
    }

    /// Open a subscription for `user`.
    pub fn subscribe(
        &self,
        user: &UserId,
        filter: SubscriptionFilter,
    ) -> Result<(u64, SimStream), SubscriptionError> {
        let mut state = self.lock();
        if let Some(error) = &state.refuse_subscriptions {
            return Err(error.clone());
        }
        if state.offline {
            return Err(SubscriptionError::Transport("backend offline".into()));
        }
        if let SubscriptionFilter::Room { room_id } = &filter
            && state.participant(room_id, user).is_none()
        {
            return Err(SubscriptionError::Unauthorized);
        }

        let id = state.next_subscriber;
        state.next_subscriber += 1;
        let (sender, receiver) = mpsc::unbounded_channel();
        state
            .subscribers
            .insert(id, Subscriber { user_id: user.clone(), filter, sender, held: None });
        Ok((id, SimStream { receiver }))
    }

    /// Close a subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: u64) {
        self.lock().subscribers.remove(&id);
    }
}

struct Draft<'a> {
    room_id: &'a RoomId,
    body: &'a str,
    kind: MessageKind,
    attachment_ref: Option<String>,
}

fn store_message(
    state: &mut ServerState,
    sender: &Session,
    draft: Draft<'_>,
    client_ref: Option<String>,
) -> Result<MessageDto, SendError> {
    let Draft { room_id, body, kind, attachment_ref } = draft;
    if state.participant(room_id, &sender.user_id).is_none() {
        return Err(SendError::Unauthorized);
    }

    let id = format!("m{:06}", state.next_message);
    state.next_message += 1;
    let created_at = state.stamp();

    let message = MessageDto {
        id: id.into(),
        room_id: room_id.clone(),
        sender_id: sender.user_id.clone(),
        sender_display_name: sender.display_name.clone(),
        body: body.to_owned(),
        kind,
        attachment_ref,
        created_at,
        read_by_others: false,
        client_ref,
    };

    let Some(room) = state.rooms.get_mut(room_id) else {
        return Err(SendError::Rejected(format!("room {room_id} vanished")));
    };
    room.last_activity_at = created_at;
    room.message_count += 1;
    room.last_message_preview = Some(body.chars().take(80).collect());
    let room = room.clone();
    state.messages.entry(room_id.clone()).or_default().push(message.clone());

    match RawEvent::message_created(&message) {
        Ok(raw) => state.publish(&raw, &room),
        Err(error) => tracing::warn!(%error, "failed to encode message event"),
    }
    Ok(message)
}

/// Push stream of one simulated subscription.
#[derive(Debug)]
pub struct SimStream {
    receiver: mpsc::UnboundedReceiver<Result<PushItem, SubscriptionError>>,
}

impl SimStream {
    /// Everything already queued, and whether the server side is gone.
    pub fn drain(&mut self) -> (Vec<Result<PushItem, SubscriptionError>>, bool) {
        let mut items = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(item) => items.push(item),
                Err(mpsc::error::TryRecvError::Empty) => return (items, false),
                Err(mpsc::error::TryRecvError::Disconnected) => return (items, true),
            }
        }
    }
}

impl Stream for SimStream {
    type Item = Result<PushItem, SubscriptionError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// [`Backend`] over a [`SimServer`], acting as one session user.
#[derive(Clone)]
pub struct SimBackend {
    server: SimServer,
    session: Session,
}

impl SimBackend {
    /// Backend calls on behalf of `session`.
    pub fn new(server: SimServer, session: Session) -> Self {
        Self { server, session }
    }
}

impl Backend for SimBackend {
    fn fetch_rooms(&self) -> impl Future<Output = Result<Vec<RoomDto>, FetchError>> + Send {
        ready(self.server.fetch_rooms(&self.session.user_id))
    }

    fn fetch_messages(
        &self,
        room_id: RoomId,
    ) -> impl Future<Output = Result<Vec<MessageDto>, FetchError>> + Send {
        ready(self.server.fetch_messages(&self.session.user_id, &room_id))
    }

    fn send(
        &self,
        request: SendRequest,
    ) -> impl Future<Output = Result<MessageDto, SendError>> + Send {
        ready(self.server.send(&self.session, request))
    }

    fn create_room(
        &self,
        request: CreateRoomRequest,
    ) -> impl Future<Output = Result<RoomDto, SendError>> + Send {
        ready(self.server.create_room(&self.session.user_id, request))
    }

    fn acknowledge_read(
        &self,
        room_id: RoomId,
    ) -> impl Future<Output = Result<(), FetchError>> + Send {
        ready(self.server.acknowledge_read(&self.session.user_id, &room_id))
    }
}

/// [`PushSource`] over a [`SimServer`], acting as one session user.
#[derive(Clone)]
pub struct SimPush {
    server: SimServer,
    user_id: UserId,
}

impl SimPush {
    /// Subscriptions on behalf of `user_id`.
    pub fn new(server: SimServer, user_id: UserId) -> Self {
        Self { server, user_id }
    }
}

impl PushSource for SimPush {
    type Handle = u64;
    type Stream = SimStream;

    fn subscribe(
        &self,
        filter: SubscriptionFilter,
    ) -> impl Future<Output = Result<(u64, SimStream), SubscriptionError>> + Send {
        ready(self.server.subscribe(&self.user_id, filter))
    }

    fn unsubscribe(&self, handle: u64) -> impl Future<Output = ()> + Send {
        self.server.unsubscribe(handle);
        ready(())
    }
}
