//! Simulation driver for the Sans-IO client.
//!
//! `SimDriver` plays the role of `SyncRuntime` without tasks or channels: it
//! executes the client's actions against a [`SimServer`] synchronously and
//! queues their results as completions. Completions are delivered one at a
//! time in seeded random order, which reproduces the interleavings spawned
//! tasks produce in production, and push items are pulled from the
//! subscription streams on demand.

use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

use chatsync_client::{
    Client, ClientAction, ClientError, ClientEvent, Notification, RequestId, SubscriptionId,
};
use chatsync_core::{Environment, Session, SubscriptionError, SyncConfig};
use chatsync_proto::{CreateRoomRequest, RoomId, SendRequest};

use crate::{
    SimEnv, SimInstant, SimServer, SimStream,
    invariants::{ClientSnapshot, InvariantRegistry, SystemSnapshot, Violation},
};

/// A live subscription as the driver sees it.
struct LiveStream {
    handle: u64,
    stream: SimStream,
}

/// Deterministic driver of one client against one server.
pub struct SimDriver {
    env: SimEnv,
    server: SimServer,
    client: Client<SimEnv>,
    /// Results of executed actions, not yet fed to the client
    completions: Vec<ClientEvent<SimInstant>>,
    streams: BTreeMap<SubscriptionId, LiveStream>,
    notifications: Vec<Notification>,
    invariants: Option<InvariantRegistry>,
    activity_history: HashMap<RoomId, Vec<u64>>,
    violations: Vec<(u64, Violation)>,
    steps: u64,
}

impl SimDriver {
    /// Driver for a new client of `session`.
    pub fn new(env: SimEnv, server: SimServer, session: Session, config: SyncConfig) -> Self {
        let client = Client::new(env.clone(), session, config);
        Self {
            env,
            server,
            client,
            completions: Vec::new(),
            streams: BTreeMap::new(),
            notifications: Vec::new(),
            invariants: None,
            activity_history: HashMap::new(),
            violations: Vec::new(),
            steps: 0,
        }
    }

    /// Enable invariant checking after every fed event.
    #[must_use]
    pub fn with_invariants(mut self, registry: InvariantRegistry) -> Self {
        self.invariants = Some(registry);
        self
    }

    /// The driven client.
    pub fn client(&self) -> &Client<SimEnv> {
        &self.client
    }

    /// The simulated environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// The server the client talks to.
    pub fn server(&self) -> &SimServer {
        &self.server
    }

    /// Completions not yet delivered.
    pub fn pending_completions(&self) -> usize {
        self.completions.len()
    }

    /// Every notification the client produced so far.
    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    /// Drain the notifications recorded so far.
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    /// Invariant violations found so far, tagged with the step they
    /// appeared at.
    pub fn violations(&self) -> &[(u64, Violation)] {
        &self.violations
    }

    /// Start the session.
    pub fn start(&mut self) {
        self.feed(ClientEvent::Start);
    }

    /// Feed a user intent and execute the resulting actions.
    pub fn intent(
        &mut self,
        event: ClientEvent<SimInstant>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let actions = self.client.handle(event)?;
        self.execute(actions.clone());
        self.after_step();
        Ok(actions)
    }

    /// Deliver one queued completion, chosen at random. Returns `false` if
    /// none was queued.
    pub fn deliver_one(&mut self) -> bool {
        if self.completions.is_empty() {
            return false;
        }
        let index = self.env.pick(self.completions.len());
        let event = self.completions.swap_remove(index);
        self.feed(event);
        true
    }

    /// Deliver queued completions in order until none is left, including
    /// ones queued while delivering.
    pub fn deliver_all(&mut self) -> usize {
        let mut delivered = 0;
        while !self.completions.is_empty() {
            let event = self.completions.remove(0);
            self.feed(event);
            delivered += 1;
        }
        delivered
    }

    /// Feed every push item already waiting on a live subscription. Returns
    /// the number of events fed.
    pub fn pump_push(&mut self) -> usize {
        let mut events = Vec::new();
        let mut ended = Vec::new();
        for (subscription, live) in &mut self.streams {
            let (items, closed) = live.stream.drain();
            let mut failed = false;
            for item in items {
                match item {
                    Ok(item) => {
                        events.push(ClientEvent::Push { subscription: *subscription, item });
                    },
                    Err(error) => {
                        events.push(ClientEvent::SubscriptionFailed {
                            subscription: *subscription,
                            error,
                        });
                        failed = true;
                        break;
                    },
                }
            }
            if closed && !failed {
                events.push(ClientEvent::SubscriptionFailed {
                    subscription: *subscription,
                    error: SubscriptionError::Closed,
                });
            }
            if closed || failed {
                ended.push(*subscription);
            }
        }
        for subscription in ended {
            if let Some(live) = self.streams.remove(&subscription) {
                self.server.unsubscribe(live.handle);
            }
        }

        let count = events.len();
        for event in events {
            self.feed(event);
        }
        count
    }

    /// Advance the virtual clock and tick the client.
    pub fn tick(&mut self, elapsed: Duration) {
        self.env.advance(elapsed);
        let now = self.env.now();
        self.feed(ClientEvent::Tick { now });
    }

    /// Pump push items and deliver completions until neither produces
    /// anything, or `max_rounds` is reached. Returns `true` if quiet.
    pub fn run_until_quiet(&mut self, max_rounds: usize) -> bool {
        for _ in 0..max_rounds {
            let pushed = self.pump_push();
            let delivered = self.deliver_all();
            if pushed == 0 && delivered == 0 {
                return true;
            }
        }
        false
    }

    /// Tick in `step` increments until the push channel is open, for at most
    /// `limit` of virtual time. Returns whether it opened.
    pub fn tick_until_open(&mut self, step: Duration, limit: Duration) -> bool {
        let deadline = self.env.elapsed() + limit;
        loop {
            self.run_until_quiet(16);
            if self.client.connection_state() == chatsync_core::ConnectionState::Open {
                return true;
            }
            if self.env.elapsed() >= deadline {
                return false;
            }
            self.tick(step);
        }
    }

    /// Observable state of the client, including activity history.
    pub fn snapshot(&self) -> SystemSnapshot {
        let mut client = ClientSnapshot::capture(0, &self.client);
        client.activity_history.clone_from(&self.activity_history);
        SystemSnapshot::single(client)
    }

    fn feed(&mut self, event: ClientEvent<SimInstant>) {
        match self.client.handle(event) {
            Ok(actions) => self.execute(actions),
            Err(error) => tracing::debug!(%error, "client refused event"),
        }
        self.after_step();
    }

    fn after_step(&mut self) {
        self.steps += 1;
        for room in self.client.all_rooms() {
            let history = self.activity_history.entry(room.id.clone()).or_default();
            if history.last() != Some(&room.last_activity_at) {
                history.push(room.last_activity_at);
            }
        }

        let Some(registry) = &self.invariants else {
            return;
        };
        if let Err(found) = registry.check_all(&self.snapshot()) {
            let step = self.steps;
            self.violations.extend(found.into_iter().map(|violation| (step, violation)));
        }
    }

    fn execute(&mut self, actions: Vec<ClientAction>) {
        let session = self.client.session().clone();
        for action in actions {
            match action {
                ClientAction::FetchRooms { request } => {
                    let result = self.server.fetch_rooms(&session.user_id);
                    self.completions.push(ClientEvent::RoomsFetched { request, result });
                },
                ClientAction::FetchMessages { request, room_id } => {
                    let result = self.server.fetch_messages(&session.user_id, &room_id);
                    self.completions.push(ClientEvent::HistoryFetched {
                        request,
                        room_id,
                        result,
                    });
                },
                ClientAction::CancelFetch { request } => self.cancel(request),
                ClientAction::Send {
                    provisional_id,
                    room_id,
                    body,
                    kind,
                    attachment_ref,
                    client_ref,
                } => {
                    let request = SendRequest {
                        room_id: room_id.clone(),
                        body,
                        kind,
                        attachment_ref,
                        client_ref,
                    };
                    let result = self.server.send(&session, request);
                    self.completions.push(ClientEvent::SendCompleted {
                        provisional_id,
                        room_id,
                        result,
                    });
                },
                ClientAction::CreateRoom { request, participant_ids, kind, title } => {
                    let create = CreateRoomRequest { participant_ids, kind, title };
                    let result = self.server.create_room(&session.user_id, create);
                    self.completions.push(ClientEvent::RoomCreated { request, result });
                },
                ClientAction::AcknowledgeRead { room_id, attempt } => {
                    let result = self.server.acknowledge_read(&session.user_id, &room_id);
                    self.completions.push(ClientEvent::ReadAcknowledged {
                        room_id,
                        attempt,
                        result,
                    });
                },
                ClientAction::Subscribe { subscription, filter } => {
                    match self.server.subscribe(&session.user_id, filter) {
                        Ok((handle, stream)) => {
                            self.streams.insert(subscription, LiveStream { handle, stream });
                            self.completions.push(ClientEvent::SubscriptionReady { subscription });
                        },
                        Err(error) => {
                            self.completions
                                .push(ClientEvent::SubscriptionFailed { subscription, error });
                        },
                    }
                },
                ClientAction::Unsubscribe { subscription } => {
                    if let Some(live) = self.streams.remove(&subscription) {
                        self.server.unsubscribe(live.handle);
                    }
                },
                ClientAction::Notify(notification) => self.notifications.push(notification),
            }
        }
    }

    /// Drop the queued result of a cancelled fetch, as aborting its task
    /// would.
    fn cancel(&mut self, cancelled: RequestId) {
        self.completions.retain(|event| match event {
            ClientEvent::RoomsFetched { request, .. }
            | ClientEvent::HistoryFetched { request, .. } => *request != cancelled,
            _ => true,
        });
    }
}
