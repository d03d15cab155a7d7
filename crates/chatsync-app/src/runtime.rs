//! Async runtime.
//!
//! Event loop that owns the [`Client`] and executes its actions. Uses
//! `tokio::select!` to multiplex three inputs onto one serialized path:
//!
//! - commands from [`SyncHandle`]s
//! - results of spawned backend calls and push subscription items
//! - the maintenance tick driving timeouts and reconnects
//!
//! Backend calls and subscriptions run as spawned tasks that report back
//! through the event queue, so a slow backend never stalls the loop.

use std::{collections::HashMap, ops::ControlFlow, sync::Arc};

use chatsync_client::{
    Client, ClientAction, ClientError, ClientEvent, Environment, Notification, RequestId, Session,
    SubscriptionId,
};
use chatsync_core::{Message, MessageDraft, SubscriptionError, SyncConfig};
use chatsync_proto::{CreateRoomRequest, MessageId, RoomId, RoomKind, SendRequest, UserId};
use futures::StreamExt;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::{
    backend::{Backend, PushSource},
    error::RuntimeError,
    handle::SyncHandle,
    view::SyncView,
};

type Reply<T> = oneshot::Sender<Result<T, RuntimeError>>;

/// Requests queued by [`SyncHandle`].
#[derive(Debug)]
pub(crate) enum Command {
    SetActiveRoom { room_id: Option<RoomId>, reply: Reply<()> },
    Send { draft: MessageDraft, reply: Reply<Message> },
    RetrySend { provisional_id: MessageId, reply: Reply<Message> },
    DiscardFailed { provisional_id: MessageId, reply: Reply<()> },
    CreateRoom {
        participant_ids: Vec<UserId>,
        kind: RoomKind,
        title: Option<String>,
        reply: Reply<RoomId>,
    },
    ReloadRooms { reply: Reply<()> },
    ReloadHistory { room_id: RoomId, reply: Reply<()> },
    Shutdown { reply: Reply<()> },
}

/// Runtime driving one sync session.
pub struct SyncRuntime<E, B, P>
where
    E: Environment,
    B: Backend,
    P: PushSource,
{
    env: E,
    client: Client<E>,
    backend: B,
    push: P,
    config: SyncConfig,
    commands: mpsc::Receiver<Command>,
    events_tx: mpsc::Sender<ClientEvent<E::Instant>>,
    events_rx: mpsc::Receiver<ClientEvent<E::Instant>>,
    /// Outstanding fetches, aborted on cancellation
    fetches: HashMap<RequestId, JoinHandle<()>>,
    /// Stop signals of subscription forwarders
    subscriptions: HashMap<SubscriptionId, oneshot::Sender<()>>,
    /// Callers waiting for a room creation to complete
    room_creations: HashMap<RequestId, Reply<RoomId>>,
    view: watch::Sender<Arc<SyncView>>,
    version: u64,
}

impl<E, B, P> SyncRuntime<E, B, P>
where
    E: Environment,
    B: Backend,
    P: PushSource,
{
    /// Create a runtime and the handle that talks to it.
    ///
    /// Nothing runs until [`run`](Self::run) is awaited.
    pub fn new(
        env: E,
        session: Session,
        config: SyncConfig,
        backend: B,
        push: P,
    ) -> (Self, SyncHandle) {
        let (commands_tx, commands) = mpsc::channel(config.queue_capacity);
        let (events_tx, events_rx) = mpsc::channel(config.queue_capacity);
        let (view, view_rx) = watch::channel(Arc::new(SyncView::default()));

        let client = Client::new(env.clone(), session, config.clone());
        let runtime = Self {
            env,
            client,
            backend,
            push,
            config,
            commands,
            events_tx,
            events_rx,
            fetches: HashMap::new(),
            subscriptions: HashMap::new(),
            room_creations: HashMap::new(),
            view,
            version: 0,
        };
        (runtime, SyncHandle::new(commands_tx, view_rx))
    }

    /// Create a runtime and spawn it on the current tokio runtime.
    pub fn spawn(
        env: E,
        session: Session,
        config: SyncConfig,
        backend: B,
        push: P,
    ) -> (SyncHandle, JoinHandle<()>) {
        let (runtime, handle) = Self::new(env, session, config, backend, push);
        (handle, tokio::spawn(runtime.run()))
    }

    /// Run the event loop until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        let started = self.client.handle(ClientEvent::Start);
        self.apply(started);

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let shutdown_reply = loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if let ControlFlow::Break(reply) = self.handle_command(command) {
                            break Some(reply);
                        }
                    },
                    None => break None,
                },

                Some(event) = self.events_rx.recv() => {
                    self.forget_finished_fetch(&event);
                    let result = self.client.handle(event);
                    self.apply(result);
                }

                _ = ticker.tick() => {
                    let now = self.env.now();
                    let result = self.client.handle(ClientEvent::Tick { now });
                    self.apply(result);
                }
            }
        };

        self.teardown();
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(Ok(()));
        }
    }

    /// Execute one command. Breaks with the reply of a shutdown request.
    fn handle_command(&mut self, command: Command) -> ControlFlow<Reply<()>> {
        match command {
            Command::SetActiveRoom { room_id, reply } => {
                let event = match room_id {
                    Some(room_id) => ClientEvent::OpenRoom { room_id },
                    None => ClientEvent::CloseRoom,
                };
                let result = self.intent(event).map(|_| ());
                let _ = reply.send(result);
            },
            Command::Send { draft, reply } => {
                let result = self
                    .intent(ClientEvent::SendMessage { draft })
                    .and_then(|actions| self.provisional_message(&actions));
                let _ = reply.send(result);
            },
            Command::RetrySend { provisional_id, reply } => {
                let result = self
                    .intent(ClientEvent::RetrySend { provisional_id })
                    .and_then(|actions| self.provisional_message(&actions));
                let _ = reply.send(result);
            },
            Command::DiscardFailed { provisional_id, reply } => {
                let result = self.intent(ClientEvent::DiscardFailed { provisional_id }).map(|_| ());
                let _ = reply.send(result);
            },
            Command::CreateRoom { participant_ids, kind, title, reply } => {
                let event = ClientEvent::CreateRoom { participant_ids, kind, title };
                match self.intent(event) {
                    Ok(actions) => {
                        let request = actions.iter().find_map(|action| match action {
                            ClientAction::CreateRoom { request, .. } => Some(*request),
                            _ => None,
                        });
                        if let Some(request) = request {
                            self.room_creations.insert(request, reply);
                        }
                    },
                    Err(error) => {
                        let _ = reply.send(Err(error));
                    },
                }
            },
            Command::ReloadRooms { reply } => {
                let _ = reply.send(self.intent(ClientEvent::ReloadRooms).map(|_| ()));
            },
            Command::ReloadHistory { room_id, reply } => {
                let result = self.intent(ClientEvent::ReloadHistory { room_id }).map(|_| ());
                let _ = reply.send(result);
            },
            Command::Shutdown { reply } => return ControlFlow::Break(reply),
        }
        ControlFlow::Continue(())
    }

    /// Feed a user intent and execute its actions. The actions are returned
    /// as well so the caller can pick out ids.
    fn intent(
        &mut self,
        event: ClientEvent<E::Instant>,
    ) -> Result<Vec<ClientAction>, RuntimeError> {
        let actions = self.client.handle(event).map_err(RuntimeError::from)?;
        self.execute_all(actions.clone());
        Ok(actions)
    }

    fn apply(&mut self, result: Result<Vec<ClientAction>, ClientError>) {
        match result {
            Ok(actions) => self.execute_all(actions),
            Err(error) => tracing::warn!(%error, "client rejected event"),
        }
    }

    fn execute_all(&mut self, actions: Vec<ClientAction>) {
        let mut changed = false;
        for action in actions {
            changed |= matches!(action, ClientAction::Notify(_));
            self.execute(action);
        }
        if changed {
            self.publish();
        }
    }

    fn execute(&mut self, action: ClientAction) {
        match action {
            ClientAction::FetchRooms { request } => {
                let backend = self.backend.clone();
                let events = self.events_tx.clone();
                let task = tokio::spawn(async move {
                    let result = backend.fetch_rooms().await;
                    let _ = events.send(ClientEvent::RoomsFetched { request, result }).await;
                });
                self.fetches.insert(request, task);
            },
            ClientAction::FetchMessages { request, room_id } => {
                let backend = self.backend.clone();
                let events = self.events_tx.clone();
                let task = tokio::spawn(async move {
                    let result = backend.fetch_messages(room_id.clone()).await;
                    let _ =
                        events.send(ClientEvent::HistoryFetched { request, room_id, result }).await;
                });
                self.fetches.insert(request, task);
            },
            ClientAction::CancelFetch { request } => {
                if let Some(task) = self.fetches.remove(&request) {
                    tracing::debug!(%request, "aborting fetch");
                    task.abort();
                }
            },
            ClientAction::Send {
                provisional_id,
                room_id,
                body,
                kind,
                attachment_ref,
                client_ref,
            } => {
                let backend = self.backend.clone();
                let events = self.events_tx.clone();
                let request = SendRequest {
                    room_id: room_id.clone(),
                    body,
                    kind,
                    attachment_ref,
                    client_ref,
                };
                tokio::spawn(async move {
                    let result = backend.send(request).await;
                    let _ = events
                        .send(ClientEvent::SendCompleted { provisional_id, room_id, result })
                        .await;
                });
            },
            ClientAction::CreateRoom { request, participant_ids, kind, title } => {
                let backend = self.backend.clone();
                let events = self.events_tx.clone();
                let body = CreateRoomRequest { participant_ids, kind, title };
                tokio::spawn(async move {
                    let result = backend.create_room(body).await;
                    let _ = events.send(ClientEvent::RoomCreated { request, result }).await;
                });
            },
            ClientAction::AcknowledgeRead { room_id, attempt } => {
                let backend = self.backend.clone();
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    let result = backend.acknowledge_read(room_id.clone()).await;
                    let _ = events
                        .send(ClientEvent::ReadAcknowledged { room_id, attempt, result })
                        .await;
                });
            },
            ClientAction::Subscribe { subscription, filter } => {
                let (stop, stopped) = oneshot::channel();
                let push = self.push.clone();
                let events = self.events_tx.clone();
                tokio::spawn(forward(push, subscription, filter, events, stopped));
                self.subscriptions.insert(subscription, stop);
            },
            ClientAction::Unsubscribe { subscription } => {
                if let Some(stop) = self.subscriptions.remove(&subscription) {
                    let _ = stop.send(());
                }
            },
            ClientAction::Notify(notification) => self.notify(notification),
        }
    }

    fn notify(&mut self, notification: Notification) {
        match notification {
            Notification::RoomCreated { request, room_id } => {
                if let Some(reply) = self.room_creations.remove(&request) {
                    let _ = reply.send(Ok(room_id));
                }
            },
            Notification::RoomCreateFailed { request, error } => {
                if let Some(reply) = self.room_creations.remove(&request) {
                    let _ = reply.send(Err(RuntimeError::Rejected(error)));
                }
            },
            Notification::ConnectionChanged(state) => {
                tracing::debug!(?state, "connection state changed");
            },
            Notification::FetchFailed { .. }
            | Notification::SendFailed { .. }
            | Notification::DirectoryChanged
            | Notification::TimelineChanged { .. } => {},
        }
    }

    fn forget_finished_fetch(&mut self, event: &ClientEvent<E::Instant>) {
        if let ClientEvent::RoomsFetched { request, .. }
        | ClientEvent::HistoryFetched { request, .. } = event
        {
            self.fetches.remove(request);
        }
    }

    /// The optimistic entry created by an accepted send intent.
    fn provisional_message(&self, actions: &[ClientAction]) -> Result<Message, RuntimeError> {
        let (room_id, provisional_id) = queued_send(actions)?;
        self.client
            .message(room_id, provisional_id)
            .cloned()
            .ok_or_else(|| ClientError::UnknownMessage { id: provisional_id.clone() }.into())
    }

    fn publish(&mut self) {
        self.version += 1;
        let view = SyncView::capture(&self.client, self.version);
        self.view.send_replace(Arc::new(view));
    }

    fn teardown(&mut self) {
        let result = self.client.handle(ClientEvent::Shutdown);
        self.apply(result);

        for (_, task) in self.fetches.drain() {
            task.abort();
        }
        for (_, stop) in self.subscriptions.drain() {
            let _ = stop.send(());
        }
        // Dropping the senders resolves waiting callers with `Stopped`.
        self.room_creations.clear();
        self.publish();
        tracing::info!("sync runtime stopped");
    }
}

/// Room and provisional id of the send an accepted intent queued.
fn queued_send(actions: &[ClientAction]) -> Result<(&RoomId, &MessageId), RuntimeError> {
    actions
        .iter()
        .find_map(|action| match action {
            ClientAction::Send { provisional_id, room_id, .. } => Some((room_id, provisional_id)),
            _ => None,
        })
        .ok_or(RuntimeError::SendNotQueued)
}

/// Forward one subscription's stream into the event queue until stopped.
async fn forward<P, I>(
    push: P,
    subscription: SubscriptionId,
    filter: chatsync_proto::SubscriptionFilter,
    events: mpsc::Sender<ClientEvent<I>>,
    mut stop: oneshot::Receiver<()>,
) where
    P: PushSource,
    I: Send + 'static,
{
    let subscribed = tokio::select! {
        _ = &mut stop => return,
        result = push.subscribe(filter) => result,
    };

    let (handle, mut stream) = match subscribed {
        Ok(pair) => pair,
        Err(error) => {
            tracing::debug!(%subscription, %error, "subscribe failed");
            let _ = events.send(ClientEvent::SubscriptionFailed { subscription, error }).await;
            return;
        },
    };

    if events.send(ClientEvent::SubscriptionReady { subscription }).await.is_ok() {
        loop {
            tokio::select! {
                _ = &mut stop => break,
                item = stream.next() => {
                    let (event, last) = match item {
                        Some(Ok(item)) => (ClientEvent::Push { subscription, item }, false),
                        Some(Err(error)) => {
                            (ClientEvent::SubscriptionFailed { subscription, error }, true)
                        },
                        None => {
                            let error = SubscriptionError::Closed;
                            (ClientEvent::SubscriptionFailed { subscription, error }, true)
                        },
                    };
                    if events.send(event).await.is_err() || last {
                        break;
                    }
                }
            }
        }
    }

    push.unsubscribe(handle).await;
}

#[cfg(test)]
mod tests {
    use chatsync_proto::MessageKind;

    use super::*;

    #[test]
    fn queued_send_picks_the_send_action() {
        let actions = vec![
            ClientAction::Notify(Notification::DirectoryChanged),
            ClientAction::Send {
                provisional_id: "local-1".into(),
                room_id: "r1".into(),
                body: "hello".into(),
                kind: MessageKind::Text,
                attachment_ref: None,
                client_ref: "local-1".into(),
            },
        ];
        let (room_id, provisional_id) = queued_send(&actions).unwrap();
        assert_eq!(room_id.as_str(), "r1");
        assert_eq!(provisional_id.as_str(), "local-1");
    }

    #[test]
    fn intent_without_send_action_is_an_internal_error() {
        let actions = vec![ClientAction::Notify(Notification::DirectoryChanged)];
        assert_eq!(queued_send(&actions).unwrap_err(), RuntimeError::SendNotQueued);
        assert_eq!(queued_send(&[]).unwrap_err(), RuntimeError::SendNotQueued);
    }
}
