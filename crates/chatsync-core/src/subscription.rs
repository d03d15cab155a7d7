//! Push subscription lifecycle.
//!
//! Manages the long-lived directory subscription and the single room-scoped
//! subscription of the active room, and brings both back after the channel
//! drops. Uses the action pattern: methods take time as input and return
//! actions for the driver to execute.
//!
//! # State Machine
//!
//! ```text
//! ┌────────┐  open   ┌────────────┐  directory ack  ┌──────┐
//! │ Closed │────────>│ Connecting │────────────────>│ Open │
//! └────────┘         └────────────┘                 └──────┘
//!     ^                 │      ^                        │
//!     │ close /         │      │ backoff elapsed        │ failure /
//!     │ unauthorized    ↓      │                        │ idle timeout
//!     │            ┌──────────────┐                     │
//!     └────────────│ Reconnecting │<────────────────────┘
//!                  └──────────────┘
//! ```
//!
//! Every transition into `Open` emits [`SubscriptionAction::Resync`]: events
//! published while the channel was down are never replayed, so the directory
//! and the active room's history must be refetched to close the gap.

use std::{fmt, ops::Sub, time::Duration};

use chatsync_proto::{RoomId, SubscriptionFilter, UserId};

use crate::error::SubscriptionError;

/// Time allowed for the directory subscription to be acknowledged.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Cadence at which the push source is expected to send heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Maximum silence on an open channel before it is considered dead.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(45);

/// First reconnect delay.
pub const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_millis(500);

/// Upper bound of the reconnect delay.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Handle of one subscription instance.
///
/// Every (re)subscribe allocates a fresh id, so events still in flight from a
/// torn-down subscription can be recognized and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Connection state as observed by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No channel, not trying
    Closed,
    /// Subscriptions requested, waiting for the directory acknowledgement
    Connecting,
    /// Live
    Open,
    /// Channel failed, waiting for the backoff delay
    Reconnecting,
}

/// Actions returned by the subscription manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionAction {
    /// Open a subscription with this filter
    Subscribe {
        /// Id the driver reports readiness, events and failures under
        subscription: SubscriptionId,
        /// What to listen to
        filter: SubscriptionFilter,
    },
    /// Tear down a subscription
    Unsubscribe {
        /// Subscription to close
        subscription: SubscriptionId,
    },
    /// Refetch the directory and, if set, the active room's history
    Resync {
        /// Active room at the time the channel opened
        room: Option<RoomId>,
    },
    /// Connection state changed
    StateChanged(ConnectionState),
}

/// Subscription manager configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionConfig {
    /// Timeout for the directory subscription acknowledgement
    pub handshake_timeout: Duration,
    /// Expected heartbeat cadence of the push source
    pub heartbeat_interval: Duration,
    /// Silence after which an open channel is torn down (should be a few
    /// heartbeat intervals)
    pub idle_timeout: Duration,
    /// First reconnect delay
    pub backoff_initial: Duration,
    /// Maximum reconnect delay
    pub backoff_max: Duration,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            backoff_initial: DEFAULT_BACKOFF_INITIAL,
            backoff_max: DEFAULT_BACKOFF_MAX,
        }
    }
}

impl SubscriptionConfig {
    /// Reconnect delay before attempt number `attempt` (zero based).
    ///
    /// Doubles per attempt, capped at `backoff_max`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.backoff_initial.saturating_mul(factor).min(self.backoff_max)
    }
}

/// Subscription lifecycle state machine.
///
/// Pure: no I/O, no environment. Generic over `Instant` to support both real
/// and virtual time.
#[derive(Debug, Clone)]
pub struct SubscriptionManager<I> {
    state: ConnectionState,
    config: SubscriptionConfig,
    user_id: UserId,
    next_id: u64,
    /// Live directory subscription
    directory: Option<SubscriptionId>,
    /// Live room subscription and the room it follows
    room: Option<(RoomId, SubscriptionId)>,
    /// Room the UI has focused; survives reconnects
    desired_room: Option<RoomId>,
    /// Start of the handshake, or last event on an open channel
    last_activity: Option<I>,
    /// When the last failure happened and how long to wait after it
    retry: Option<(I, Duration)>,
    /// Consecutive failed attempts, reset when the channel opens
    attempt: u32,
    last_error: Option<SubscriptionError>,
}

impl<I> SubscriptionManager<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a manager in [`ConnectionState::Closed`].
    pub fn new(user_id: UserId, config: SubscriptionConfig) -> Self {
        Self {
            state: ConnectionState::Closed,
            config,
            user_id,
            next_id: 1,
            directory: None,
            room: None,
            desired_room: None,
            last_activity: None,
            retry: None,
            attempt: 0,
            last_error: None,
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Room whose subscription is wanted, whether or not it is live.
    #[must_use]
    pub fn desired_room(&self) -> Option<&RoomId> {
        self.desired_room.as_ref()
    }

    /// Live directory subscription, if any.
    #[must_use]
    pub fn directory_subscription(&self) -> Option<SubscriptionId> {
        self.directory
    }

    /// Live room subscription, if any.
    #[must_use]
    pub fn room_subscription(&self) -> Option<SubscriptionId> {
        self.room.as_ref().map(|(_, id)| *id)
    }

    /// Failed attempts since the channel was last open.
    #[must_use]
    pub fn reconnect_attempt(&self) -> u32 {
        self.attempt
    }

    /// Most recent channel failure.
    #[must_use]
    pub fn last_error(&self) -> Option<&SubscriptionError> {
        self.last_error.as_ref()
    }

    /// Whether `subscription` belongs to the current generation.
    #[must_use]
    pub fn is_live(&self, subscription: SubscriptionId) -> bool {
        self.directory == Some(subscription) || self.room_subscription() == Some(subscription)
    }

    /// Start the channel. No-op unless `Closed`.
    pub fn open(&mut self, now: I) -> Vec<SubscriptionAction> {
        if self.state != ConnectionState::Closed {
            return Vec::new();
        }
        self.attempt = 0;
        self.last_error = None;
        self.connect(now)
    }

    /// A subscription was acknowledged by the push source.
    ///
    /// The directory acknowledgement opens the channel; a room acknowledgement
    /// only counts as activity.
    pub fn handshake_succeeded(
        &mut self,
        subscription: SubscriptionId,
        now: I,
    ) -> Vec<SubscriptionAction> {
        if !self.is_live(subscription) {
            tracing::debug!(%subscription, "ignoring acknowledgement of stale subscription");
            return Vec::new();
        }

        self.last_activity = Some(now);
        if self.state != ConnectionState::Connecting || self.directory != Some(subscription) {
            return Vec::new();
        }

        self.state = ConnectionState::Open;
        self.attempt = 0;
        self.retry = None;
        tracing::info!("push channel open");

        vec![
            SubscriptionAction::StateChanged(ConnectionState::Open),
            SubscriptionAction::Resync { room: self.desired_room.clone() },
        ]
    }

    /// A subscription failed or its stream ended.
    ///
    /// Failures of stale subscriptions are ignored. Transient failures tear
    /// down both subscriptions and schedule a reconnect; an authorization
    /// failure closes the channel for good.
    pub fn channel_failed(
        &mut self,
        subscription: SubscriptionId,
        error: SubscriptionError,
        now: I,
    ) -> Vec<SubscriptionAction> {
        if !self.is_live(subscription) {
            tracing::debug!(%subscription, %error, "ignoring failure of stale subscription");
            return Vec::new();
        }
        self.fail(error, now)
    }

    /// Mark activity on a subscription (event or heartbeat).
    ///
    /// Returns `false` if the subscription is stale and the event must be
    /// dropped.
    pub fn record_activity(&mut self, subscription: SubscriptionId, now: I) -> bool {
        if !self.is_live(subscription) {
            return false;
        }
        self.last_activity = Some(now);
        true
    }

    /// Process periodic maintenance (timeouts and reconnect backoff).
    pub fn tick(&mut self, now: I) -> Vec<SubscriptionAction> {
        match self.state {
            ConnectionState::Connecting => {
                let elapsed = self.elapsed_since_activity(now);
                if elapsed > self.config.handshake_timeout {
                    return self.fail(SubscriptionError::HandshakeTimeout { elapsed }, now);
                }
                Vec::new()
            },
            ConnectionState::Open => {
                let elapsed = self.elapsed_since_activity(now);
                if elapsed > self.config.idle_timeout {
                    return self.fail(SubscriptionError::HeartbeatTimeout { elapsed }, now);
                }
                Vec::new()
            },
            ConnectionState::Reconnecting => match self.retry {
                Some((failed_at, delay)) if now - failed_at >= delay => self.connect(now),
                Some(_) => Vec::new(),
                None => self.connect(now),
            },
            ConnectionState::Closed => Vec::new(),
        }
    }

    /// Focus a different room (or none).
    ///
    /// While the channel is up this closes the old room subscription before
    /// opening the new one. Otherwise the choice is remembered and applied on
    /// the next connect.
    pub fn switch_room(&mut self, room: Option<RoomId>, now: I) -> Vec<SubscriptionAction> {
        if self.desired_room == room && self.room.as_ref().map(|(id, _)| id) == room.as_ref() {
            return Vec::new();
        }
        self.desired_room = room;

        if !matches!(self.state, ConnectionState::Connecting | ConnectionState::Open) {
            return Vec::new();
        }

        let mut actions = Vec::new();
        if let Some((_, subscription)) = self.room.take() {
            actions.push(SubscriptionAction::Unsubscribe { subscription });
        }
        if let Some(room_id) = self.desired_room.clone() {
            actions.push(self.subscribe_room(room_id));
        }
        // A room switch is activity from the idle timer's point of view.
        if self.state == ConnectionState::Open {
            self.last_activity = Some(now);
        }
        actions
    }

    /// Tear everything down and move to `Closed`.
    pub fn close(&mut self) -> Vec<SubscriptionAction> {
        let mut actions = self.unsubscribe_all();
        self.retry = None;
        self.attempt = 0;
        self.last_activity = None;
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Closed;
            tracing::info!("push channel closed");
            actions.push(SubscriptionAction::StateChanged(ConnectionState::Closed));
        }
        actions
    }

    fn connect(&mut self, now: I) -> Vec<SubscriptionAction> {
        self.state = ConnectionState::Connecting;
        self.retry = None;
        self.last_activity = Some(now);

        let directory = self.allocate_id();
        self.directory = Some(directory);

        let mut actions = vec![
            SubscriptionAction::StateChanged(ConnectionState::Connecting),
            SubscriptionAction::Subscribe {
                subscription: directory,
                filter: SubscriptionFilter::Directory { user_id: self.user_id.clone() },
            },
        ];
        if let Some(room_id) = self.desired_room.clone() {
            actions.push(self.subscribe_room(room_id));
        }
        tracing::debug!(attempt = self.attempt, "subscribing");
        actions
    }

    fn fail(&mut self, error: SubscriptionError, now: I) -> Vec<SubscriptionAction> {
        if !error.is_transient() {
            tracing::warn!(%error, "push channel rejected");
            self.last_error = Some(error);
            return self.close();
        }

        let delay = self.config.backoff(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        tracing::info!(%error, ?delay, attempt = self.attempt, "push channel lost, reconnecting");

        let mut actions = self.unsubscribe_all();
        self.state = ConnectionState::Reconnecting;
        self.retry = Some((now, delay));
        self.last_error = Some(error);
        actions.push(SubscriptionAction::StateChanged(ConnectionState::Reconnecting));
        actions
    }

    fn unsubscribe_all(&mut self) -> Vec<SubscriptionAction> {
        let mut actions = Vec::new();
        if let Some(subscription) = self.directory.take() {
            actions.push(SubscriptionAction::Unsubscribe { subscription });
        }
        if let Some((_, subscription)) = self.room.take() {
            actions.push(SubscriptionAction::Unsubscribe { subscription });
        }
        actions
    }

    fn subscribe_room(&mut self, room_id: RoomId) -> SubscriptionAction {
        let subscription = self.allocate_id();
        self.room = Some((room_id.clone(), subscription));
        SubscriptionAction::Subscribe { subscription, filter: SubscriptionFilter::Room { room_id } }
    }

    fn allocate_id(&mut self) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        id
    }

    fn elapsed_since_activity(&self, now: I) -> Duration {
        self.last_activity.map_or(Duration::ZERO, |last| now - last)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn manager() -> SubscriptionManager<Instant> {
        SubscriptionManager::new(UserId::from("me"), SubscriptionConfig::default())
    }

    fn subscribed(actions: &[SubscriptionAction]) -> Vec<(SubscriptionId, SubscriptionFilter)> {
        actions
            .iter()
            .filter_map(|action| match action {
                SubscriptionAction::Subscribe { subscription, filter } => {
                    Some((*subscription, filter.clone()))
                },
                _ => None,
            })
            .collect()
    }

    #[test]
    fn open_subscribes_directory_and_waits_for_ack() {
        let t0 = Instant::now();
        let mut manager = manager();

        let actions = manager.open(t0);
        assert_eq!(manager.state(), ConnectionState::Connecting);
        let subs = subscribed(&actions);
        assert_eq!(subs.len(), 1);
        assert!(matches!(subs[0].1, SubscriptionFilter::Directory { .. }));

        let actions = manager.handshake_succeeded(subs[0].0, t0);
        assert_eq!(manager.state(), ConnectionState::Open);
        assert!(actions.contains(&SubscriptionAction::Resync { room: None }));
    }

    #[test]
    fn open_twice_is_noop() {
        let t0 = Instant::now();
        let mut manager = manager();
        manager.open(t0);
        assert!(manager.open(t0).is_empty());
    }

    #[test]
    fn transient_failure_backs_off_then_resubscribes_with_fresh_ids() {
        let t0 = Instant::now();
        let mut manager = manager();
        manager.switch_room(Some(RoomId::from("r1")), t0);
        let first = subscribed(&manager.open(t0));
        assert_eq!(first.len(), 2);
        manager.handshake_succeeded(first[0].0, t0);

        let actions = manager.channel_failed(
            first[0].0,
            SubscriptionError::Transport("reset".into()),
            t0,
        );
        assert_eq!(manager.state(), ConnectionState::Reconnecting);
        let unsubscribed = actions
            .iter()
            .filter(|a| matches!(a, SubscriptionAction::Unsubscribe { .. }))
            .count();
        assert_eq!(unsubscribed, 2);
        assert!(!manager.is_live(first[0].0));

        // Still inside the initial backoff.
        assert!(manager.tick(t0 + Duration::from_millis(100)).is_empty());

        let actions = manager.tick(t0 + DEFAULT_BACKOFF_INITIAL);
        assert_eq!(manager.state(), ConnectionState::Connecting);
        let second = subscribed(&actions);
        assert_eq!(second.len(), 2);
        assert!(second.iter().all(|(id, _)| first.iter().all(|(old, _)| old != id)));

        let actions = manager.handshake_succeeded(second[0].0, t0 + DEFAULT_BACKOFF_INITIAL);
        assert!(actions.contains(&SubscriptionAction::Resync { room: Some(RoomId::from("r1")) }));
        assert_eq!(manager.reconnect_attempt(), 0);
    }

    #[test]
    fn unauthorized_closes() {
        let t0 = Instant::now();
        let mut manager = manager();
        let subs = subscribed(&manager.open(t0));

        let actions = manager.channel_failed(subs[0].0, SubscriptionError::Unauthorized, t0);
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(actions.contains(&SubscriptionAction::StateChanged(ConnectionState::Closed)));
        assert!(manager.tick(t0 + Duration::from_secs(3600)).is_empty());
    }

    #[test]
    fn handshake_timeout_triggers_reconnect() {
        let t0 = Instant::now();
        let mut manager = manager();
        manager.open(t0);

        manager.tick(t0 + DEFAULT_HANDSHAKE_TIMEOUT + Duration::from_millis(1));
        assert_eq!(manager.state(), ConnectionState::Reconnecting);
        assert!(matches!(
            manager.last_error(),
            Some(SubscriptionError::HandshakeTimeout { .. })
        ));
    }

    #[test]
    fn idle_timeout_triggers_reconnect_unless_activity() {
        let t0 = Instant::now();
        let mut manager = manager();
        let subs = subscribed(&manager.open(t0));
        manager.handshake_succeeded(subs[0].0, t0);

        let half = t0 + DEFAULT_IDLE_TIMEOUT / 2;
        assert!(manager.record_activity(subs[0].0, half));
        assert!(manager.tick(t0 + DEFAULT_IDLE_TIMEOUT + Duration::from_secs(1)).is_empty());
        assert_eq!(manager.state(), ConnectionState::Open);

        manager.tick(half + DEFAULT_IDLE_TIMEOUT + Duration::from_secs(1));
        assert_eq!(manager.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn stale_subscription_events_are_rejected() {
        let t0 = Instant::now();
        let mut manager = manager();
        let first = subscribed(&manager.open(t0));
        manager.channel_failed(first[0].0, SubscriptionError::Closed, t0);

        assert!(!manager.record_activity(first[0].0, t0));
        assert!(manager.channel_failed(first[0].0, SubscriptionError::Closed, t0).is_empty());
    }

    #[test]
    fn switch_room_closes_before_opening() {
        let t0 = Instant::now();
        let mut manager = manager();
        let subs = subscribed(&manager.open(t0));
        manager.handshake_succeeded(subs[0].0, t0);

        let actions = manager.switch_room(Some(RoomId::from("a")), t0);
        assert_eq!(actions.len(), 1);
        let room_a = manager.room_subscription().unwrap();

        let actions = manager.switch_room(Some(RoomId::from("b")), t0);
        assert_eq!(actions[0], SubscriptionAction::Unsubscribe { subscription: room_a });
        assert!(matches!(
            &actions[1],
            SubscriptionAction::Subscribe { filter: SubscriptionFilter::Room { room_id }, .. }
                if room_id.as_str() == "b"
        ));
        assert_eq!(manager.directory_subscription(), Some(subs[0].0));

        // Same room again does nothing.
        assert!(manager.switch_room(Some(RoomId::from("b")), t0).is_empty());
    }

    #[test]
    fn switch_room_while_reconnecting_is_deferred() {
        let t0 = Instant::now();
        let mut manager = manager();
        let subs = subscribed(&manager.open(t0));
        manager.channel_failed(subs[0].0, SubscriptionError::Closed, t0);

        assert!(manager.switch_room(Some(RoomId::from("r")), t0).is_empty());
        let actions = manager.tick(t0 + Duration::from_secs(60));
        assert_eq!(subscribed(&actions).len(), 2);
    }

    #[test]
    fn backoff_is_capped() {
        let config = SubscriptionConfig::default();
        assert_eq!(config.backoff(0), DEFAULT_BACKOFF_INITIAL);
        assert_eq!(config.backoff(1), DEFAULT_BACKOFF_INITIAL * 2);
        assert_eq!(config.backoff(40), DEFAULT_BACKOFF_MAX);
    }
}
