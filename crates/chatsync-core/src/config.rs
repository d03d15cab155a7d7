//! Sync configuration.

use std::time::Duration;

use crate::subscription::SubscriptionConfig;

/// How long after an optimistic send a push echo without a correlation token
/// may still be matched to it by content.
pub const DEFAULT_GRACE_WINDOW: Duration = Duration::from_secs(10);

/// Time after which an unanswered send is marked failed.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(15);

/// Period of the maintenance tick driving timeouts and reconnects.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Capacity of the runtime's command and event queues.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Configuration of the sync core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Push channel timeouts and reconnect backoff
    pub subscription: SubscriptionConfig,
    /// Content-match window for uncorrelated push echoes
    pub grace_window: Duration,
    /// Send timeout
    pub send_timeout: Duration,
    /// Maintenance tick period
    pub tick_interval: Duration,
    /// Queue capacity
    pub queue_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            subscription: SubscriptionConfig::default(),
            grace_window: DEFAULT_GRACE_WINDOW,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            tick_interval: DEFAULT_TICK_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}
