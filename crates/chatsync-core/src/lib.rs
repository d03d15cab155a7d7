//! Chatsync core.
//!
//! Pure, I/O-free building blocks of the chat synchronization core:
//!
//! - [`directory::RoomDirectory`]: rooms keyed by id with summary fields
//! - [`timeline::Timeline`]: one ordered, duplicate-free message list per room
//! - [`read_state::ReadStateTracker`]: unread counters and read acknowledgements
//! - [`subscription::SubscriptionManager`]: push subscription lifecycle
//!
//! None of these perform I/O. Time is passed in explicitly and side effects
//! are returned as actions for a driver to execute, so the same code runs
//! under the tokio runtime and under deterministic simulation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod directory;
pub mod env;
pub mod error;
pub mod model;
pub mod read_state;
pub mod subscription;
pub mod timeline;

pub use config::SyncConfig;
pub use directory::{RoomChange, RoomDirectory};
pub use env::Environment;
pub use error::{FetchError, SendError, SubscriptionError};
pub use model::{DeliveryState, Message, MessageDraft, Room, Session, Timestamp};
pub use read_state::{ReadAction, ReadStateTracker};
pub use subscription::{
    ConnectionState, SubscriptionAction, SubscriptionConfig, SubscriptionId, SubscriptionManager,
};
pub use timeline::{Accepted, MergeSummary, Timeline};
