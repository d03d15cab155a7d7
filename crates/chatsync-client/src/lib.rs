//! Client
//!
//! Action-based chat synchronization client. Owns the room directory, the
//! per-room timelines, the read-state tracker and the subscription manager,
//! and reconciles bulk fetches, push events and optimistic sends into them.
//!
//! # Architecture
//!
//! The client follows the same Sans-IO and action-based patterns as
//! [`chatsync_core`]. It receives events ([`ClientEvent`]), processes them
//! through pure state machine logic, and returns actions ([`ClientAction`])
//! for the caller to execute. Results of those actions come back as further
//! events, tagged with the request they answer so stale results can be
//! recognized.
//!
//! # Components
//!
//! - [`Client`]: top-level state machine
//! - [`ClientEvent`]: events fed into the client
//! - [`ClientAction`]: actions produced by the client
//! - [`Notification`]: state changes the UI layer may react to
//! - [`DecodeStats`]: counters of discarded push events

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod error;
mod event;
mod stats;

pub use chatsync_core::{ConnectionState, Environment, Session, SubscriptionId};
pub use client::Client;
pub use error::ClientError;
pub use event::{ClientAction, ClientEvent, FetchScope, Notification, RequestId};
pub use stats::DecodeStats;
