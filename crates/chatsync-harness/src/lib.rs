//! Deterministic simulation harness for chatsync.
//!
//! In-memory implementations of the backend, the push source and the
//! environment for deterministic, reproducible testing under lossy push
//! delivery, reordered responses and dropped channels.
//!
//! # Components
//!
//! - [`SimEnv`]: virtual clock and seeded RNG
//! - [`SimServer`]: authoritative room and message store with chaos
//!   injection; [`SimBackend`] and [`SimPush`] expose it to the async
//!   runtime
//! - [`SimDriver`]: executes the Sans-IO client's actions against the server
//!   synchronously, delivering completions in seeded random order
//! - [`scenario`]: randomized chaos runs with a final convergence check
//!
//! # Invariant Testing
//!
//! The `invariants` module checks what must hold after every step of a run,
//! independent of the scenario. Use [`InvariantRegistry::standard()`] for the
//! full set.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod scenario;
pub mod sim_driver;
pub mod sim_env;
pub mod sim_server;

pub use invariants::{
    ActiveRoomHasNoUnread, ActiveRoomInDirectory, ActivityCoversNewestMessage, ClientSnapshot,
    Invariant, InvariantRegistry, InvariantResult, MessageCountCoversTimeline, NoDuplicateMessages,
    RoomSnapshot, SystemSnapshot, TimelineOrdering, Violation,
};
pub use scenario::{Scenario, ScenarioReport};
pub use sim_driver::SimDriver;
pub use sim_env::{SimEnv, SimInstant};
pub use sim_server::{ChaosConfig, SimBackend, SimPush, SimServer, SimStream};
