//! Application runtime for chatsync
//!
//! Generic async runtime that drives the Sans-IO [`chatsync_client::Client`]
//! against a remote store, so the same orchestration runs in production and
//! under the simulation harness.
//!
//! # Components
//!
//! - [`Backend`]: request/response calls of the remote store
//! - [`PushSource`]: push subscription channel
//! - [`SyncRuntime`]: serialized event loop owning the client
//! - [`SyncHandle`]: cloneable UI surface (queries and intents)
//! - [`SyncView`]: snapshot published after every change
//! - [`SystemEnv`]: production environment

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod handle;
mod runtime;
mod system_env;
mod view;

pub use backend::{Backend, PushSource};
pub use error::RuntimeError;
pub use handle::SyncHandle;
pub use runtime::SyncRuntime;
pub use system_env::SystemEnv;
pub use view::SyncView;
