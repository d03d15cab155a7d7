//! Production Environment implementation using system time and RNG.
//!
//! Monotonic time comes from `tokio::time::Instant`, so runtimes tested with a
//! paused tokio clock see the same time the tick loop sees. Randomness comes
//! from the OS via getrandom.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chatsync_core::Environment;

/// Production environment.
///
/// # Panics
///
/// Panics if the OS RNG fails. An RNG failure indicates OS-level problems
/// and the runtime cannot mint provisional ids without it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    #[allow(clippy::disallowed_methods)]
    fn wall_clock_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis() as u64)
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}
