//! Environment abstraction for deterministic testing.
//!
//! Decouples sync logic from system resources (time, randomness). The tokio
//! runtime plugs in real clocks and OS entropy, the simulation harness plugs
//! in a virtual clock and a seeded RNG.

use std::{future::Future, ops::Sub, time::Duration};

/// Abstract environment providing time, randomness, and async primitives.
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - Methods are infallible except in exceptional circumstances (e.g., OS
///   entropy exhaustion, incorrect simulation setup)
pub trait Environment: Clone + Send + Sync + 'static {
    /// Monotonic instant type used for timeouts and backoff.
    ///
    /// Production uses `tokio::time::Instant` so paused-clock tests work,
    /// simulation uses a virtual instant.
    type Instant: Copy + Ord + Send + Sync + Sub<Output = Duration>;

    /// Current monotonic time.
    fn now(&self) -> Self::Instant;

    /// Current wall-clock time as Unix milliseconds.
    ///
    /// Only used to timestamp optimistic messages so they sort next to
    /// server-stamped ones. Never used for timeouts.
    fn wall_clock_millis(&self) -> u64;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code may call this; the state machines never sleep.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// Given the same seed a simulated environment MUST produce the same
    /// sequence.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
