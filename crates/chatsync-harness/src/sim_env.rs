//! Simulated environment.
//!
//! Virtual clock that only moves when the harness advances it, and a
//! ChaCha RNG seeded per run. Clones share both, so the client, the driver
//! and the server observe one timeline. A handle may read the wall clock at
//! a fixed offset to model a client whose clock disagrees with the server.

use std::{
    future::Future,
    ops::{Add, Sub},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chatsync_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Wall-clock reading at virtual time zero (2023-11-14T22:13:20Z).
pub const EPOCH_MILLIS: u64 = 1_700_000_000_000;

/// Point on the virtual clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimInstant(Duration);

impl SimInstant {
    /// Time since the start of the simulation.
    pub fn since_start(self) -> Duration {
        self.0
    }
}

impl Sub for SimInstant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

impl Add<Duration> for SimInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs)
    }
}

struct SimState {
    elapsed_ms: AtomicU64,
    rng: Mutex<ChaCha8Rng>,
}

/// Deterministic environment for simulation.
#[derive(Clone)]
pub struct SimEnv {
    state: Arc<SimState>,
    wall_offset_ms: i64,
}

impl SimEnv {
    /// Environment at virtual time zero with an RNG seeded by `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: Arc::new(SimState {
                elapsed_ms: AtomicU64::new(0),
                rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            }),
            wall_offset_ms: 0,
        }
    }

    /// Handle on the same clock and RNG whose wall clock reads `offset_ms`
    /// away from the shared one. Monotonic time is unaffected.
    pub fn with_wall_offset(&self, offset_ms: i64) -> Self {
        Self { state: Arc::clone(&self.state), wall_offset_ms: offset_ms }
    }

    /// Move the virtual clock forward.
    pub fn advance(&self, duration: Duration) {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.state.elapsed_ms.fetch_add(millis, Ordering::SeqCst);
    }

    /// Time since the start of the simulation.
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.state.elapsed_ms.load(Ordering::SeqCst))
    }

    /// Uniform index below `len`. `len` must be non-zero.
    pub fn pick(&self, len: usize) -> usize {
        (self.random_u64() % len as u64) as usize
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl std::fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEnv")
            .field("elapsed", &self.elapsed())
            .field("wall_offset_ms", &self.wall_offset_ms)
            .finish_non_exhaustive()
    }
}

impl Environment for SimEnv {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        SimInstant(self.elapsed())
    }

    fn wall_clock_millis(&self) -> u64 {
        let shared = EPOCH_MILLIS + self.state.elapsed_ms.load(Ordering::SeqCst);
        shared.saturating_add_signed(self.wall_offset_ms)
    }

    /// Advances the virtual clock at call time and resolves immediately.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.state.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let a = SimEnv::with_seed(7);
        let b = SimEnv::with_seed(7);
        let c = SimEnv::with_seed(8);

        let first: Vec<u64> = (0..4).map(|_| a.random_u64()).collect();
        let second: Vec<u64> = (0..4).map(|_| b.random_u64()).collect();
        let other: Vec<u64> = (0..4).map(|_| c.random_u64()).collect();

        assert_eq!(first, second);
        assert_ne!(first, other);
    }

    #[test]
    fn clock_moves_only_when_advanced() {
        let env = SimEnv::default();
        let start = env.now();
        assert_eq!(env.now(), start);
        assert_eq!(env.wall_clock_millis(), EPOCH_MILLIS);

        env.advance(Duration::from_millis(1500));
        assert_eq!(env.now() - start, Duration::from_millis(1500));
        assert_eq!(env.wall_clock_millis(), EPOCH_MILLIS + 1500);
    }

    #[test]
    fn clones_share_the_clock() {
        let env = SimEnv::default();
        let clone = env.clone();
        clone.advance(Duration::from_secs(3));
        assert_eq!(env.elapsed(), Duration::from_secs(3));
    }

    #[test]
    fn wall_offset_skews_only_the_wall_clock() {
        let server = SimEnv::default();
        let ahead = server.with_wall_offset(3_600_000);
        let behind = server.with_wall_offset(-60_000);

        server.advance(Duration::from_secs(1));
        assert_eq!(ahead.now(), server.now());
        assert_eq!(ahead.wall_clock_millis(), EPOCH_MILLIS + 1_000 + 3_600_000);
        assert_eq!(behind.wall_clock_millis(), EPOCH_MILLIS + 1_000 - 60_000);
        assert_eq!(server.wall_clock_millis(), EPOCH_MILLIS + 1_000);
    }

    #[test]
    fn instant_difference_saturates() {
        let early = SimInstant(Duration::from_secs(1));
        let late = early + Duration::from_secs(2);
        assert_eq!(late - early, Duration::from_secs(2));
        assert_eq!(early - late, Duration::ZERO);
    }
}
