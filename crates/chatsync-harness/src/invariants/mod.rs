//! Properties of client state that hold after every simulated event.
//!
//! A scenario test asserts one outcome; an invariant is checked after each
//! step of a randomized run, so it covers every interleaving the run visits.
//!
//! The driver captures the client into a [`SystemSnapshot`] after each event
//! it feeds, runs the [`InvariantRegistry`] over it and records the
//! [`Violation`]s together with the step number.
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! let snapshot = SystemSnapshot::single(ClientSnapshot::capture(0, &client));
//! if let Err(violations) = registry.check_all(&snapshot) {
//!     for violation in violations {
//!         tracing::error!(%violation);
//!     }
//! }
//! ```

mod checks;
mod snapshot;

use std::fmt;

pub use checks::{
    ActiveRoomHasNoUnread, ActiveRoomInDirectory, ActivityCoversNewestMessage,
    ActivityMonotonicity, MessageCountCoversTimeline, NoDuplicateMessages, TimelineOrdering,
};
pub use snapshot::{ClientSnapshot, RoomSnapshot, SystemSnapshot};

/// Outcome of a single check.
pub type InvariantResult = Result<(), Violation>;

/// A broken invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Which invariant failed
    pub invariant: &'static str,
    /// The offending client, room and values
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property checked against a [`SystemSnapshot`].
pub trait Invariant: Send + Sync {
    /// Stable name, used in reports.
    fn name(&self) -> &'static str;

    /// `Err` with the first offending observation, if any.
    fn check(&self, state: &SystemSnapshot) -> InvariantResult;
}

/// Ordered set of invariants run together.
#[derive(Default)]
pub struct InvariantRegistry {
    checks: Vec<Box<dyn Invariant>>,
}

impl fmt::Debug for InvariantRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.checks.iter().map(|check| check.name())).finish()
    }
}

impl InvariantRegistry {
    /// No checks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every invariant the client must keep:
    ///
    /// - [`ActiveRoomInDirectory`]
    /// - [`NoDuplicateMessages`]
    /// - [`TimelineOrdering`]
    /// - [`ActivityCoversNewestMessage`]
    /// - [`ActivityMonotonicity`]
    /// - [`ActiveRoomHasNoUnread`]
    /// - [`MessageCountCoversTimeline`]
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(ActiveRoomInDirectory);
        registry.add(NoDuplicateMessages);
        registry.add(TimelineOrdering);
        registry.add(ActivityCoversNewestMessage);
        registry.add(ActivityMonotonicity);
        registry.add(ActiveRoomHasNoUnread);
        registry.add(MessageCountCoversTimeline);
        registry
    }

    /// Append a check.
    pub fn add(&mut self, invariant: impl Invariant + 'static) {
        self.checks.push(Box::new(invariant));
    }

    /// Run every check. Collects one violation per failing invariant.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let mut violations = Vec::new();
        for check in &self.checks {
            if let Err(violation) = check.check(state) {
                violations.push(violation);
            }
        }
        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Number of checks.
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// Whether there are no checks.
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_covers_every_check() {
        let registry = InvariantRegistry::standard();
        assert_eq!(registry.len(), 7);
        assert!(InvariantRegistry::new().is_empty());
    }

    #[test]
    fn nothing_observed_nothing_violated() {
        assert_eq!(InvariantRegistry::standard().check_all(&SystemSnapshot::empty()), Ok(()));
    }

    #[test]
    fn violations_name_their_invariant() {
        let registry = InvariantRegistry::standard();
        let client = ClientSnapshot::new(1).with_active_room(Some("ghost".into()));

        let violations = registry.check_all(&SystemSnapshot::single(client)).unwrap_err();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].invariant, "active_room_in_directory");
        assert!(violations[0].to_string().contains("ghost"));
    }
}
