//! Diagnostic counters for discarded push events.

use std::collections::BTreeMap;

use chatsync_proto::DecodeError;

/// Counts push events that were dropped instead of applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeStats {
    unrecognized: BTreeMap<&'static str, u64>,
    stale: u64,
}

impl DecodeStats {
    /// Count an envelope the decoder did not recognize.
    pub fn record(&mut self, reason: &DecodeError) {
        *self.unrecognized.entry(reason.kind()).or_insert(0) += 1;
    }

    /// Count an item that arrived on a torn-down subscription.
    pub fn record_stale(&mut self) {
        self.stale += 1;
    }

    /// Unrecognized envelopes for one reason.
    pub fn unrecognized(&self, kind: &str) -> u64 {
        self.unrecognized.get(kind).copied().unwrap_or(0)
    }

    /// Unrecognized envelopes in total.
    pub fn total_unrecognized(&self) -> u64 {
        self.unrecognized.values().sum()
    }

    /// Items dropped because their subscription was stale.
    pub fn stale(&self) -> u64 {
        self.stale
    }

    /// Per-reason counters.
    pub fn by_reason(&self) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        self.unrecognized.iter().map(|(kind, count)| (*kind, *count))
    }
}
