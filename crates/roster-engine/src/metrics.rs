//! Observability for the bookkeeping engine.
//!
//! Convergence reports its work through the narrow [`CounterSink`]
//! interface so the metrics transport stays swappable; the default
//! implementation forwards to the `metrics` crate facade. Hub and sweep
//! internals record directly against the facade.

use std::sync::Mutex;

use metrics::counter;

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: tasks kicked during a convergence sweep (auctioned,
    /// submitted for completion, or demoted out of resolving).
    pub const CONVERGENCE_TASKS_KICKED: &str = "ConvergenceTasksKicked";
    /// Counter: tasks pruned during a convergence sweep (rows deleted or
    /// failed by expiry).
    pub const CONVERGENCE_TASKS_PRUNED: &str = "ConvergenceTasksPruned";
    /// Counter: events emitted across all hubs.
    pub const HUB_EVENTS_EMITTED: &str = "roster_hub_events_emitted_total";
    /// Counter: subscribers dropped for overflowing their buffer.
    pub const HUB_SUBSCRIBERS_DROPPED: &str = "roster_hub_subscribers_dropped_total";
    /// Histogram: wall-clock duration of a convergence sweep in seconds.
    pub const CONVERGENCE_DURATION_SECONDS: &str = "roster_task_convergence_duration_seconds";
}

/// Destination for convergence counter deltas.
pub trait CounterSink: Send + Sync {
    /// Adds `delta` to the named counter.
    fn increment_counter_with_delta(&self, name: &str, delta: u64);
}

/// Sink forwarding deltas to the `metrics` crate facade.
///
/// Safe to use without an installed recorder; increments become no-ops.
#[derive(Debug, Clone, Copy, Default)]
pub struct FacadeSink;

impl CounterSink for FacadeSink {
    fn increment_counter_with_delta(&self, name: &str, delta: u64) {
        counter!(name.to_string()).increment(delta);
    }
}

/// Test sink recording every delta in call order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<(String, u64)>>,
}

impl RecordingSink {
    /// Creates an empty recording sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every recorded `(name, delta)` call in order.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, u64)> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Returns the sum of deltas recorded for the given counter.
    #[must_use]
    pub fn total(&self, name: &str) -> u64 {
        self.calls()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, d)| d)
            .sum()
    }
}

impl CounterSink for RecordingSink {
    fn increment_counter_with_delta(&self, name: &str, delta: u64) {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((name.to_string(), delta));
    }
}
