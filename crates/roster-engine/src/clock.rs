//! Injected time source.
//!
//! Convergence and expiry decisions never read the process clock directly;
//! they consume a [`Clock`] so tests can step virtual time and sweeps stay
//! reproducible.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

/// A monotonic source of wall-clock timestamps.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Simulated clock for deterministic time control in tests.
#[derive(Debug)]
pub struct SimulatedClock {
    /// Base time (start of simulation).
    base: DateTime<Utc>,
    /// Elapsed milliseconds since base.
    elapsed_ms: AtomicU64,
}

impl SimulatedClock {
    /// Creates a new simulated clock starting at the given time.
    #[must_use]
    pub fn new(base: DateTime<Utc>) -> Self {
        Self {
            base,
            elapsed_ms: AtomicU64::new(0),
        }
    }

    /// Creates a clock anchored at a deterministic epoch (Unix epoch).
    ///
    /// # Panics
    ///
    /// Never panics; the epoch is always representable.
    #[must_use]
    pub fn deterministic() -> Self {
        let base = Utc
            .timestamp_millis_opt(0)
            .single()
            .expect("valid epoch timestamp");
        Self::new(base)
    }

    /// Advances the clock by the given duration.
    #[allow(clippy::cast_possible_truncation)] // simulated durations are short
    pub fn advance(&self, duration: Duration) {
        self.elapsed_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for SimulatedClock {
    #[allow(clippy::cast_possible_wrap)] // elapsed simulated time stays small
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.elapsed_ms.load(Ordering::Relaxed);
        self.base + chrono::Duration::milliseconds(elapsed as i64)
    }
}
