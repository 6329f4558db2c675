//! Engine configuration.
//!
//! Plain serde-deserializable structs; the surrounding service owns where
//! the values come from (flags, files, environment).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Intervals driving the task convergence sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConvergenceConfig {
    /// How long a task may sit before it is re-dispatched (auctioned again
    /// or re-submitted for completion).
    #[serde(with = "humantime_serde")]
    pub kick_interval: Duration,

    /// How long a pending task may wait for placement before it is failed.
    #[serde(with = "humantime_serde")]
    pub expire_pending_interval: Duration,

    /// How long a completed or resolving task may linger before its row is
    /// deleted.
    #[serde(with = "humantime_serde")]
    pub expire_completed_interval: Duration,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            kick_interval: Duration::from_secs(30),
            expire_pending_interval: Duration::from_secs(30 * 60),
            expire_completed_interval: Duration::from_secs(2 * 60),
        }
    }
}

/// Buffering policy for event hub subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubConfig {
    /// Events buffered per subscriber before it is dropped as too slow.
    pub buffer_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 256,
        }
    }
}
