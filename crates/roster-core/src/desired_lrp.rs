//! Desired-LRP values.
//!
//! A desired LRP is the scheduler-facing declaration of a long-running
//! process: how many instances should exist and how they are described to
//! routers. Only the fields the event streams carry live here; container
//! definitions are opaque to the bookkeeping core.

use serde::{Deserialize, Serialize};

use crate::actual_lrp::ModificationTag;
use crate::version::Version;

/// Desired state of a long-running process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredLrp {
    /// Guid identifying the process.
    pub process_guid: String,
    /// Freshness domain of the process.
    pub domain: String,
    /// Desired instance count.
    pub instances: i32,
    /// Free-form client annotation.
    #[serde(default)]
    pub annotation: String,
    /// Whether routers should advertise the process.
    #[serde(default)]
    pub routable: bool,
    /// How long an instance may take to become healthy, in milliseconds.
    #[serde(default)]
    pub start_timeout_ms: i64,
    /// Second-granularity start timeout kept for V0 subscribers.
    ///
    /// Zero on current-schema payloads; populated by [`Self::version_down_to`].
    #[serde(default, skip_serializing_if = "is_zero")]
    pub deprecated_start_timeout_s: i64,
    /// Optimistic-concurrency tag.
    #[serde(default)]
    pub modification_tag: ModificationTag,
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

impl DesiredLrp {
    /// Returns a copy of this LRP converted down to the given schema version.
    ///
    /// At `V0` the millisecond start timeout is mirrored into the deprecated
    /// second-granularity field, rounding up so short timeouts never become
    /// zero. Newer versions pass through unchanged.
    #[must_use]
    pub fn version_down_to(&self, version: Version) -> Self {
        let mut lrp = self.clone();
        if version == Version::V0 {
            let ms = self.start_timeout_ms;
            let q = ms / 1000;
            let r = ms % 1000;
            lrp.deprecated_start_timeout_s = if r > 0 { q + 1 } else { q };
        }
        lrp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desired(timeout_ms: i64) -> DesiredLrp {
        DesiredLrp {
            process_guid: "process-1".into(),
            domain: "domain-1".into(),
            instances: 3,
            annotation: String::new(),
            routable: true,
            start_timeout_ms: timeout_ms,
            deprecated_start_timeout_s: 0,
            modification_tag: ModificationTag::new("epoch-1"),
        }
    }

    #[test]
    fn down_to_v0_populates_deprecated_timeout() {
        let lrp = desired(15_000).version_down_to(Version::V0);
        assert_eq!(lrp.deprecated_start_timeout_s, 15);
    }

    #[test]
    fn down_to_v0_rounds_sub_second_timeouts_up() {
        let lrp = desired(500).version_down_to(Version::V0);
        assert_eq!(lrp.deprecated_start_timeout_s, 1);
    }

    #[test]
    fn newer_versions_pass_through() {
        let original = desired(15_000);
        assert_eq!(original.version_down_to(Version::V1), original);
        assert_eq!(original.version_down_to(Version::V2), original);
    }
}
