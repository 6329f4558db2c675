//! The event taxonomy emitted on the bookkeeping streams.
//!
//! Every meaningful state change is broadcast as an [`Event`]. Four
//! families exist on the wire:
//!
//! - `desired_lrp_*` — desired-state changes
//! - `actual_lrp_*` — the coarse group view for legacy subscribers, plus
//!   the shared `actual_lrp_crashed` notification
//! - `flattened_actual_lrp_*` — the fine per-instance view
//! - `task_*` — task lifecycle changes
//!
//! Each event exposes a stable wire [`Event::kind`], a routing
//! [`Event::key`], and a JSON [`Event::encode`]. Payloads are versioned;
//! [`Event::version_down_to`] rewrites desired-LRP payloads for old
//! subscribers and passes everything else through unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actual_lrp::{ActualLrp, ActualLrpGroup, ActualLrpKey, InstanceKey};
use crate::desired_lrp::DesiredLrp;
use crate::error::{Error, Result};
use crate::task::Task;
use crate::version::Version;

/// Wire kind strings, one per event variant.
pub mod kind {
    /// A desired LRP was created.
    pub const DESIRED_LRP_CREATED: &str = "desired_lrp_created";
    /// A desired LRP was updated.
    pub const DESIRED_LRP_CHANGED: &str = "desired_lrp_changed";
    /// A desired LRP was removed.
    pub const DESIRED_LRP_REMOVED: &str = "desired_lrp_removed";

    /// A group slot gained a record.
    pub const ACTUAL_LRP_CREATED: &str = "actual_lrp_created";
    /// A group slot changed in place.
    pub const ACTUAL_LRP_CHANGED: &str = "actual_lrp_changed";
    /// A group slot lost its record.
    pub const ACTUAL_LRP_REMOVED: &str = "actual_lrp_removed";
    /// An instance crashed; emitted on both streams.
    pub const ACTUAL_LRP_CRASHED: &str = "actual_lrp_crashed";

    /// An instance record appeared.
    pub const INSTANCE_CREATED: &str = "flattened_actual_lrp_created";
    /// An instance record changed in place.
    pub const INSTANCE_CHANGED: &str = "flattened_actual_lrp_changed";
    /// An instance record disappeared.
    pub const INSTANCE_REMOVED: &str = "flattened_actual_lrp_removed";

    /// A task was created.
    pub const TASK_CREATED: &str = "task_created";
    /// A task changed state.
    pub const TASK_CHANGED: &str = "task_changed";
    /// A task was removed.
    pub const TASK_REMOVED: &str = "task_removed";
}

/// One bookkeeping event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Event {
    /// A desired LRP was created.
    #[serde(rename = "desired_lrp_created")]
    DesiredLrpCreated {
        /// The new desired LRP.
        desired_lrp: DesiredLrp,
    },
    /// A desired LRP was updated.
    #[serde(rename = "desired_lrp_changed")]
    DesiredLrpChanged {
        /// The desired LRP before the change.
        before: DesiredLrp,
        /// The desired LRP after the change.
        after: DesiredLrp,
    },
    /// A desired LRP was removed.
    #[serde(rename = "desired_lrp_removed")]
    DesiredLrpRemoved {
        /// The removed desired LRP.
        desired_lrp: DesiredLrp,
    },

    /// A group slot gained a record (group stream).
    #[serde(rename = "actual_lrp_created")]
    ActualLrpCreated {
        /// The group holding the new record.
        actual_lrp_group: ActualLrpGroup,
    },
    /// A group slot changed in place (group stream).
    #[serde(rename = "actual_lrp_changed")]
    ActualLrpChanged {
        /// The group before the change.
        before: ActualLrpGroup,
        /// The group after the change.
        after: ActualLrpGroup,
    },
    /// A group slot lost its record (group stream).
    #[serde(rename = "actual_lrp_removed")]
    ActualLrpRemoved {
        /// The group holding the removed record.
        actual_lrp_group: ActualLrpGroup,
    },
    /// An instance crashed; emitted on both actual-LRP streams.
    #[serde(rename = "actual_lrp_crashed")]
    ActualLrpCrashed {
        /// Identity of the (process, index) slot.
        key: ActualLrpKey,
        /// Placement that crashed (taken from the record before the crash).
        instance_key: InstanceKey,
        /// Crash count after the crash.
        crash_count: u32,
        /// Why the instance crashed.
        crash_reason: String,
        /// When the post-crash record entered its state.
        since: DateTime<Utc>,
    },

    /// An instance record appeared (instance stream).
    #[serde(rename = "flattened_actual_lrp_created")]
    InstanceCreated {
        /// The new record.
        actual_lrp: ActualLrp,
    },
    /// An instance record changed in place (instance stream).
    #[serde(rename = "flattened_actual_lrp_changed")]
    InstanceChanged {
        /// The record before the change.
        before: ActualLrp,
        /// The record after the change.
        after: ActualLrp,
    },
    /// An instance record disappeared (instance stream).
    #[serde(rename = "flattened_actual_lrp_removed")]
    InstanceRemoved {
        /// The removed record.
        actual_lrp: ActualLrp,
    },

    /// A task was created.
    #[serde(rename = "task_created")]
    TaskCreated {
        /// The new task.
        task: Task,
    },
    /// A task changed state.
    #[serde(rename = "task_changed")]
    TaskChanged {
        /// The task before the change.
        before: Task,
        /// The task after the change.
        after: Task,
    },
    /// A task was removed.
    #[serde(rename = "task_removed")]
    TaskRemoved {
        /// The removed task.
        task: Task,
    },
}

impl Event {
    /// Builds the crash notification for a `before → after` crash
    /// transition.
    ///
    /// The slot identity and crash bookkeeping come from the post-crash
    /// record; the instance key comes from the record that was running, so
    /// subscribers can correlate the crash with the placement they knew.
    #[must_use]
    pub fn actual_lrp_crashed(before: &ActualLrp, after: &ActualLrp) -> Self {
        Self::ActualLrpCrashed {
            key: after.key.clone(),
            instance_key: before.instance_key.clone(),
            crash_count: after.crash_count,
            crash_reason: after.crash_reason.clone(),
            since: after.since,
        }
    }

    /// Returns the stable wire kind of this event.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::DesiredLrpCreated { .. } => kind::DESIRED_LRP_CREATED,
            Self::DesiredLrpChanged { .. } => kind::DESIRED_LRP_CHANGED,
            Self::DesiredLrpRemoved { .. } => kind::DESIRED_LRP_REMOVED,
            Self::ActualLrpCreated { .. } => kind::ACTUAL_LRP_CREATED,
            Self::ActualLrpChanged { .. } => kind::ACTUAL_LRP_CHANGED,
            Self::ActualLrpRemoved { .. } => kind::ACTUAL_LRP_REMOVED,
            Self::ActualLrpCrashed { .. } => kind::ACTUAL_LRP_CRASHED,
            Self::InstanceCreated { .. } => kind::INSTANCE_CREATED,
            Self::InstanceChanged { .. } => kind::INSTANCE_CHANGED,
            Self::InstanceRemoved { .. } => kind::INSTANCE_REMOVED,
            Self::TaskCreated { .. } => kind::TASK_CREATED,
            Self::TaskChanged { .. } => kind::TASK_CHANGED,
            Self::TaskRemoved { .. } => kind::TASK_REMOVED,
        }
    }

    /// Returns the routing key of this event.
    ///
    /// Desired events key on the process guid, task events on the task
    /// guid, and actual-LRP events on the instance guid of the record they
    /// describe (the before-side for changes, so subscribers keep a stable
    /// key across a change). Events describing a group with both slots
    /// empty key on the empty string.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::DesiredLrpCreated { desired_lrp } | Self::DesiredLrpRemoved { desired_lrp } => {
                &desired_lrp.process_guid
            }
            Self::DesiredLrpChanged { before, .. } => &before.process_guid,
            Self::ActualLrpCreated { actual_lrp_group }
            | Self::ActualLrpRemoved { actual_lrp_group } => group_key(actual_lrp_group),
            Self::ActualLrpChanged { before, .. } => group_key(before),
            Self::ActualLrpCrashed { instance_key, .. } => &instance_key.instance_guid,
            Self::InstanceCreated { actual_lrp } | Self::InstanceRemoved { actual_lrp } => {
                &actual_lrp.instance_key.instance_guid
            }
            Self::InstanceChanged { before, .. } => &before.instance_key.instance_guid,
            Self::TaskCreated { task } | Self::TaskRemoved { task } => &task.task_guid,
            Self::TaskChanged { before, .. } => &before.task_guid,
        }
    }

    /// Serializes this event to its wire JSON form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization {
            message: format!("failed to encode {} event: {e}", self.kind()),
        })
    }

    /// Returns this event converted down to the given schema version.
    ///
    /// Desired-LRP payloads are rewritten (the millisecond timeout gains
    /// its deprecated second-granularity mirror at `V0`); every other event
    /// passes through unchanged.
    #[must_use]
    pub fn version_down_to(self, version: Version) -> Self {
        match self {
            Self::DesiredLrpCreated { desired_lrp } => Self::DesiredLrpCreated {
                desired_lrp: desired_lrp.version_down_to(version),
            },
            Self::DesiredLrpChanged { before, after } => Self::DesiredLrpChanged {
                before: before.version_down_to(version),
                after: after.version_down_to(version),
            },
            Self::DesiredLrpRemoved { desired_lrp } => Self::DesiredLrpRemoved {
                desired_lrp: desired_lrp.version_down_to(version),
            },
            other => other,
        }
    }
}

fn group_key(group: &ActualLrpGroup) -> &str {
    group
        .resolve()
        .map_or("", |lrp| lrp.instance_key.instance_guid.as_str())
}
