//! Actual-LRP instance records and group resolution.
//!
//! An actual LRP is one placed instance of a desired long-running process.
//! A record is identified by its [`ActualLrpKey`] (process, index, domain)
//! plus its [`InstanceKey`] (instance guid, cell). For a given (process,
//! index) slot at most one `Ordinary`, one `Evacuating`, and one `Suspect`
//! record exist at a time; [`resolve_group`] folds that multiset into the
//! canonical two-slot [`ActualLrpGroup`] view consumed by legacy
//! subscribers.
//!
//! ## Instance-key constraints
//!
//! - A record in `Claimed`, `Running`, or `Crashed` state carries a
//!   non-empty instance key; an `Unclaimed` record carries an empty one.
//! - A record never transitions from a non-empty instance key to an empty
//!   one in a single update; that change is modeled as remove-then-create.
//! - `crash_count` never decreases while the record exists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of an LRP slot: which process, which replica index, which domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActualLrpKey {
    /// Guid of the desired LRP this instance belongs to.
    pub process_guid: String,
    /// Replica index within the process.
    pub index: i32,
    /// Freshness domain of the process.
    pub domain: String,
}

impl ActualLrpKey {
    /// Creates a new identity key.
    #[must_use]
    pub fn new(process_guid: impl Into<String>, index: i32, domain: impl Into<String>) -> Self {
        Self {
            process_guid: process_guid.into(),
            index,
            domain: domain.into(),
        }
    }
}

/// Identity of one placement attempt: which container on which cell.
///
/// The empty key (both fields blank) marks an `Unclaimed` record that has
/// no placement yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceKey {
    /// Guid of the container instance.
    pub instance_guid: String,
    /// Id of the cell hosting the instance.
    pub cell_id: String,
}

impl InstanceKey {
    /// Creates a new instance key.
    #[must_use]
    pub fn new(instance_guid: impl Into<String>, cell_id: impl Into<String>) -> Self {
        Self {
            instance_guid: instance_guid.into(),
            cell_id: cell_id.into(),
        }
    }

    /// Returns true if this key carries no placement.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instance_guid.is_empty() && self.cell_id.is_empty()
    }
}

/// A single container-to-host port mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    /// Port inside the container.
    pub container_port: u32,
    /// Port exposed on the cell.
    pub host_port: u32,
}

/// Network placement of a running instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetInfo {
    /// Routable address of the cell.
    pub address: String,
    /// Container-network address of the instance.
    pub instance_address: String,
    /// Exposed port mappings.
    #[serde(default)]
    pub ports: Vec<PortMapping>,
}

/// Optimistic-concurrency tag carried by every mutable record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModificationTag {
    /// Epoch the record was created under.
    pub epoch: String,
    /// Number of mutations within the epoch.
    pub index: u32,
}

impl ModificationTag {
    /// Creates a tag at index zero for the given epoch.
    #[must_use]
    pub fn new(epoch: impl Into<String>) -> Self {
        Self {
            epoch: epoch.into(),
            index: 0,
        }
    }

    /// Records one more mutation.
    pub fn increment(&mut self) {
        self.index += 1;
    }
}

/// Placement lifecycle state of an actual LRP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActualLrpState {
    /// Waiting for an auction to place it.
    Unclaimed,
    /// A cell has claimed it but it is not serving yet.
    Claimed,
    /// Serving on a cell.
    Running,
    /// Exited abnormally; may be restarted.
    Crashed,
}

impl ActualLrpState {
    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Unclaimed => "unclaimed",
            Self::Claimed => "claimed",
            Self::Running => "running",
            Self::Crashed => "crashed",
        }
    }

    /// Rank used when picking the group's instance slot; lower wins.
    const fn resolution_rank(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::Claimed => 1,
            Self::Unclaimed => 2,
            Self::Crashed => 3,
        }
    }
}

impl std::fmt::Display for ActualLrpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

/// How a record participates in the (process, index) slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Presence {
    /// The regular instance for the slot.
    #[default]
    Ordinary,
    /// Being migrated off a draining cell.
    Evacuating,
    /// On a cell that stopped responding but is not confirmed lost.
    Suspect,
}

impl Presence {
    /// Rank used when picking the group's instance slot; lower wins.
    const fn resolution_rank(self) -> u8 {
        match self {
            Self::Ordinary => 0,
            Self::Suspect => 1,
            // Evacuating records never compete for the instance slot.
            Self::Evacuating => 2,
        }
    }
}

/// Outcome of the most recent placement attempt for the slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlacementState {
    /// Placement proceeding normally.
    #[default]
    Normal,
    /// The auction could not find a cell for the instance.
    Unplaceable,
}

/// One actual-LRP instance record.
///
/// Records are immutable snapshots; every mutation produces a new value
/// with a bumped [`ModificationTag`]. Equality is structural across every
/// field, including `presence`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActualLrp {
    /// Identity of the (process, index) slot.
    pub key: ActualLrpKey,
    /// Identity of the placement; empty while `Unclaimed`.
    pub instance_key: InstanceKey,
    /// Network placement; meaningful once `Running`.
    pub net_info: NetInfo,
    /// Lifecycle state.
    pub state: ActualLrpState,
    /// Outcome of the most recent placement attempt.
    pub placement_state: PlacementState,
    /// Why the instance could not be placed, when `Unplaceable`.
    pub placement_error: String,
    /// Number of crashes observed for this slot.
    pub crash_count: u32,
    /// Why the instance last crashed.
    pub crash_reason: String,
    /// When the record entered its current state.
    pub since: DateTime<Utc>,
    /// Optimistic-concurrency tag.
    pub modification_tag: ModificationTag,
    /// How the record participates in the slot.
    pub presence: Presence,
}

impl ActualLrp {
    /// Creates an unclaimed record for the given slot.
    #[must_use]
    pub fn unclaimed(key: ActualLrpKey, since: DateTime<Utc>) -> Self {
        Self {
            key,
            instance_key: InstanceKey::default(),
            net_info: NetInfo::default(),
            state: ActualLrpState::Unclaimed,
            placement_state: PlacementState::default(),
            placement_error: String::new(),
            crash_count: 0,
            crash_reason: String::new(),
            since,
            modification_tag: ModificationTag::default(),
            presence: Presence::Ordinary,
        }
    }

    /// Wraps this record in a one-slot group.
    ///
    /// Evacuating records fill the evacuating slot; everything else fills
    /// the instance slot.
    #[must_use]
    pub fn to_group(&self) -> ActualLrpGroup {
        match self.presence {
            Presence::Evacuating => ActualLrpGroup {
                instance: None,
                evacuating: Some(self.clone()),
            },
            Presence::Ordinary | Presence::Suspect => ActualLrpGroup {
                instance: Some(self.clone()),
                evacuating: None,
            },
        }
    }

    /// Sort key for group resolution: presence tier, then state, then the
    /// most recent `since`, then instance guid.
    fn resolution_key(&self) -> (u8, u8, i64, &str) {
        (
            self.presence.resolution_rank(),
            self.state.resolution_rank(),
            -self.since.timestamp_nanos_opt().unwrap_or(i64::MAX),
            self.instance_key.instance_guid.as_str(),
        )
    }
}

/// Canonical two-slot view of a (process, index) slot.
///
/// Holds at most one instance record and at most one evacuating record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActualLrpGroup {
    /// The record serving (or about to serve) the slot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<ActualLrp>,
    /// The record being migrated off a draining cell.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evacuating: Option<ActualLrp>,
}

impl ActualLrpGroup {
    /// Returns true if both slots are empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.instance.is_none() && self.evacuating.is_none()
    }

    /// Returns the record that best represents the slot: the instance if
    /// present, otherwise the evacuating record.
    #[must_use]
    pub fn resolve(&self) -> Option<&ActualLrp> {
        match (&self.instance, &self.evacuating) {
            (Some(instance), _) => Some(instance),
            (None, Some(evacuating)) => Some(evacuating),
            (None, None) => None,
        }
    }
}

/// Folds a multiset of records for one (process, index) slot into the
/// canonical group view.
///
/// The evacuating slot takes the best `Evacuating`-presence record; the
/// instance slot takes the best of the rest. "Best" is decided by presence
/// tier (`Ordinary` over `Suspect`), then state (`Running` over `Claimed`
/// over `Unclaimed` over `Crashed`), then the most recent `since`, then
/// lexicographically by instance guid, so resolution is deterministic even
/// for malformed inputs with duplicate tiers.
pub fn resolve_group<'a>(records: impl IntoIterator<Item = &'a ActualLrp>) -> ActualLrpGroup {
    let mut group = ActualLrpGroup::default();

    for record in records {
        let slot = match record.presence {
            Presence::Evacuating => &mut group.evacuating,
            Presence::Ordinary | Presence::Suspect => &mut group.instance,
        };

        let replace = slot
            .as_ref()
            .is_none_or(|held| record.resolution_key() < held.resolution_key());
        if replace {
            *slot = Some(record.clone());
        }
    }

    group
}
