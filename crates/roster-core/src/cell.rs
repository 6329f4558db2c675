//! Cell presences and the cell set consumed by convergence.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Advertised capacity of a cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellCapacity {
    /// Memory available for containers, in megabytes.
    pub memory_mb: i32,
    /// Disk available for containers, in megabytes.
    pub disk_mb: i32,
    /// Maximum container count.
    pub containers: i32,
}

/// Liveness record for one worker cell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellPresence {
    /// Id of the cell.
    pub cell_id: String,
    /// Availability zone the cell runs in.
    #[serde(default)]
    pub zone: String,
    /// Advertised capacity.
    #[serde(default)]
    pub capacity: CellCapacity,
}

impl CellPresence {
    /// Creates a presence for the given cell id.
    #[must_use]
    pub fn new(cell_id: impl Into<String>) -> Self {
        Self {
            cell_id: cell_id.into(),
            ..Self::default()
        }
    }
}

/// The set of currently-present cells, keyed by cell id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellSet(HashMap<String, CellPresence>);

impl CellSet {
    /// Creates an empty cell set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a cell set from a list of presences.
    #[must_use]
    pub fn from_list(presences: impl IntoIterator<Item = CellPresence>) -> Self {
        Self(
            presences
                .into_iter()
                .map(|p| (p.cell_id.clone(), p))
                .collect(),
        )
    }

    /// Adds a presence, replacing any previous record for the same cell.
    pub fn insert(&mut self, presence: CellPresence) {
        self.0.insert(presence.cell_id.clone(), presence);
    }

    /// Returns true if the given cell is present.
    #[must_use]
    pub fn contains(&self, cell_id: &str) -> bool {
        self.0.contains_key(cell_id)
    }

    /// Returns the presence for the given cell, if any.
    #[must_use]
    pub fn get(&self, cell_id: &str) -> Option<&CellPresence> {
        self.0.get(cell_id)
    }

    /// Number of present cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no cells are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
