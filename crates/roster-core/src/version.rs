//! Payload schema versions.
//!
//! Event payloads are versioned so that old subscribers keep working while
//! the wire schema evolves. The domain model exposes down-conversion to the
//! prior schema version; up-conversion never happens (new fields default).

use serde::{Deserialize, Serialize};

/// Schema version of a serialized domain payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Version {
    /// The original schema, with second-granularity deprecated fields.
    V0,
    /// Millisecond timeouts replace the deprecated second fields.
    V1,
    /// The current schema.
    V2,
}

impl Version {
    /// The newest schema version.
    pub const CURRENT: Self = Self::V2;
}
