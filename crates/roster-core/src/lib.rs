//! # roster-core
//!
//! Domain model for the roster bookkeeping service — the authoritative
//! record of desired long-running processes (LRPs), the actual instances
//! placed on cells, and short-lived tasks.
//!
//! This crate holds pure value types only:
//!
//! - **Actual LRPs**: instance records keyed by (process, index) plus an
//!   instance key, folded into canonical [`actual_lrp::ActualLrpGroup`]
//!   views for legacy subscribers
//! - **Desired LRPs**: the scheduler-facing desired state
//! - **Tasks**: the one-shot workload lifecycle
//!   (`Pending → Running → Completed → Resolving`)
//! - **Events**: the tagged event taxonomy emitted on the group, instance,
//!   and task streams, with schema down-conversion for old subscribers
//!
//! All values are immutable snapshots with structural equality; nothing in
//! this crate performs I/O or touches a clock.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod actual_lrp;
pub mod cell;
pub mod desired_lrp;
pub mod error;
pub mod events;
pub mod task;
pub mod version;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::actual_lrp::{
        ActualLrp, ActualLrpGroup, ActualLrpKey, ActualLrpState, InstanceKey, Presence,
        resolve_group,
    };
    pub use crate::cell::{CellPresence, CellSet};
    pub use crate::desired_lrp::DesiredLrp;
    pub use crate::error::{Error, Result};
    pub use crate::events::Event;
    pub use crate::task::{AuctionRequest, Task, TaskDefinition, TaskState};
    pub use crate::version::Version;
}
