//! # roster-engine
//!
//! Event calculation and task convergence for the roster bookkeeping
//! service.
//!
//! The engine sits between the request controllers and the subscribers:
//!
//! - The [`calculator::EventCalculator`] diffs before/after snapshots of a
//!   (process, index) slot and emits ordered events on the group and
//!   instance [`hub::Hub`]s
//! - The [`convergence::TaskConverger`] periodically reconciles persisted
//!   tasks against the live cell set and the clock, producing corrective
//!   events plus auction and completion work lists
//!
//! Both are deterministic over their inputs: time comes from an injected
//! [`clock::Clock`] and persistence goes through the [`store::TaskStore`]
//! contract.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod calculator;
pub mod clock;
pub mod config;
pub mod convergence;
pub mod hub;
pub mod metrics;
pub mod store;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::calculator::EventCalculator;
    pub use crate::clock::{Clock, SimulatedClock, SystemClock};
    pub use crate::config::{ConvergenceConfig, HubConfig};
    pub use crate::convergence::{TaskConvergenceResult, TaskConverger};
    pub use crate::hub::{Hub, Subscription, SubscriptionError};
    pub use crate::metrics::{CounterSink, FacadeSink, RecordingSink};
    pub use crate::store::{CasResult, TaskRow, TaskStore, memory::InMemoryTaskStore};
}
