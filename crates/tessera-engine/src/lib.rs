//! Tick orchestration for Tessera.
//!
//! [`DistributedWorld`] is the per-rank context object. It owns the
//! partition index and quad tree, the halo fields, the migrator, the
//! remote endpoint, the schedule and the resident agents, and drives
//! them through one collective tick at a time:
//!
//! 1. step every due agent against local and halo state,
//! 2. synchronize every field's halo,
//! 3. exchange migrating envelopes and deliver arrivals,
//! 4. run the remote maintenance phase (promises become ready),
//! 5. agree on the global next event time, then barrier,
//! 6. every `balance.interval` ticks, rebalance and commit the layout.
//!
//! Agents and placed objects can be located or removed by id from any
//! rank; see [`ledger`].

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod agent;
pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod schedule;
pub mod world;

pub use agent::{Agent, AgentContext, AgentDecoder, AgentRegistry};
pub use config::{BalanceConfig, ConfigError, LayoutConfig, WorldConfig};
pub use error::TickError;
pub use ledger::{EntityKind, EntityLocation, LOCATE, REMOVE};
pub use metrics::TickMetrics;
pub use schedule::{Due, Schedule};
pub use world::DistributedWorld;
