//! Tessera: the distributed core of a spatial agent-based simulation.
//!
//! This is the top-level facade crate that re-exports the public API from
//! all Tessera sub-crates. A field is tiled into one rectangular partition
//! per rank; each rank keeps a fresh halo of its neighbours' boundary
//! cells, steps the agents it owns, and ships agents that cross a
//! boundary to their new owner.
//!
//! # Quick start
//!
//! ```rust
//! use tessera::prelude::*;
//!
//! // Adds one to the cell it stands on every tick.
//! struct Heater;
//! impl Agent for Heater {
//!     fn type_tag(&self) -> u32 { 1 }
//!     fn step(&mut self, ctx: &mut AgentContext<'_>) -> Result<(), TickError> {
//!         let here = ctx.position().clone();
//!         ctx.modify::<u32>(FieldId(0), &here, |v| *v += 1)
//!     }
//!     fn encode(&self) -> Vec<u8> { Vec::new() }
//! }
//!
//! // Four ranks on a 40x40 torus, one thread each.
//! let totals = tessera::comm::run_local(4, |comm| {
//!     let config = WorldConfig::new(&[40, 40], &[true, true]);
//!     let mut world = DistributedWorld::new(config, comm).unwrap();
//!     world.add_field::<u32>(FieldId(0), "heat").unwrap();
//!     let here = world.index().local().rect.lo().to_vec();
//!     world.spawn(Box::new(Heater), &here, Reschedule::repeating(1.0)).unwrap();
//!     world.run(3).unwrap();
//!     *world.field::<u32>(FieldId(0)).unwrap().read(&here).unwrap()
//! });
//! assert_eq!(totals, vec![3, 3, 3, 3]);
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `tessera-core` | IDs, geometry, wire codec, schedule handles |
//! | [`comm`] | `tessera-comm` | The `Communicator` trait and the in-process cluster |
//! | [`partition`] | `tessera-partition` | Partition index, quad tree, rebalancer |
//! | [`halo`] | `tessera-halo` | Halo-synchronized grid and continuous fields |
//! | [`remote`] | `tessera-remote` | Named remote objects and promises |
//! | [`migrate`] | `tessera-migrate` | Migration envelopes and the relay migrator |
//! | [`engine`] | `tessera-engine` | World configuration, agents, the tick loop |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types: ids, rectangles, the global field and the wire codec
/// (`tessera-core`).
pub use tessera_core as types;

/// Collective communication (`tessera-comm`).
///
/// [`comm::LocalCluster`] and [`comm::run_local`] run ranks as threads of
/// one process.
pub use tessera_comm as comm;

/// The replicated layout (`tessera-partition`).
pub use tessera_partition as partition;

/// Halo fields (`tessera-halo`).
pub use tessera_halo as halo;

/// Remote requests and promises (`tessera-remote`).
pub use tessera_remote as remote;

/// Agent and object migration (`tessera-migrate`).
pub use tessera_migrate as migrate;

/// The per-rank world and its tick (`tessera-engine`).
pub use tessera_engine as engine;

/// Common imports for typical Tessera usage.
pub mod prelude {
    // Core types
    pub use tessera_core::{Coord, EntityId, FieldId, GlobalField, PartitionId, Rect, Wire};

    // Communication
    pub use tessera_comm::{Communicator, LocalCluster};

    // Fields and remote access
    pub use tessera_halo::{CellValue, ContinuousField, Fetched, HaloField, Neighbour, Zone};
    pub use tessera_remote::{Promise, RemoteObject, Target};

    // Migration
    pub use tessera_migrate::Reschedule;

    // Engine
    pub use tessera_engine::{
        Agent, AgentContext, DistributedWorld, EntityLocation, LayoutConfig, TickError,
        TickMetrics, WorldConfig,
    };
}
