//! Grid fields with replicated halos.
//!
//! A [`HaloField`] stores one rank's owned rectangle plus a margin of
//! read-only replicas (the halo) taken from neighbouring partitions.
//! Agents read anywhere inside the halo without communication; writes
//! are restricted to owned cells. [`HaloField::sync`] refreshes every
//! halo cell from its owner, and the field's
//! [`CommitHook`](tessera_partition::CommitHook) implementation moves
//! owned cells to their new owners when the layout changes.
//!
//! Cells outside the halo are reached with [`HaloField::fetch`], which
//! returns a [`Promise`](tessera_remote::Promise) resolved at the next
//! remote maintenance phase.
//!
//! [`ContinuousGrid`] stores particles at real-valued positions inside
//! the cells of a halo field, with radius and nearest-neighbour queries
//! that see across partition and wrap boundaries.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod cell;
pub mod cont;
pub mod dynamic;
pub mod error;
pub mod field;
pub mod grid;
pub mod plan;

pub use cell::CellValue;
pub use cont::{ContinuousField, ContinuousGrid, Neighbour, Particle, Position};
pub use dynamic::SyncField;
pub use error::HaloError;
pub use field::{Fetched, HaloField, SyncStats, Zone, GET_CELL};
pub use grid::{DenseGrid, GridStorage};
pub use plan::{SelfCopy, SyncPlan, Transfer};
