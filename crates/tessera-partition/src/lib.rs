//! Spatial partitioning for Tessera.
//!
//! [`PartitionIndex`] answers "who owns this point", "who intersects this
//! rectangle", and "who are my neighbours" over a layout that only
//! changes at explicit [`commit()`](PartitionIndex::commit) points.
//! [`QuadTree`] produces layouts and [`Rebalancer`] moves its split
//! points so each subtree's load matches its share of ranks.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod balance;
pub mod error;
pub mod index;
pub mod interval;
pub mod quadtree;

pub use balance::{RebalanceReport, Rebalancer};
pub use error::{BalanceError, HookError, IndexError};
pub use index::{verify_tiling, CommitHook, Partition, PartitionIndex};
pub use interval::IntervalIndex;
pub use quadtree::{NodeId, QuadTree};
