//! Collective communication for Tessera.
//!
//! The core never talks to a transport directly. Every cross-rank
//! interaction goes through the [`Communicator`] trait, whose collectives
//! are full-participation rounds: every rank named in a round must call
//! the same collective in the same order.
//!
//! [`LocalCluster`] is the in-process implementation: one thread per
//! rank, with a dedicated channel for every ordered pair of ranks.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod communicator;
pub mod error;
pub mod local;

pub use communicator::Communicator;
pub use error::CommError;
pub use local::{run_local, LocalCluster, LocalComm};
