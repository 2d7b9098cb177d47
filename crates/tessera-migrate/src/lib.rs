//! Moving agents and objects between partitions.
//!
//! Anything that leaves a partition travels as an [`Envelope`]: a tagged
//! [`Payload`] plus where it is going and how to reschedule it on
//! arrival. The [`Migrator`] queues envelopes during a tick and ships
//! them in one neighbour exchange at the end of it. Envelopes addressed
//! to a partition that is not a direct neighbour are relayed, one
//! neighbour per tick, towards their destination.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod envelope;
pub mod error;
pub mod migrator;

pub use envelope::{Envelope, Payload, PayloadKind, Reschedule};
pub use error::MigrateError;
pub use migrator::{ExchangeReport, Migrator};
