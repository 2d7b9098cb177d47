//! Error types for migration.

use tessera_comm::CommError;
use tessera_core::{CodecError, EntityId, PartitionId};
use tessera_partition::IndexError;

/// Errors from queuing or exchanging envelopes.
///
/// The first three are contract violations reported synchronously at
/// the offending call; the rest are fatal for the run.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum MigrateError {
    /// The envelope names the local partition as its destination.
    #[error("envelope for {entity} is addressed to the local partition {destination}")]
    SelfAddressed {
        /// The entity being moved.
        entity: EntityId,
        /// The local partition.
        destination: PartitionId,
    },
    /// The destination does not exist in the committed layout.
    #[error("envelope for {entity} is addressed to unknown partition {destination}")]
    UnknownDestination {
        /// The entity being moved.
        entity: EntityId,
        /// The missing destination.
        destination: PartitionId,
    },
    /// An agent, or an object bound for a field, carries no target
    /// coordinate.
    #[error("envelope for {entity} needs a target coordinate")]
    MissingTarget {
        /// The entity being moved.
        entity: EntityId,
    },
    /// Relaying would take the envelope past the hop ceiling.
    #[error("envelope for {entity} exceeded {max} hops on the way to {destination}")]
    HopLimitExceeded {
        /// The entity being moved.
        entity: EntityId,
        /// Its destination.
        destination: PartitionId,
        /// The ceiling.
        max: u8,
    },
    /// The local partition has no neighbours to relay through.
    #[error("no route from {from} to {destination}")]
    NoRoute {
        /// The local partition.
        from: PartitionId,
        /// The unreachable destination.
        destination: PartitionId,
    },
    /// The exchange failed.
    #[error(transparent)]
    Comm(#[from] CommError),
    /// A received batch was malformed.
    #[error("malformed envelope batch: {0}")]
    Codec(#[from] CodecError),
    /// The index could not answer a routing query.
    #[error(transparent)]
    Index(#[from] IndexError),
}
