//! The fatal error type returned from a tick.

use tessera_comm::CommError;
use tessera_core::{CodecError, Coord, EntityId, FieldId, GeometryError};
use tessera_halo::HaloError;
use tessera_migrate::MigrateError;
use tessera_partition::{BalanceError, IndexError};
use tessera_remote::{PromiseError, RemoteError};

use crate::config::ConfigError;

/// Errors surfaced by [`DistributedWorld`](crate::DistributedWorld).
///
/// Returned from [`step()`](crate::DistributedWorld::step) they are
/// fatal: the other ranks are blocked in a collective this rank will
/// not reach, and the run must abort.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum TickError {
    /// The configuration was rejected.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// The field geometry was rejected.
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    /// Partition index failure.
    #[error(transparent)]
    Index(#[from] IndexError),
    /// Load balancer failure.
    #[error(transparent)]
    Balance(#[from] BalanceError),
    /// Halo field failure.
    #[error(transparent)]
    Halo(#[from] HaloError),
    /// Migration failure.
    #[error(transparent)]
    Migrate(#[from] MigrateError),
    /// Remote endpoint failure.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// A promise was read too early or failed.
    #[error(transparent)]
    Promise(#[from] PromiseError),
    /// A collective failed.
    #[error(transparent)]
    Comm(#[from] CommError),
    /// An agent payload could not be decoded.
    #[error("malformed agent payload: {0}")]
    Codec(#[from] CodecError),
    /// No decoder is registered for an arriving agent's type tag.
    #[error("no agent decoder registered for type tag {tag}")]
    UnknownAgentType {
        /// The unregistered tag.
        tag: u32,
    },
    /// No field with this id exists.
    #[error("unknown field {field}")]
    UnknownField {
        /// The missing field.
        field: FieldId,
    },
    /// The field exists with a different cell type.
    #[error("field {field} does not hold the requested cell type")]
    FieldTypeMismatch {
        /// The field.
        field: FieldId,
    },
    /// A local insertion named a point this rank does not own.
    #[error("point {point:?} is not owned by this rank")]
    NotLocal {
        /// The point.
        point: Coord,
    },
    /// A point lies outside a non-toroidal dimension of the field.
    #[error("point {point:?} is outside the field")]
    OutsideField {
        /// The point.
        point: Coord,
    },
    /// The rank's entity id space is exhausted.
    #[error("rank {rank} has exhausted its entity ids")]
    IdsExhausted {
        /// The rank.
        rank: u32,
    },
    /// A delivered envelope could not be placed.
    #[error("cannot deliver {entity}: {reason}")]
    Undeliverable {
        /// The entity.
        entity: EntityId,
        /// What was missing.
        reason: String,
    },
    /// An agent reported a failure from its step.
    #[error("agent {entity} failed: {reason}")]
    Agent {
        /// The agent.
        entity: EntityId,
        /// The agent's message.
        reason: String,
    },
}
