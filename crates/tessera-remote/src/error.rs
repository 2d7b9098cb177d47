//! Error types for promises and the remote endpoint.

use tessera_comm::CommError;
use tessera_core::CodecError;

use crate::promise::PromiseId;

/// Errors from reading or fulfilling a [`Promise`](crate::Promise).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PromiseError {
    /// The promise has not been fulfilled yet. Reading it this early is
    /// a logic error: promises resolve at the maintenance phase.
    #[error("promise {id} is not ready")]
    NotReady {
        /// The unready promise.
        id: PromiseId,
    },
    /// A second fulfilment was attempted.
    #[error("promise {id} was already fulfilled")]
    AlreadyFulfilled {
        /// The promise.
        id: PromiseId,
    },
    /// The remote responder reported an error instead of a value.
    #[error("promise {id} failed remotely: {reason}")]
    Remote {
        /// The promise.
        id: PromiseId,
        /// The responder's message.
        reason: String,
    },
    /// The value could not be decoded as the requested type.
    #[error("promise value could not be decoded: {0}")]
    Decode(#[from] CodecError),
}

/// Errors from the collective maintenance phase. All are fatal.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// A collective failed.
    #[error(transparent)]
    Comm(#[from] CommError),
    /// A request or response buffer was malformed.
    #[error("malformed remote buffer: {0}")]
    Codec(#[from] CodecError),
    /// Two ranks registered the same name.
    #[error("remote name '{name}' registered by ranks {first} and {second}")]
    DuplicateName {
        /// The contested name.
        name: String,
        /// Rank that registered it first.
        first: u32,
        /// Rank that registered it again.
        second: u32,
    },
    /// A response arrived for a promise this rank is not waiting on.
    #[error("response for unknown promise {id}")]
    UnknownPromise {
        /// The unexpected id.
        id: PromiseId,
    },
    /// Fulfilling a promise failed.
    #[error(transparent)]
    Promise(#[from] PromiseError),
}
