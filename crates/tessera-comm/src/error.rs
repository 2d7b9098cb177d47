//! Communication error types.

use tessera_core::CodecError;

/// Errors from a collective round.
///
/// All of these are fatal: a rank that cannot complete a collective
/// leaves its peers unable to complete theirs. This layer never retries.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CommError {
    /// The peer's endpoint has gone away (its thread exited or panicked).
    #[error("rank {peer} disconnected")]
    Disconnected {
        /// The unreachable rank.
        peer: u32,
    },
    /// No message arrived from the peer within the configured timeout.
    #[error("timed out waiting for {phase} from rank {peer}")]
    Timeout {
        /// The silent rank.
        peer: u32,
        /// Which half of the exchange was pending.
        phase: &'static str,
    },
    /// The payload length differs from the size announced for it.
    #[error("rank {peer} announced {announced} bytes but sent {received}")]
    SizeMismatch {
        /// The sending rank.
        peer: u32,
        /// Size received in the first phase.
        announced: u64,
        /// Size of the payload actually received.
        received: u64,
    },
    /// A frame arrived out of protocol order; the ranks disagree about
    /// which collective they are in.
    #[error("protocol desync with rank {peer}: expected {expected}, got {got}")]
    Desync {
        /// The peer whose frame was unexpected.
        peer: u32,
        /// Frame kind this rank was waiting for.
        expected: &'static str,
        /// Frame kind that arrived.
        got: &'static str,
    },
    /// A peer rank does not exist.
    #[error("rank {peer} out of range for a cluster of {size}")]
    PeerOutOfRange {
        /// The offending rank.
        peer: u32,
        /// Cluster size.
        size: u32,
    },
    /// A group exchange was called by a rank outside the group.
    #[error("rank {rank} is not a member of the exchange group")]
    NotInGroup {
        /// The calling rank.
        rank: u32,
    },
    /// The number of send buffers does not match the number of peers.
    #[error("{buffers} send buffers for {peers} peers")]
    BufferCountMismatch {
        /// Number of peers named.
        peers: usize,
        /// Number of buffers supplied.
        buffers: usize,
    },
    /// A received buffer could not be decoded.
    #[error("malformed buffer: {0}")]
    Malformed(#[from] CodecError),
}
