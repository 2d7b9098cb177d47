//! Error types for the partition index and load balancer.

use tessera_comm::CommError;
use tessera_core::{CodecError, Coord, PartitionId, Rect};

use crate::quadtree::NodeId;

/// Errors from the partition index.
///
/// Every variant is an invariant violation: the layout no longer tiles
/// the field, or a query resolved to anything but exactly one owner.
/// The run must abort.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum IndexError {
    /// A point resolved to zero or to more than one partition.
    #[error("point {point:?} resolves to {} partitions {found:?}", .found.len())]
    TilingViolation {
        /// The queried point.
        point: Coord,
        /// Every partition that claimed it.
        found: Vec<PartitionId>,
    },
    /// Two partitions share at least one cell.
    #[error("partitions {a} and {b} overlap")]
    Overlap {
        /// First partition.
        a: PartitionId,
        /// Second partition.
        b: PartitionId,
    },
    /// The partitions leave cells of the field uncovered.
    #[error("layout covers {covered} of {total} cells")]
    Gap {
        /// Cells covered by the layout.
        covered: u64,
        /// Cells in the field.
        total: u64,
    },
    /// A partition rectangle reaches outside the field.
    #[error("partition {id} rectangle {rect} lies outside the field")]
    OutOfField {
        /// The offending partition.
        id: PartitionId,
        /// Its rectangle.
        rect: Rect,
    },
    /// A partition rectangle covers no cells.
    #[error("partition {id} is empty")]
    EmptyPartition {
        /// The offending partition.
        id: PartitionId,
    },
    /// An insert named an id that already exists.
    #[error("partition {id} already exists")]
    DuplicatePartition {
        /// The duplicated id.
        id: PartitionId,
    },
    /// A remove or update named an id that does not exist.
    #[error("partition {id} does not exist")]
    UnknownPartition {
        /// The missing id.
        id: PartitionId,
    },
    /// The layout gives this rank no partition.
    #[error("rank {rank} owns no partition")]
    NoLocalPartition {
        /// The rank without a partition.
        rank: u32,
    },
    /// The layout gives this rank more than one partition.
    #[error("rank {rank} owns {count} partitions")]
    MultipleLocalPartitions {
        /// The rank.
        rank: u32,
        /// How many partitions it owns.
        count: usize,
    },
    /// A point, rectangle, or margin has the wrong dimensionality.
    #[error("expected {expected} dimensions, got {got}")]
    DimensionMismatch {
        /// Field dimensionality.
        expected: usize,
        /// Dimensionality of the input.
        got: usize,
    },
    /// A commit hook failed.
    #[error("{stage}-commit hook '{hook}' failed: {source}")]
    Hook {
        /// Name of the failing hook.
        hook: String,
        /// `"pre"` or `"post"`.
        stage: &'static str,
        /// The hook's error.
        source: HookError,
    },
}

/// Errors reported by a [`CommitHook`](crate::CommitHook).
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum HookError {
    /// A collective inside the hook failed.
    #[error(transparent)]
    Comm(#[from] CommError),
    /// The hook could not rebuild its state for the new layout.
    #[error("{reason}")]
    Failed {
        /// Description of the failure.
        reason: String,
    },
}

/// Errors from building or rebalancing the quad tree.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum BalanceError {
    /// A uniform tree needs a power-of-two rank count.
    #[error("{ranks} ranks cannot fill a uniform tree; need a power of two")]
    UnsupportedRankCount {
        /// Ranks requested.
        ranks: u32,
    },
    /// The tree has a different number of leaves than the run has ranks.
    #[error("tree has {leaves} leaves for {ranks} ranks")]
    LeafCountMismatch {
        /// Leaves in the tree.
        leaves: usize,
        /// Ranks in the run.
        ranks: u32,
    },
    /// A split or origin move would leave a child narrower than the
    /// minimum extent (one AOI margin) in some dimension.
    #[error("moving {node} to {origin:?} leaves a child below the minimum extent")]
    BelowMinimumExtent {
        /// The node being split or moved.
        node: NodeId,
        /// The rejected origin.
        origin: Coord,
    },
    /// The operation needs a leaf node.
    #[error("{node} is not a leaf")]
    NotALeaf {
        /// The node.
        node: NodeId,
    },
    /// The operation needs an internal node.
    #[error("{node} is not an internal node")]
    NotInternal {
        /// The node.
        node: NodeId,
    },
    /// A node id does not exist in the tree.
    #[error("{node} does not exist")]
    UnknownNode {
        /// The node.
        node: NodeId,
    },
    /// A point has the wrong dimensionality or lies outside the tree.
    #[error("point {point:?} lies outside the tree")]
    OutsideTree {
        /// The point.
        point: Coord,
    },
    /// A rank reported a negative or non-finite weight.
    #[error("rank {rank} reported invalid weight {weight}")]
    InvalidWeight {
        /// The reporting rank.
        rank: u32,
        /// The weight.
        weight: f64,
    },
    /// A collective failed.
    #[error(transparent)]
    Comm(#[from] CommError),
    /// A published proposal could not be decoded.
    #[error("malformed proposal: {0}")]
    Codec(#[from] CodecError),
    /// Queuing the new layout in the index failed.
    #[error(transparent)]
    Index(#[from] IndexError),
}
