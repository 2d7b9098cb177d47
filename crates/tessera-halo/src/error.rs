//! Error types for halo fields.

use tessera_comm::CommError;
use tessera_core::{CodecError, Coord, FieldId};
use tessera_partition::{HookError, IndexError};
use tessera_remote::RemoteError;

/// Errors from halo field access and synchronization.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum HaloError {
    /// A write targeted a halo replica. Halo cells belong to another
    /// partition and are overwritten at every sync.
    #[error("write into halo cell {point:?}")]
    WriteIntoHalo {
        /// The offending point.
        point: Coord,
    },
    /// A write targeted a cell this rank neither owns nor replicates.
    #[error("cell {point:?} is not owned by this partition")]
    NotLocal {
        /// The offending point.
        point: Coord,
    },
    /// A local read fell outside the halo. Use `fetch` instead.
    #[error("cell {point:?} is outside the halo")]
    OutsideHalo {
        /// The offending point.
        point: Coord,
    },
    /// The point is outside a non-toroidal dimension of the field or has
    /// the wrong dimensionality.
    #[error("point {point:?} is outside the field")]
    OutsideField {
        /// The offending point.
        point: Coord,
    },
    /// Continuous cell widths must be positive and finite, one per
    /// dimension.
    #[error("cell width {width:?} does not fit a {dims}-d field")]
    BadCellWidth {
        /// Field dimensionality.
        dims: usize,
        /// The rejected widths.
        width: Vec<f64>,
    },
    /// A field with this id is already registered.
    #[error("field {id} registered twice")]
    DuplicateField {
        /// The contested id.
        id: FieldId,
    },
    /// Index lookup failed (a tiling violation is fatal).
    #[error(transparent)]
    Index(#[from] IndexError),
    /// A collective failed.
    #[error(transparent)]
    Comm(#[from] CommError),
    /// A halo buffer was malformed.
    #[error("malformed halo buffer: {0}")]
    Codec(#[from] CodecError),
    /// The remote endpoint failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl From<HaloError> for HookError {
    fn from(e: HaloError) -> Self {
        match e {
            HaloError::Comm(c) => HookError::Comm(c),
            other => HookError::Failed {
                reason: other.to_string(),
            },
        }
    }
}
