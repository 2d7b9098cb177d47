//! Error types shared across the Tessera crates.
//!
//! Subsystem-specific errors live next to their subsystem; this module
//! holds the two categories every layer can produce: wire decoding
//! failures and malformed geometry.

/// Errors from decoding a wire buffer.
///
/// Every variant means the peer sent bytes this rank cannot interpret.
/// In SPMD there is no recovery from that, so callers propagate it as a
/// fatal communication failure.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The buffer ended before a value could be read.
    #[error("buffer truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes the next read required.
        needed: usize,
        /// Bytes left in the buffer.
        remaining: usize,
    },
    /// A tag or discriminant byte had no known meaning.
    #[error("invalid {what} tag {value}")]
    InvalidTag {
        /// What was being decoded.
        what: &'static str,
        /// The offending value.
        value: u32,
    },
    /// A length-prefixed string was not valid UTF-8.
    #[error("invalid UTF-8 in length-prefixed string")]
    InvalidUtf8,
    /// A buffer that should have been consumed completely had leftovers.
    #[error("{remaining} trailing bytes after decode")]
    TrailingBytes {
        /// Bytes left unread.
        remaining: usize,
    },
}

/// Errors from constructing field geometry.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GeometryError {
    /// The field has no dimensions.
    #[error("field must have at least one dimension")]
    NoDimensions,
    /// A dimension has a non-positive extent.
    #[error("dimension {dim} has non-positive size {size}")]
    EmptyDimension {
        /// Index of the offending dimension.
        dim: usize,
        /// Its configured size.
        size: i32,
    },
    /// Per-dimension arrays disagree on the number of dimensions.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Dimensionality of the field.
        expected: usize,
        /// Dimensionality of the offending input.
        got: usize,
    },
}
