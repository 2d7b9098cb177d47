//! Core types for the Tessera distributed spatial simulation core.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the vocabulary shared by every other Tessera crate: strongly-typed
//! identifiers, rectangle geometry over a (possibly toroidal) global
//! field, the little-endian wire codec, schedule handles, and the
//! error types that cross crate boundaries.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod codec;
pub mod error;
pub mod geom;
pub mod handle;
pub mod id;

pub use codec::{ByteReader, ByteWriter, Wire};
pub use error::{CodecError, GeometryError};
pub use geom::{GlobalField, Rect, RectPoints};
pub use handle::ScheduleHandle;
pub use id::{Coord, EntityId, EntityIdAllocator, FieldId, LayoutVersion, PartitionId};
