//! Strongly-typed identifiers and the [`Coord`] type alias.

use smallvec::SmallVec;
use std::fmt;

/// Identifies a partition of the global field.
///
/// Partition ids are assigned by the layout producer and stay stable
/// across rebalancing: only the rectangle behind an id changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId(pub u32);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

impl From<u32> for PartitionId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Identifies a halo field registered with a world.
///
/// Fields are registered in the same order on every rank, so
/// `FieldId(n)` names the same field everywhere.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub u32);

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for FieldId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Counts committed partition layouts.
///
/// Incremented by every commit that applied at least one change, so
/// derived state can detect that it was built against an older layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayoutVersion(pub u64);

impl fmt::Display for LayoutVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Globally unique identity of a migratable entity.
///
/// A 64-bit composite: the creating rank in the high 32 bits and a
/// per-rank sequence number in the low 32 bits. The id is assigned once
/// and never changes when the entity moves to another rank; the current
/// owner is tracked separately by whoever holds the entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(u64);

impl EntityId {
    /// Compose an id from its origin rank and sequence number.
    pub const fn new(origin: u32, sequence: u32) -> Self {
        Self(((origin as u64) << 32) | sequence as u64)
    }

    /// Rebuild an id from its raw 64-bit representation.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw 64-bit representation.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Rank that created the entity.
    pub const fn origin(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Sequence number within the origin rank.
    pub const fn sequence(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.origin(), self.sequence())
    }
}

/// Hands out [`EntityId`]s for one rank.
#[derive(Debug)]
pub struct EntityIdAllocator {
    origin: u32,
    next: u32,
}

impl EntityIdAllocator {
    /// Create an allocator for ids originating on `origin`.
    pub fn new(origin: u32) -> Self {
        Self { origin, next: 0 }
    }

    /// Allocate the next id, or `None` once the 32-bit sequence space
    /// of this rank is exhausted.
    pub fn allocate(&mut self) -> Option<EntityId> {
        let seq = self.next;
        self.next = self.next.checked_add(1)?;
        Some(EntityId::new(self.origin, seq))
    }

    /// Number of ids handed out so far.
    pub fn allocated(&self) -> u32 {
        self.next
    }
}

/// A coordinate in the global field.
///
/// Uses `SmallVec<[i32; 4]>` to avoid heap allocation for fields up to
/// four dimensions. Higher-dimensional fields spill to the heap.
pub type Coord = SmallVec<[i32; 4]>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_packs_origin_high() {
        let id = EntityId::new(3, 17);
        assert_eq!(id.origin(), 3);
        assert_eq!(id.sequence(), 17);
        assert_eq!(id.raw(), (3u64 << 32) | 17);
        assert_eq!(EntityId::from_raw(id.raw()), id);
        assert_eq!(id.to_string(), "3:17");
    }

    #[test]
    fn ids_from_different_ranks_never_collide() {
        let mut a = EntityIdAllocator::new(0);
        let mut b = EntityIdAllocator::new(1);
        let ida = a.allocate().unwrap();
        let idb = b.allocate().unwrap();
        assert_eq!(ida.sequence(), idb.sequence());
        assert_ne!(ida, idb);
    }

    #[test]
    fn allocator_reports_exhaustion() {
        let mut a = EntityIdAllocator {
            origin: 2,
            next: u32::MAX - 1,
        };
        assert!(a.allocate().is_some());
        assert!(a.allocate().is_none());
        assert_eq!(a.allocated(), u32::MAX);
    }
}
