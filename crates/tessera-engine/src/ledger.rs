//! Where entities live, for lookup and removal by id from any rank.
//!
//! Every entity is tracked by its origin rank, the rank that allocated
//! its id. A rank that takes an entity in reports the arrival to the
//! origin; a rank that drops one for good reports the departure. A
//! request sent to [`Target::Entity`](tessera_remote::Target::Entity)
//! reaches the origin, which forwards it to the holder within the same
//! maintenance phase.
//!
//! Reports travel in the maintenance phase of the tick they happen in,
//! so an entity in flight between ranks is still attributed to the rank
//! it left, which answers that it no longer holds it.

use indexmap::IndexMap;

use tessera_core::codec::to_bytes;
use tessera_core::{ByteReader, ByteWriter, CodecError, Coord, EntityId, FieldId, Wire};
use tessera_partition::PartitionIndex;
use tessera_remote::{RemoteEndpoint, Target};

/// Entity selector: answer with the entity's [`EntityLocation`].
pub const LOCATE: u32 = 0;

/// Entity selector: remove the entity and answer with the
/// [`EntityLocation`] it was removed from.
pub const REMOVE: u32 = 1;

/// Holder to origin: the entity now lives on the sending rank.
pub(crate) const ARRIVED: u32 = 0x100;

/// Holder to origin: the entity left the world on the sending rank.
pub(crate) const DEPARTED: u32 = 0x101;

/// What kind of entity a location describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    /// A resident agent.
    Agent,
    /// An object placed in a cell of `field`.
    Object {
        /// The field holding it.
        field: FieldId,
    },
}

/// Answer to [`LOCATE`] and [`REMOVE`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityLocation {
    /// Rank holding the entity.
    pub rank: u32,
    /// Agent position or object cell.
    pub position: Coord,
    /// Agent or object.
    pub kind: EntityKind,
}

impl Wire for EntityLocation {
    fn encode(&self, w: &mut ByteWriter) {
        w.write_u32_le(self.rank);
        self.position.encode(w);
        match self.kind {
            EntityKind::Agent => w.write_u8(0),
            EntityKind::Object { field } => {
                w.write_u8(1);
                field.encode(w);
            }
        }
    }

    fn decode(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let rank = r.read_u32_le()?;
        let position = Coord::decode(r)?;
        let kind = match r.read_u8()? {
            0 => EntityKind::Agent,
            1 => EntityKind::Object {
                field: FieldId::decode(r)?,
            },
            other => {
                return Err(CodecError::InvalidTag {
                    what: "entity kind",
                    value: u32::from(other),
                })
            }
        };
        Ok(Self {
            rank,
            position,
            kind,
        })
    }
}

/// An object this rank holds: where it was placed and the bytes that
/// placed it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ObjectRecord {
    pub field: FieldId,
    pub point: Coord,
    pub bytes: Vec<u8>,
}

impl Wire for ObjectRecord {
    fn encode(&self, w: &mut ByteWriter) {
        self.field.encode(w);
        self.point.encode(w);
        w.write_length_prefixed_bytes(&self.bytes);
    }

    fn decode(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            field: FieldId::decode(r)?,
            point: Coord::decode(r)?,
            bytes: r.read_length_prefixed_bytes()?.to_vec(),
        })
    }
}

/// One rank's entity bookkeeping.
#[derive(Debug)]
pub(crate) struct Ledger {
    rank: u32,
    /// Current holder of every live entity this rank created.
    homes: IndexMap<EntityId, u32>,
    /// Objects held here.
    objects: IndexMap<EntityId, ObjectRecord>,
    /// Reports waiting for the next maintenance phase.
    reports: Vec<(EntityId, u32)>,
}

impl Ledger {
    pub fn new(rank: u32) -> Self {
        Self {
            rank,
            homes: IndexMap::new(),
            objects: IndexMap::new(),
            reports: Vec::new(),
        }
    }

    /// `entity` is now held by this rank.
    pub fn arrived(&mut self, entity: EntityId) {
        if entity.origin() == self.rank {
            self.homes.insert(entity, self.rank);
        } else {
            self.reports.push((entity, ARRIVED));
        }
    }

    /// `entity` left the world on this rank.
    pub fn departed(&mut self, entity: EntityId) {
        if entity.origin() == self.rank {
            self.homes.shift_remove(&entity);
        } else {
            self.reports.push((entity, DEPARTED));
        }
    }

    /// Apply a report from rank `from` about an entity created here.
    pub fn apply_report(&mut self, entity: EntityId, selector: u32, from: u32) {
        match selector {
            ARRIVED => {
                self.homes.insert(entity, from);
            }
            DEPARTED if self.homes.get(&entity) == Some(&from) => {
                self.homes.shift_remove(&entity);
            }
            _ => {}
        }
    }

    /// Holder of an entity created here, as last reported.
    pub fn holder(&self, entity: EntityId) -> Option<u32> {
        self.homes.get(&entity).copied()
    }

    /// Entities created here that are still tracked.
    pub fn tracked(&self) -> usize {
        self.homes.len()
    }

    pub fn record_object(&mut self, entity: EntityId, record: ObjectRecord) {
        self.objects.insert(entity, record);
        self.arrived(entity);
    }

    pub fn object(&self, entity: EntityId) -> Option<&ObjectRecord> {
        self.objects.get(&entity)
    }

    pub fn forget_object(&mut self, entity: EntityId) -> Option<ObjectRecord> {
        let record = self.objects.shift_remove(&entity)?;
        self.departed(entity);
        Some(record)
    }

    /// Remove and return the records of objects whose cell this rank no
    /// longer owns. The new owner reports their arrival.
    pub fn displaced_objects(&mut self, index: &PartitionIndex) -> Vec<(EntityId, ObjectRecord)> {
        let gone: Vec<EntityId> = self
            .objects
            .iter()
            .filter(|(_, r)| !index.is_local(&r.point))
            .map(|(&id, _)| id)
            .collect();
        gone.into_iter()
            .filter_map(|id| self.objects.shift_remove(&id).map(|r| (id, r)))
            .collect()
    }

    /// Queue the pending reports on `endpoint`. Their answers carry
    /// nothing, so the promises are dropped.
    pub fn flush(&mut self, endpoint: &mut RemoteEndpoint) {
        for (entity, selector) in self.reports.drain(..) {
            endpoint.request(Target::Entity(entity), selector, to_bytes(&self.rank));
        }
    }
}
