//! Agents, their codec registry, and the context they step through.
//!
//! An [`Agent`] is stepped by the rank that owns its position. Everything
//! it may touch during a step is reached through [`AgentContext`]: the
//! fields (owned cells writable, halo cells read-only), the remote
//! endpoint, and the rank's deterministic RNG. Relocation, spawning and
//! retirement are recorded on the context and applied by the world once
//! the step returns.

use indexmap::IndexMap;
use rand_chacha::ChaCha8Rng;

use tessera_core::{CodecError, Coord, EntityId, FieldId, PartitionId, Wire};
use tessera_halo::{
    CellValue, ContinuousField, ContinuousGrid, DenseGrid, Fetched, GridStorage, HaloField, Particle,
    SyncField,
};
use tessera_migrate::{MigrateError, Reschedule};
use tessera_partition::PartitionIndex;
use tessera_remote::{Promise, RemoteEndpoint, Target};

use crate::error::TickError;

// ── Agent ──────────────────────────────────────────────────────────

/// A mobile, stepped simulation entity.
pub trait Agent: Send + 'static {
    /// Selects the decoder on a receiving rank. Must be registered with
    /// every rank's [`AgentRegistry`].
    fn type_tag(&self) -> u32;

    /// Advance the agent by one step.
    fn step(&mut self, ctx: &mut AgentContext<'_>) -> Result<(), TickError>;

    /// Encode the agent's state for migration.
    fn encode(&self) -> Vec<u8>;
}

/// Rebuilds an agent from the bytes its [`Agent::encode`] produced.
pub type AgentDecoder = fn(&[u8]) -> Result<Box<dyn Agent>, CodecError>;

/// Decoders by type tag.
#[derive(Clone, Debug, Default)]
pub struct AgentRegistry {
    decoders: IndexMap<u32, AgentDecoder>,
}

impl AgentRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `decoder` for `type_tag`, replacing any previous one.
    pub fn register(&mut self, type_tag: u32, decoder: AgentDecoder) {
        self.decoders.insert(type_tag, decoder);
    }

    /// True if `type_tag` has a decoder.
    pub fn contains(&self, type_tag: u32) -> bool {
        self.decoders.contains_key(&type_tag)
    }

    /// Decode an arriving agent.
    pub fn decode(&self, type_tag: u32, bytes: &[u8]) -> Result<Box<dyn Agent>, TickError> {
        let decoder = self
            .decoders
            .get(&type_tag)
            .ok_or(TickError::UnknownAgentType { tag: type_tag })?;
        Ok(decoder(bytes)?)
    }
}

// ── AgentContext ───────────────────────────────────────────────────

/// An agent created during a step, placed once the step returns.
pub(crate) struct Spawn {
    pub(crate) agent: Box<dyn Agent>,
    pub(crate) position: Coord,
    pub(crate) reschedule: Reschedule,
}

/// What a step asked the world to do with its agent.
#[derive(Default)]
pub(crate) struct Outcome {
    pub(crate) position: Option<Coord>,
    pub(crate) migrate_to: Option<PartitionId>,
    pub(crate) retired: bool,
    pub(crate) spawned: Vec<Spawn>,
}

/// Everything an agent can see and do while it steps.
pub struct AgentContext<'a> {
    tick: u64,
    entity: EntityId,
    position: Coord,
    index: &'a PartitionIndex,
    fields: &'a mut [Box<dyn SyncField>],
    endpoint: &'a mut RemoteEndpoint,
    rng: &'a mut ChaCha8Rng,
    outcome: Outcome,
}

impl<'a> AgentContext<'a> {
    pub(crate) fn new(
        tick: u64,
        entity: EntityId,
        position: Coord,
        index: &'a PartitionIndex,
        fields: &'a mut [Box<dyn SyncField>],
        endpoint: &'a mut RemoteEndpoint,
        rng: &'a mut ChaCha8Rng,
    ) -> Self {
        Self {
            tick,
            entity,
            position,
            index,
            fields,
            endpoint,
            rng,
            outcome: Outcome::default(),
        }
    }

    pub(crate) fn finish(self) -> Outcome {
        self.outcome
    }

    /// The tick being run.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// The stepping rank.
    pub fn rank(&self) -> u32 {
        self.index.rank()
    }

    /// The agent being stepped.
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// The agent's position (updated by [`move_to`](Self::move_to)).
    pub fn position(&self) -> &Coord {
        &self.position
    }

    /// The partition layout.
    pub fn index(&self) -> &PartitionIndex {
        self.index
    }

    /// The rank's deterministic random stream.
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut *self.rng
    }

    /// True if `point` is owned by this rank.
    pub fn is_local(&self, point: &[i32]) -> bool {
        self.index.is_local(point)
    }

    /// The partition owning `point`.
    pub fn owner_of(&self, point: &[i32]) -> Result<PartitionId, TickError> {
        Ok(self.index.owner_of_wrapped(point)?)
    }

    // ── Fields ──────────────────────────────────────────────────

    /// Read an owned or halo cell.
    pub fn read<T: CellValue>(&self, field: FieldId, point: &[i32]) -> Result<&T, TickError> {
        Ok(typed::<T>(self.fields, field)?.read(point)?)
    }

    /// Overwrite an owned cell.
    pub fn write<T: CellValue>(
        &mut self,
        field: FieldId,
        point: &[i32],
        value: T,
    ) -> Result<(), TickError> {
        Ok(typed_mut::<T>(self.fields, field)?.write(point, value)?)
    }

    /// Update an owned cell in place.
    pub fn modify<T: CellValue>(
        &mut self,
        field: FieldId,
        point: &[i32],
        f: impl FnOnce(&mut T),
    ) -> Result<(), TickError> {
        Ok(typed_mut::<T>(self.fields, field)?.modify(point, f)?)
    }

    /// Read any cell. Cells beyond the halo come back as a pending
    /// promise that is ready from the next tick.
    pub fn fetch<T: CellValue>(
        &mut self,
        field: FieldId,
        point: &[i32],
    ) -> Result<Fetched<'_, T>, TickError> {
        let f = typed::<T>(self.fields, field)?;
        Ok(f.fetch(point, self.index, self.endpoint)?)
    }

    /// A continuous field, for neighbour queries around the agent.
    pub fn continuous<T>(&self, field: FieldId) -> Result<&ContinuousField<T>, TickError>
    where
        T: Wire + Clone + Send + 'static,
    {
        stored::<Vec<Particle<T>>, ContinuousGrid<T>>(self.fields, field)
    }

    /// A continuous field, mutably. Only owned cells accept particles.
    pub fn continuous_mut<T>(
        &mut self,
        field: FieldId,
    ) -> Result<&mut ContinuousField<T>, TickError>
    where
        T: Wire + Clone + Send + 'static,
    {
        stored_mut::<Vec<Particle<T>>, ContinuousGrid<T>>(self.fields, field)
    }

    // ── Remote ──────────────────────────────────────────────────

    /// Queue a request; the promise is ready from the next tick.
    pub fn request(&mut self, target: Target, selector: u32, arg: Vec<u8>) -> Promise {
        self.endpoint.request(target, selector, arg)
    }

    // ── Lifecycle ───────────────────────────────────────────────

    /// Move the agent. A point owned by another rank migrates the agent
    /// there at the end of the tick; it steps again no earlier than the
    /// tick after it arrives.
    pub fn move_to(&mut self, point: &[i32]) -> Result<(), TickError> {
        let wrapped = self
            .index
            .field()
            .wrap(point)
            .ok_or_else(|| TickError::OutsideField {
                point: Coord::from_slice(point),
            })?;
        self.position = wrapped.clone();
        self.outcome.position = Some(wrapped);
        self.outcome.migrate_to = None;
        Ok(())
    }

    /// Migrate the agent to `partition`, arriving at `target`.
    ///
    /// Addressing the local partition or an unknown one fails here,
    /// before anything is queued.
    pub fn migrate_to(&mut self, partition: PartitionId, target: &[i32]) -> Result<(), TickError> {
        if partition == self.index.local_id() {
            return Err(MigrateError::SelfAddressed {
                entity: self.entity,
                destination: partition,
            }
            .into());
        }
        if self.index.partition(partition).is_none() {
            return Err(MigrateError::UnknownDestination {
                entity: self.entity,
                destination: partition,
            }
            .into());
        }
        let wrapped = self
            .index
            .field()
            .wrap(target)
            .ok_or_else(|| TickError::OutsideField {
                point: Coord::from_slice(target),
            })?;
        self.position = wrapped.clone();
        self.outcome.position = Some(wrapped);
        self.outcome.migrate_to = Some(partition);
        Ok(())
    }

    /// Remove the agent once this step returns.
    pub fn retire(&mut self) {
        self.outcome.retired = true;
    }

    /// Create a new agent at `position`. It is scheduled no earlier than
    /// the next tick, on whichever rank owns `position`.
    pub fn spawn(
        &mut self,
        agent: Box<dyn Agent>,
        position: &[i32],
        reschedule: Reschedule,
    ) -> Result<(), TickError> {
        let wrapped = self
            .index
            .field()
            .wrap(position)
            .ok_or_else(|| TickError::OutsideField {
                point: Coord::from_slice(position),
            })?;
        self.outcome.spawned.push(Spawn {
            agent,
            position: wrapped,
            reschedule,
        });
        Ok(())
    }
}

// ── Field lookup ───────────────────────────────────────────────────

fn find(fields: &[Box<dyn SyncField>], field: FieldId) -> Result<usize, TickError> {
    fields
        .iter()
        .position(|f| f.id() == field)
        .ok_or(TickError::UnknownField { field })
}

pub(crate) fn typed<T: CellValue>(
    fields: &[Box<dyn SyncField>],
    field: FieldId,
) -> Result<&HaloField<T>, TickError> {
    stored::<T, DenseGrid<T>>(fields, field)
}

pub(crate) fn typed_mut<T: CellValue>(
    fields: &mut [Box<dyn SyncField>],
    field: FieldId,
) -> Result<&mut HaloField<T>, TickError> {
    stored_mut::<T, DenseGrid<T>>(fields, field)
}

/// A field by id with its storage type spelled out.
pub(crate) fn stored<T, S>(
    fields: &[Box<dyn SyncField>],
    field: FieldId,
) -> Result<&HaloField<T, S>, TickError>
where
    T: CellValue,
    S: GridStorage<Cell = T> + 'static,
{
    let i = find(fields, field)?;
    fields[i]
        .as_any()
        .downcast_ref::<HaloField<T, S>>()
        .ok_or(TickError::FieldTypeMismatch { field })
}

pub(crate) fn stored_mut<T, S>(
    fields: &mut [Box<dyn SyncField>],
    field: FieldId,
) -> Result<&mut HaloField<T, S>, TickError>
where
    T: CellValue,
    S: GridStorage<Cell = T> + 'static,
{
    let i = find(fields, field)?;
    fields[i]
        .as_any_mut()
        .downcast_mut::<HaloField<T, S>>()
        .ok_or(TickError::FieldTypeMismatch { field })
}

pub(crate) fn erased_mut(
    fields: &mut [Box<dyn SyncField>],
    field: FieldId,
) -> Result<&mut dyn SyncField, TickError> {
    let i = find(fields, field)?;
    Ok(&mut *fields[i])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use tessera_core::{ByteReader, ByteWriter, GlobalField, Rect};
    use tessera_partition::Partition;

    struct Marker(u32);

    impl Agent for Marker {
        fn type_tag(&self) -> u32 {
            7
        }

        fn step(&mut self, ctx: &mut AgentContext<'_>) -> Result<(), TickError> {
            let p = ctx.position().clone();
            ctx.write(FieldId(0), &p, self.0)
        }

        fn encode(&self) -> Vec<u8> {
            let mut w = ByteWriter::new();
            w.write_u32_le(self.0);
            w.into_bytes()
        }
    }

    fn decode_marker(bytes: &[u8]) -> Result<Box<dyn Agent>, CodecError> {
        let mut r = ByteReader::new(bytes);
        let v = r.read_u32_le()?;
        r.finish()?;
        Ok(Box::new(Marker(v)))
    }

    fn two_ranks(rank: u32) -> PartitionIndex {
        let field = GlobalField::new(&[8, 4], &[true, false]).unwrap();
        let parts: Vec<_> = (0..2)
            .map(|i| Partition {
                id: PartitionId(i),
                rect: Rect::new(
                    Coord::from_slice(&[i as i32 * 4, 0]),
                    Coord::from_slice(&[i as i32 * 4 + 4, 4]),
                ),
                owner: i,
            })
            .collect();
        PartitionIndex::with_layout(field, &[1, 1], rank, parts).unwrap()
    }

    #[test]
    fn registry_decodes_known_tags_only() {
        let mut reg = AgentRegistry::new();
        reg.register(7, decode_marker);
        assert!(reg.contains(7));
        let agent = reg.decode(7, &Marker(3).encode()).unwrap();
        assert_eq!(agent.type_tag(), 7);
        assert!(matches!(
            reg.decode(8, &[]),
            Err(TickError::UnknownAgentType { tag: 8 })
        ));
        assert!(matches!(reg.decode(7, &[1]), Err(TickError::Codec(_))));
    }

    #[test]
    fn context_records_outcome_and_writes_fields() {
        let index = two_ranks(0);
        let mut fields: Vec<Box<dyn SyncField>> =
            vec![Box::new(HaloField::<u32>::new(FieldId(0), "marks", &index).unwrap())];
        let mut endpoint = RemoteEndpoint::new(0);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let entity = EntityId::new(0, 0);
        let mut ctx = AgentContext::new(
            3,
            entity,
            Coord::from_slice(&[1, 1]),
            &index,
            &mut fields,
            &mut endpoint,
            &mut rng,
        );
        Marker(9).step(&mut ctx).unwrap();
        assert_eq!(*ctx.read::<u32>(FieldId(0), &[1, 1]).unwrap(), 9);
        assert!(matches!(
            ctx.read::<f64>(FieldId(0), &[1, 1]),
            Err(TickError::FieldTypeMismatch { .. })
        ));
        assert!(matches!(
            ctx.read::<u32>(FieldId(4), &[1, 1]),
            Err(TickError::UnknownField { .. })
        ));
        // The halo is readable but not writable.
        assert!(ctx.read::<u32>(FieldId(0), &[4, 1]).is_ok());
        assert!(ctx.write(FieldId(0), &[4, 1], 1u32).is_err());

        ctx.move_to(&[-1, 2]).unwrap();
        assert_eq!(ctx.position().as_slice(), &[7, 2]);
        assert!(!ctx.is_local(&[7, 2]));
        assert!(matches!(ctx.move_to(&[0, 4]), Err(TickError::OutsideField { .. })));
        ctx.spawn(Box::new(Marker(1)), &[2, 2], Reschedule::ASAP).unwrap();
        let out = ctx.finish();
        assert_eq!(out.position.as_deref(), Some(&[7, 2][..]));
        assert_eq!(out.spawned.len(), 1);
        assert!(!out.retired);
    }

    #[test]
    fn migrate_to_self_fails_synchronously() {
        let index = two_ranks(0);
        let mut fields: Vec<Box<dyn SyncField>> = Vec::new();
        let mut endpoint = RemoteEndpoint::new(0);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut ctx = AgentContext::new(
            0,
            EntityId::new(0, 1),
            Coord::from_slice(&[0, 0]),
            &index,
            &mut fields,
            &mut endpoint,
            &mut rng,
        );
        assert!(matches!(
            ctx.migrate_to(PartitionId(0), &[1, 1]),
            Err(TickError::Migrate(MigrateError::SelfAddressed { .. }))
        ));
        assert!(matches!(
            ctx.migrate_to(PartitionId(9), &[1, 1]),
            Err(TickError::Migrate(MigrateError::UnknownDestination { .. }))
        ));
        ctx.migrate_to(PartitionId(1), &[5, 1]).unwrap();
        assert_eq!(ctx.finish().migrate_to, Some(PartitionId(1)));
    }
}
