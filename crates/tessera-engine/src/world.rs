//! The per-rank world and its collective tick.
//!
//! [`DistributedWorld`] is the explicit context object: each rank builds
//! one from an identical [`WorldConfig`] and its own communicator, then
//! calls [`step()`](DistributedWorld::step) in lockstep with every other
//! rank. All cross-rank interaction happens inside `step()`, in a fixed
//! phase order, so the collectives line up on every rank.
//!
//! # Tick timing
//!
//! The tick counter starts at 0. An entry is due in tick `T` when its
//! time is at most `T`. Agents placed from outside a step with an
//! as-soon-as-possible time step in the current tick; anything placed
//! during tick `T` (spawns, arrivals, repeats) is due no earlier than
//! `T + 1`, so no agent steps twice in a tick.

use std::time::Instant;

use indexmap::IndexMap;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, error, info};

use tessera_comm::Communicator;
use tessera_core::codec::{from_bytes, to_bytes};
use tessera_core::{
    ByteReader, ByteWriter, Coord, EntityId, EntityIdAllocator, FieldId, GlobalField,
    PartitionId, ScheduleHandle, Wire,
};
use tessera_halo::{
    CellValue, ContinuousField, ContinuousGrid, HaloError, HaloField, Particle, SyncField,
};
use tessera_migrate::{Envelope, Migrator, PayloadKind, Reschedule};
use tessera_partition::{CommitHook, PartitionIndex, QuadTree, Rebalancer};
use tessera_remote::{Promise, RemoteEndpoint, RemoteObject, Responder, Routed, Target};

use crate::agent::{
    erased_mut, stored, stored_mut, typed, typed_mut, Agent, AgentContext, AgentDecoder,
    AgentRegistry, Spawn,
};
use crate::config::{LayoutConfig, WorldConfig};
use crate::error::TickError;
use crate::ledger::{
    EntityKind, EntityLocation, Ledger, ObjectRecord, ARRIVED, DEPARTED, LOCATE, REMOVE,
};
use crate::metrics::TickMetrics;
use crate::schedule::{Due, Schedule};

/// Type tag carried by object envelopes. Objects are decoded by the
/// receiving field, not by the agent registry.
const OBJECT_TAG: u32 = 0;

// Compile-time assertion: a world over a Send communicator is Send.
const _: () = {
    #[allow(dead_code)]
    fn assert_send<T: Send>() {}
    #[allow(dead_code)]
    fn check() {
        assert_send::<DistributedWorld<tessera_comm::LocalComm>>();
    }
};

// ── Resident ───────────────────────────────────────────────────────

struct Resident {
    agent: Box<dyn Agent>,
    position: Coord,
    handle: ScheduleHandle,
    ordering: i32,
    interval: f64,
}

/// Drop a resident agent for good.
fn remove_resident(
    agents: &mut IndexMap<EntityId, Resident>,
    ledger: &mut Ledger,
    entity: EntityId,
) -> Option<Resident> {
    let resident = agents.shift_remove(&entity)?;
    resident.handle.stop();
    ledger.departed(entity);
    Some(resident)
}

/// Take a held object out of its cell.
fn remove_object(
    fields: &mut [Box<dyn SyncField>],
    ledger: &mut Ledger,
    entity: EntityId,
) -> Result<Option<ObjectRecord>, TickError> {
    let Some(record) = ledger.object(entity) else {
        return Ok(None);
    };
    let field = erased_mut(fields, record.field)?;
    if !field.take(&record.point, &record.bytes)? {
        debug!(entity = %entity, "object was already overwritten in its cell");
    }
    Ok(ledger.forget_object(entity))
}

// ── WorldResponder ─────────────────────────────────────────────────

/// Serves remote field and entity requests from the world's state.
struct WorldResponder<'a> {
    rank: u32,
    fields: &'a mut [Box<dyn SyncField>],
    agents: &'a mut IndexMap<EntityId, Resident>,
    ledger: &'a mut Ledger,
}

impl WorldResponder<'_> {
    fn locate(&self, entity: EntityId) -> Option<EntityLocation> {
        if let Some(resident) = self.agents.get(&entity) {
            return Some(EntityLocation {
                rank: self.rank,
                position: resident.position.clone(),
                kind: EntityKind::Agent,
            });
        }
        self.ledger.object(entity).map(|record| EntityLocation {
            rank: self.rank,
            position: record.point.clone(),
            kind: EntityKind::Object {
                field: record.field,
            },
        })
    }
}

impl Responder for WorldResponder<'_> {
    fn respond_field(
        &mut self,
        field: FieldId,
        selector: u32,
        arg: &[u8],
    ) -> Result<Vec<u8>, String> {
        self.fields
            .iter()
            .find(|f| f.id() == field)
            .ok_or_else(|| format!("field {field} is not served here"))?
            .respond(selector, arg)
    }

    fn route_entity(&mut self, entity: EntityId, selector: u32, arg: &[u8]) -> Routed {
        match selector {
            ARRIVED | DEPARTED => match from_bytes::<u32>(arg) {
                Ok(from) => {
                    self.ledger.apply_report(entity, selector, from);
                    Routed::Answer(Ok(Vec::new()))
                }
                Err(e) => Routed::Answer(Err(e.to_string())),
            },
            _ => match self.ledger.holder(entity) {
                Some(rank) => Routed::Forward(rank),
                None => Routed::Answer(Err(format!(
                    "entity {entity} is not tracked by rank {}",
                    self.rank
                ))),
            },
        }
    }

    fn respond_entity(
        &mut self,
        entity: EntityId,
        selector: u32,
        _arg: &[u8],
    ) -> Result<Vec<u8>, String> {
        let location = self
            .locate(entity)
            .ok_or_else(|| format!("entity {entity} is not held by rank {}", self.rank))?;
        match selector {
            LOCATE => {}
            REMOVE => {
                if remove_resident(self.agents, self.ledger, entity).is_none() {
                    remove_object(self.fields, self.ledger, entity).map_err(|e| e.to_string())?;
                }
                debug!(rank = self.rank, entity = %entity, "entity removed on request");
            }
            other => return Err(format!("unknown entity selector {other}")),
        }
        Ok(to_bytes(&location))
    }
}

// ── DistributedWorld ───────────────────────────────────────────────

/// One rank's share of a distributed simulation.
pub struct DistributedWorld<C: Communicator> {
    config: WorldConfig,
    comm: C,
    tree: QuadTree,
    index: PartitionIndex,
    fields: Vec<Box<dyn SyncField>>,
    migrator: Migrator,
    endpoint: RemoteEndpoint,
    rebalancer: Rebalancer,
    schedule: Schedule,
    agents: IndexMap<EntityId, Resident>,
    registry: AgentRegistry,
    ids: EntityIdAllocator,
    ledger: Ledger,
    rng: ChaCha8Rng,
    tick: u64,
    metrics: TickMetrics,
}

impl<C: Communicator> DistributedWorld<C> {
    /// Build this rank's world.
    ///
    /// Validates `config` against the communicator's size, builds the
    /// replicated quad tree and partition index, and gives this rank the
    /// partition whose leaf index equals its rank. No collective runs
    /// here.
    pub fn new(config: WorldConfig, comm: C) -> Result<Self, TickError> {
        let ranks = comm.size();
        let rank = comm.rank();
        config.validate(ranks)?;

        let field = GlobalField::new(&config.field_size, &config.toroidal)?;
        let tree = match &config.layout {
            LayoutConfig::Uniform => QuadTree::uniform(field.bounds(), &config.aoi, ranks)?,
            LayoutConfig::SplitPoints(points) => {
                QuadTree::from_split_points(field.bounds(), &config.aoi, points)?
            }
        };
        let index = PartitionIndex::with_layout(field, &config.aoi, rank, tree.partitions())?;
        let migrator = Migrator::new(&index, config.max_hops);
        let seed = config.seed ^ u64::from(rank).rotate_left(32);
        info!(
            rank,
            ranks,
            local = %index.local().rect,
            neighbours = index.local_neighbours().len(),
            "world created"
        );
        Ok(Self {
            rebalancer: Rebalancer::new(config.balance.tolerance),
            config,
            comm,
            tree,
            index,
            fields: Vec::new(),
            migrator,
            endpoint: RemoteEndpoint::new(rank),
            schedule: Schedule::new(),
            agents: IndexMap::new(),
            registry: AgentRegistry::new(),
            ids: EntityIdAllocator::new(rank),
            ledger: Ledger::new(rank),
            rng: ChaCha8Rng::seed_from_u64(seed),
            tick: 0,
            metrics: TickMetrics::default(),
        })
    }

    // ── Accessors ───────────────────────────────────────────────

    /// The configuration the world was built from.
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// This rank.
    pub fn rank(&self) -> u32 {
        self.index.rank()
    }

    /// The next tick to run.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// The partition layout.
    pub fn index(&self) -> &PartitionIndex {
        &self.index
    }

    /// The replicated quad tree.
    pub fn tree(&self) -> &QuadTree {
        &self.tree
    }

    /// Metrics of the most recent tick.
    pub fn metrics(&self) -> &TickMetrics {
        &self.metrics
    }

    /// Agents resident on this rank.
    pub fn agents_len(&self) -> usize {
        self.agents.len()
    }

    /// True if `entity` is resident on this rank.
    pub fn contains_agent(&self, entity: EntityId) -> bool {
        self.agents.contains_key(&entity)
    }

    /// Position of a resident agent.
    pub fn agent_position(&self, entity: EntityId) -> Option<&Coord> {
        self.agents.get(&entity).map(|r| &r.position)
    }

    /// Ids of the resident agents, in arrival order.
    pub fn agent_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.agents.keys().copied()
    }

    /// True if an object placed under `entity` is held on this rank.
    pub fn holds_object(&self, entity: EntityId) -> bool {
        self.ledger.object(entity).is_some()
    }

    /// Entities created on this rank that are still alive somewhere.
    pub fn tracked_entities(&self) -> usize {
        self.ledger.tracked()
    }

    /// Envelopes waiting for the next migration exchange.
    pub fn pending_migrations(&self) -> usize {
        self.migrator.pending()
    }

    // ── Registration ────────────────────────────────────────────

    /// The agent decoders.
    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Register the decoder for agents tagged `type_tag`. Every rank
    /// must register the same set.
    pub fn register_agent(&mut self, type_tag: u32, decoder: AgentDecoder) {
        self.registry.register(type_tag, decoder);
    }

    /// Add a dense field. Every rank must add the same fields in the
    /// same order: halo synchronization visits them in that order.
    pub fn add_field<T: CellValue>(&mut self, id: FieldId, name: &str) -> Result<(), TickError> {
        self.add_sync_field(Box::new(HaloField::<T>::new(id, name, &self.index)?))
    }

    /// Add a field with custom storage.
    pub fn add_sync_field(&mut self, field: Box<dyn SyncField>) -> Result<(), TickError> {
        let id = field.id();
        if self.fields.iter().any(|f| f.id() == id) {
            return Err(HaloError::DuplicateField { id }.into());
        }
        debug!(rank = self.rank(), field = %id, "field added");
        self.fields.push(field);
        Ok(())
    }

    /// A dense field by id.
    pub fn field<T: CellValue>(&self, id: FieldId) -> Result<&HaloField<T>, TickError> {
        typed::<T>(&self.fields, id)
    }

    /// A dense field by id, mutably. Only owned cells are writable.
    pub fn field_mut<T: CellValue>(
        &mut self,
        id: FieldId,
    ) -> Result<&mut HaloField<T>, TickError> {
        typed_mut::<T>(&mut self.fields, id)
    }

    /// Add a continuous field whose cells are `width` units wide. Every
    /// rank must add it at the same position among its fields.
    pub fn add_continuous_field<T>(
        &mut self,
        id: FieldId,
        name: &str,
        width: &[f64],
    ) -> Result<(), TickError>
    where
        T: Wire + Clone + Send + 'static,
    {
        let field = ContinuousField::<T>::continuous(id, name, &self.index, width)?;
        self.add_sync_field(Box::new(field))
    }

    /// A continuous field by id.
    pub fn continuous_field<T>(&self, id: FieldId) -> Result<&ContinuousField<T>, TickError>
    where
        T: Wire + Clone + Send + 'static,
    {
        stored::<Vec<Particle<T>>, ContinuousGrid<T>>(&self.fields, id)
    }

    /// A continuous field by id, mutably.
    pub fn continuous_field_mut<T>(
        &mut self,
        id: FieldId,
    ) -> Result<&mut ContinuousField<T>, TickError>
    where
        T: Wire + Clone + Send + 'static,
    {
        stored_mut::<Vec<Particle<T>>, ContinuousGrid<T>>(&mut self.fields, id)
    }

    /// Register a named object that any rank can send requests to.
    pub fn register_remote(&mut self, name: &str, object: Box<dyn RemoteObject>) {
        self.endpoint.register(name, object);
    }

    /// Withdraw a named object.
    pub fn unregister_remote(&mut self, name: &str) -> Option<Box<dyn RemoteObject>> {
        self.endpoint.unregister(name)
    }

    /// Queue a request outside any agent step. The promise is ready
    /// after the next tick's maintenance phase.
    pub fn request(&mut self, target: Target, selector: u32, arg: Vec<u8>) -> Promise {
        self.endpoint.request(target, selector, arg)
    }

    // ── Entities ────────────────────────────────────────────────

    /// Place a new agent at a locally owned `position`.
    ///
    /// A negative `reschedule.time` means the current tick; earlier
    /// times are raised to it.
    pub fn spawn(
        &mut self,
        agent: Box<dyn Agent>,
        position: &[i32],
        reschedule: Reschedule,
    ) -> Result<EntityId, TickError> {
        let position = self.wrap(position)?;
        if !self.index.is_local(&position) {
            return Err(TickError::NotLocal { point: position });
        }
        let entity = self.allocate()?;
        let time = reschedule.time.max(self.tick as f64);
        self.admit(entity, agent, position, time, reschedule.ordering, reschedule.interval);
        Ok(entity)
    }

    /// Merge `value` into a locally owned cell of `field` as a new
    /// entity.
    pub fn insert_object<V: Wire>(
        &mut self,
        field: FieldId,
        point: &[i32],
        value: &V,
    ) -> Result<EntityId, TickError> {
        let point = self.wrap(point)?;
        erased_mut(&mut self.fields, field)?;
        let entity = self.allocate()?;
        self.place_object(entity, field, point, to_bytes(value))?;
        Ok(entity)
    }

    fn place_object(
        &mut self,
        entity: EntityId,
        field: FieldId,
        point: Coord,
        bytes: Vec<u8>,
    ) -> Result<(), TickError> {
        erased_mut(&mut self.fields, field)?.place(&point, &bytes)?;
        let record = ObjectRecord { field, point, bytes };
        self.ledger.record_object(entity, record);
        Ok(())
    }

    /// Merge `value` into a cell of `field` anywhere in the world.
    /// Local cells are updated at once; others are shipped to their
    /// owner and placed during the migration phase.
    pub fn send_object<V: Wire>(
        &mut self,
        field: FieldId,
        point: &[i32],
        value: &V,
    ) -> Result<EntityId, TickError> {
        let point = self.wrap(point)?;
        // Unknown fields fail here rather than on the owner.
        erased_mut(&mut self.fields, field)?;
        let entity = self.allocate()?;
        if self.index.is_local(&point) {
            self.place_object(entity, field, point, to_bytes(value))?;
            return Ok(entity);
        }
        let destination = self.index.owner_of_wrapped(&point)?;
        let envelope =
            Envelope::object(destination, entity, OBJECT_TAG, to_bytes(value), field, point);
        self.migrator.enqueue(envelope, &self.index)?;
        Ok(entity)
    }

    /// Remove a resident agent and cancel its schedule.
    pub fn remove_entity(&mut self, entity: EntityId) -> Option<Box<dyn Agent>> {
        remove_resident(&mut self.agents, &mut self.ledger, entity).map(|r| r.agent)
    }

    /// Take a held object out of its cell. Returns false if the object
    /// is not held on this rank.
    pub fn remove_object(&mut self, entity: EntityId) -> Result<bool, TickError> {
        Ok(remove_object(&mut self.fields, &mut self.ledger, entity)?.is_some())
    }

    /// Ask for an entity's current location, wherever it lives. The
    /// promise resolves to an [`EntityLocation`] after the next tick, or
    /// to an error if no rank holds the entity.
    pub fn locate(&mut self, entity: EntityId) -> Promise {
        self.endpoint.request(Target::Entity(entity), LOCATE, Vec::new())
    }

    /// Remove an entity wherever it lives. The promise resolves to the
    /// [`EntityLocation`] it was removed from.
    pub fn request_removal(&mut self, entity: EntityId) -> Promise {
        self.endpoint.request(Target::Entity(entity), REMOVE, Vec::new())
    }

    fn wrap(&self, point: &[i32]) -> Result<Coord, TickError> {
        self.index
            .field()
            .wrap(point)
            .ok_or_else(|| TickError::OutsideField {
                point: Coord::from_slice(point),
            })
    }

    fn allocate(&mut self) -> Result<EntityId, TickError> {
        self.ids
            .allocate()
            .ok_or(TickError::IdsExhausted { rank: self.index.rank() })
    }

    fn admit(
        &mut self,
        entity: EntityId,
        agent: Box<dyn Agent>,
        position: Coord,
        time: f64,
        ordering: i32,
        interval: f64,
    ) {
        let handle = self.schedule.schedule(entity, time, ordering, interval);
        let resident = Resident {
            agent,
            position,
            handle,
            ordering,
            interval,
        };
        if let Some(old) = self.agents.insert(entity, resident) {
            old.handle.stop();
        }
        self.ledger.arrived(entity);
    }

    // ── Tick ────────────────────────────────────────────────────

    /// Run `ticks` ticks, stopping at the first error.
    pub fn run(&mut self, ticks: u64) -> Result<(), TickError> {
        for _ in 0..ticks {
            self.step()?;
        }
        Ok(())
    }

    /// Run one collective tick.
    ///
    /// Any error is fatal: the other ranks are waiting in a collective
    /// this rank will not join.
    pub fn step(&mut self) -> Result<&TickMetrics, TickError> {
        match self.run_tick() {
            Ok(metrics) => {
                self.tick += 1 + metrics.ticks_skipped;
                self.metrics = metrics;
                Ok(&self.metrics)
            }
            Err(e) => {
                error!(rank = self.rank(), tick = self.tick, error = %e, "tick failed");
                Err(e)
            }
        }
    }

    fn run_tick(&mut self) -> Result<TickMetrics, TickError> {
        let tick_start = Instant::now();
        let rank = self.rank();
        let mut m = TickMetrics {
            tick: self.tick,
            ..TickMetrics::default()
        };

        // 1. Local step.
        let phase = Instant::now();
        m.agents_stepped = self.step_agents()?;
        m.step_us = phase.elapsed().as_micros() as u64;

        // 2. Halo synchronization, every field in insertion order.
        let phase = Instant::now();
        for field in &mut self.fields {
            let stats = field.sync(&self.index, &mut self.comm)?;
            m.halo_bytes_sent += stats.bytes_sent;
            m.halo_bytes_received += stats.bytes_received;
        }
        m.halo_us = phase.elapsed().as_micros() as u64;
        debug!(
            rank,
            tick = self.tick,
            sent = m.halo_bytes_sent,
            received = m.halo_bytes_received,
            "halo sync"
        );

        // 3. Migration exchange and delivery.
        let phase = Instant::now();
        let report = self.migrator.exchange(&self.index, &mut self.comm)?;
        m.envelopes_sent = report.sent;
        m.envelopes_relayed = report.relayed;
        m.envelopes_delivered = report.delivered.len();
        for envelope in report.delivered {
            self.deliver(envelope)?;
        }
        m.migrate_us = phase.elapsed().as_micros() as u64;

        // 4. Remote maintenance, with this tick's entity reports.
        let phase = Instant::now();
        self.ledger.flush(&mut self.endpoint);
        let mut responder = WorldResponder {
            rank,
            fields: &mut self.fields,
            agents: &mut self.agents,
            ledger: &mut self.ledger,
        };
        let remote = self.endpoint.maintain(&mut self.comm, &mut responder)?;
        m.requests_sent = remote.sent;
        m.requests_served = remote.served;
        m.requests_forwarded = remote.forwarded;
        m.promises_fulfilled = remote.fulfilled;
        m.remote_us = phase.elapsed().as_micros() as u64;

        // 5. Global next event time, then barrier.
        let local_next = self.schedule.next_time().unwrap_or(f64::INFINITY);
        m.global_next_time = self.comm.all_reduce_min(local_next)?;
        self.comm.barrier()?;
        if self.config.skip_idle && m.global_next_time.is_finite() {
            let next = m.global_next_time.ceil().max(0.0) as u64;
            m.ticks_skipped = next.saturating_sub(self.tick + 1);
            if m.ticks_skipped > 0 {
                debug!(rank, tick = self.tick, skipped = m.ticks_skipped, "skipping idle ticks");
            }
        }

        // 6. Periodic rebalance.
        let interval = self.config.balance.interval;
        if interval > 0 && (self.tick + 1) % interval == 0 {
            let phase = Instant::now();
            m.rebalanced = self.rebalance()?;
            m.balance_us = phase.elapsed().as_micros() as u64;
        }

        m.layout_version = self.index.version().0;
        m.agents_resident = self.agents.len();
        m.total_us = tick_start.elapsed().as_micros() as u64;
        debug!(
            rank,
            tick = self.tick,
            stepped = m.agents_stepped,
            resident = m.agents_resident,
            envelopes = m.envelopes_sent,
            "tick complete"
        );
        Ok(m)
    }

    /// Step every due agent once. Returns how many stepped.
    fn step_agents(&mut self) -> Result<usize, TickError> {
        let now = self.tick as f64;
        let rank = self.index.rank();
        let mut stepped = 0;
        for due in self.schedule.pop_due(now) {
            let Some(resident) = self.agents.get_mut(&due.entity) else {
                continue;
            };
            // A stale entry from a replaced resident.
            if !resident.handle.same_as(&due.handle) {
                continue;
            }
            let mut ctx = AgentContext::new(
                self.tick,
                due.entity,
                resident.position.clone(),
                &self.index,
                &mut self.fields,
                &mut self.endpoint,
                &mut self.rng,
            );
            resident.agent.step(&mut ctx)?;
            let outcome = ctx.finish();
            stepped += 1;

            for Spawn {
                agent,
                position,
                reschedule,
            } in outcome.spawned
            {
                self.place_spawn(agent, position, reschedule)?;
            }
            self.settle(due, outcome.position, outcome.migrate_to, outcome.retired)?;
        }
        debug!(rank, tick = self.tick, stepped, "local step");
        Ok(stepped)
    }

    /// Apply a stepped agent's outcome: retire it, ship it, repeat it
    /// or drop it.
    fn settle(
        &mut self,
        due: Due,
        position: Option<Coord>,
        migrate_to: Option<PartitionId>,
        retired: bool,
    ) -> Result<(), TickError> {
        if retired {
            self.remove_entity(due.entity);
            return Ok(());
        }
        let Some(resident) = self.agents.get_mut(&due.entity) else {
            return Ok(());
        };
        if let Some(p) = position {
            resident.position = p;
        }
        let destination = match migrate_to {
            Some(d) => Some(d),
            None if !self.index.is_local(&resident.position) => {
                Some(self.index.owner_of_wrapped(&resident.position)?)
            }
            None => None,
        };
        let next = (due.time + due.interval).max(self.tick as f64 + 1.0);

        if let Some(destination) = destination {
            let reschedule = if resident.interval > 0.0 {
                Reschedule {
                    ordering: resident.ordering,
                    time: next,
                    interval: resident.interval,
                }
            } else {
                Reschedule {
                    ordering: resident.ordering,
                    ..Reschedule::ASAP
                }
            };
            let envelope = Envelope::agent(
                destination,
                due.entity,
                resident.agent.type_tag(),
                resident.agent.encode(),
                resident.position.clone(),
                reschedule,
            );
            self.migrator.migrate_agent(&resident.handle, envelope, &self.index)?;
            self.agents.shift_remove(&due.entity);
        } else if resident.interval > 0.0 {
            self.schedule.push(Due { time: next, ..due });
        } else {
            remove_resident(&mut self.agents, &mut self.ledger, due.entity);
        }
        Ok(())
    }

    /// Place an agent created during a step: here if the position is
    /// local, otherwise shipped to its owner.
    fn place_spawn(
        &mut self,
        agent: Box<dyn Agent>,
        position: Coord,
        reschedule: Reschedule,
    ) -> Result<(), TickError> {
        let entity = self.allocate()?;
        let earliest = self.tick as f64 + 1.0;
        if self.index.is_local(&position) {
            let time = reschedule.time.max(earliest);
            self.admit(entity, agent, position, time, reschedule.ordering, reschedule.interval);
            return Ok(());
        }
        let destination = self.index.owner_of_wrapped(&position)?;
        let envelope = Envelope::agent(
            destination,
            entity,
            agent.type_tag(),
            agent.encode(),
            position,
            reschedule,
        );
        self.migrator.enqueue(envelope, &self.index)?;
        Ok(())
    }

    /// Hand an arrived envelope to its field or schedule its agent.
    fn deliver(&mut self, mut envelope: Envelope) -> Result<(), TickError> {
        let entity = envelope.entity();
        let Some(target) = envelope.target.clone() else {
            return Err(TickError::Undeliverable {
                entity,
                reason: "no target coordinate".to_string(),
            });
        };
        // The layout changed while the envelope was in flight.
        if !self.index.is_local(&target) {
            envelope.destination = self.index.owner_of_wrapped(&target)?;
            debug!(entity = %entity, destination = %envelope.destination, "forwarding stale envelope");
            self.migrator.enqueue(envelope, &self.index)?;
            return Ok(());
        }
        match envelope.payload.kind {
            PayloadKind::Object => {
                let field = envelope.field.ok_or_else(|| TickError::Undeliverable {
                    entity,
                    reason: "object has no target field".to_string(),
                })?;
                let point = self.wrap(&target)?;
                self.place_object(entity, field, point, envelope.payload.bytes)?;
            }
            PayloadKind::OneShotAgent | PayloadKind::RepeatingAgent => {
                let agent = self
                    .registry
                    .decode(envelope.payload.type_tag, &envelope.payload.bytes)?;
                let r = envelope.reschedule;
                let time = r.time.max(self.tick as f64 + 1.0);
                let wrapped = self.wrap(&target)?;
                self.admit(entity, agent, wrapped, time, r.ordering, r.interval);
            }
        }
        Ok(())
    }

    /// One rebalancing round followed by a two-phase layout commit.
    /// Agents whose position left the local partition are shipped to
    /// the new owner.
    fn rebalance(&mut self) -> Result<bool, TickError> {
        let weight = self.agents.len() as f64;
        let report = self
            .rebalancer
            .rebalance(&mut self.tree, &mut self.index, weight, &mut self.comm)?;

        let mut hooks: Vec<&mut dyn CommitHook> =
            self.fields.iter_mut().map(|f| f.as_commit_hook()).collect();
        hooks.push(&mut self.migrator);
        let committed = self.index.commit(&mut hooks, &mut self.comm)?;
        drop(hooks);
        if !committed {
            return Ok(false);
        }

        let displaced: Vec<EntityId> = self
            .agents
            .iter()
            .filter(|(_, r)| !self.index.is_local(&r.position))
            .map(|(&id, _)| id)
            .collect();
        for entity in &displaced {
            let Some(resident) = self.agents.shift_remove(entity) else {
                continue;
            };
            let destination = self.index.owner_of_wrapped(&resident.position)?;
            let reschedule = Reschedule {
                ordering: resident.ordering,
                time: self.tick as f64 + 1.0,
                interval: resident.interval,
            };
            let envelope = Envelope::agent(
                destination,
                *entity,
                resident.agent.type_tag(),
                resident.agent.encode(),
                resident.position.clone(),
                reschedule,
            );
            self.migrator.migrate_agent(&resident.handle, envelope, &self.index)?;
        }
        let handed = self.hand_over_objects()?;
        info!(
            rank = self.rank(),
            tick = self.tick,
            version = %self.index.version(),
            changed = report.changed.len(),
            displaced = displaced.len(),
            objects = handed,
            "rebalanced"
        );
        Ok(true)
    }

    /// Collective: pass the records of objects whose cell changed owner
    /// to the new owner. Returns how many records this rank received.
    fn hand_over_objects(&mut self) -> Result<usize, TickError> {
        let size = self.comm.size() as usize;
        let mut batches: Vec<Vec<(EntityId, ObjectRecord)>> = vec![Vec::new(); size];
        for (entity, record) in self.ledger.displaced_objects(&self.index) {
            let owner = self.index.owner_of_wrapped(&record.point)?;
            let rank = self
                .index
                .owner_rank(owner)
                .ok_or(tessera_partition::IndexError::UnknownPartition { id: owner })?;
            batches[rank as usize].push((entity, record));
        }
        let sends = batches
            .iter()
            .map(|batch| {
                let mut w = ByteWriter::new();
                w.write_u32_le(batch.len() as u32);
                for (entity, record) in batch {
                    entity.encode(&mut w);
                    record.encode(&mut w);
                }
                w.into_bytes()
            })
            .collect();
        let all: Vec<u32> = (0..self.comm.size()).collect();
        let received = self.comm.group_exchange(&all, sends)?;
        let mut adopted = 0;
        for buf in &received {
            let mut r = ByteReader::new(buf);
            for _ in 0..r.read_u32_le()? {
                let entity = EntityId::decode(&mut r)?;
                let record = ObjectRecord::decode(&mut r)?;
                self.ledger.record_object(entity, record);
                adopted += 1;
            }
            r.finish()?;
        }
        Ok(adopted)
    }
}

impl<C: Communicator> std::fmt::Debug for DistributedWorld<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedWorld")
            .field("rank", &self.rank())
            .field("tick", &self.tick)
            .field("layout_version", &self.index.version())
            .field("agents", &self.agents.len())
            .field("fields", &self.fields.len())
            .finish()
    }
}
