//! The per-rank migration queue and its end-of-tick exchange.

use tracing::{debug, warn};

use tessera_comm::Communicator;
use tessera_core::codec::{from_bytes, to_bytes};
use tessera_core::{PartitionId, ScheduleHandle};
use tessera_partition::{CommitHook, HookError, IndexError, PartitionIndex};

use crate::envelope::Envelope;
use crate::error::MigrateError;

/// What one [`Migrator::exchange`] did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExchangeReport {
    /// Envelopes whose destination is the local partition, in arrival
    /// order (by neighbour, then by the sender's queue order).
    pub delivered: Vec<Envelope>,
    /// Envelopes shipped to neighbours.
    pub sent: usize,
    /// Received envelopes kept for forwarding next tick.
    pub relayed: usize,
    /// Payload bytes sent.
    pub bytes_sent: usize,
    /// Payload bytes received.
    pub bytes_received: usize,
}

/// Queues outgoing envelopes and moves them one neighbour per tick.
#[derive(Debug)]
pub struct Migrator {
    local: PartitionId,
    max_hops: u8,
    queue: Vec<Envelope>,
}

impl Migrator {
    /// A migrator for the local partition of `index`. With `max_hops`
    /// unset the ceiling is the partition count, which bounds any
    /// shortest path through the neighbour graph.
    pub fn new(index: &PartitionIndex, max_hops: Option<u8>) -> Self {
        let default = u8::try_from(index.len()).unwrap_or(u8::MAX);
        Self {
            local: index.local_id(),
            max_hops: max_hops.unwrap_or(default),
            queue: Vec::new(),
        }
    }

    /// The hop ceiling.
    pub fn max_hops(&self) -> u8 {
        self.max_hops
    }

    /// Envelopes waiting for the next exchange.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Queue an envelope for the next exchange.
    ///
    /// Rejected synchronously if it is addressed to the local partition,
    /// to a partition that does not exist, or is missing the target
    /// coordinate it needs on arrival.
    pub fn enqueue(
        &mut self,
        envelope: Envelope,
        index: &PartitionIndex,
    ) -> Result<(), MigrateError> {
        self.validate(&envelope, index)?;
        self.queue.push(envelope);
        Ok(())
    }

    /// Queue an agent and stop its local schedule entry. The handle is
    /// stopped before the envelope is queued, so the agent cannot step
    /// here again; a rejected envelope leaves the handle live.
    pub fn migrate_agent(
        &mut self,
        handle: &ScheduleHandle,
        envelope: Envelope,
        index: &PartitionIndex,
    ) -> Result<(), MigrateError> {
        self.validate(&envelope, index)?;
        handle.stop();
        self.queue.push(envelope);
        Ok(())
    }

    fn validate(&self, envelope: &Envelope, index: &PartitionIndex) -> Result<(), MigrateError> {
        let entity = envelope.entity();
        if envelope.destination == self.local {
            return Err(MigrateError::SelfAddressed {
                entity,
                destination: envelope.destination,
            });
        }
        if index.partition(envelope.destination).is_none() {
            return Err(MigrateError::UnknownDestination {
                entity,
                destination: envelope.destination,
            });
        }
        let needs_target = envelope.payload.kind.is_agent() || envelope.field.is_some();
        if needs_target && envelope.target.is_none() {
            return Err(MigrateError::MissingTarget { entity });
        }
        Ok(())
    }

    /// The neighbour to hand an envelope for `destination` to: the
    /// destination itself when adjacent, otherwise the neighbour whose
    /// rectangle is nearest the destination's across any wrap (lowest id
    /// on ties).
    pub fn next_hop(
        &self,
        destination: PartitionId,
        index: &PartitionIndex,
    ) -> Result<PartitionId, MigrateError> {
        let neighbours = index.local_neighbours();
        if neighbours.contains(&destination) {
            return Ok(destination);
        }
        let target = index
            .partition(destination)
            .ok_or(IndexError::UnknownPartition { id: destination })?;
        neighbours
            .iter()
            .filter_map(|&id| index.partition(id))
            .min_by_key(|p| (index.field().gap(&p.rect, &target.rect), p.id))
            .map(|p| p.id)
            .ok_or(MigrateError::NoRoute {
                from: self.local,
                destination,
            })
    }

    /// Ship every queued envelope one hop and collect what arrived.
    ///
    /// Collective over the neighbour set. Envelopes that arrive for
    /// another partition are queued again and leave at the next
    /// exchange, so an envelope `k` hops from home arrives `k` exchanges
    /// after it was queued.
    pub fn exchange(
        &mut self,
        index: &PartitionIndex,
        comm: &mut dyn Communicator,
    ) -> Result<ExchangeReport, MigrateError> {
        let neighbours = index.local_neighbours();
        let mut peers = Vec::with_capacity(neighbours.len());
        for &id in neighbours {
            peers.push(
                index
                    .owner_rank(id)
                    .ok_or(IndexError::UnknownPartition { id })?,
            );
        }

        let mut buckets: Vec<Vec<Envelope>> = vec![Vec::new(); neighbours.len()];
        let mut report = ExchangeReport::default();
        for mut envelope in std::mem::take(&mut self.queue) {
            if envelope.hops >= self.max_hops {
                return Err(MigrateError::HopLimitExceeded {
                    entity: envelope.entity(),
                    destination: envelope.destination,
                    max: self.max_hops,
                });
            }
            let hop = self.next_hop(envelope.destination, index)?;
            let slot = neighbours
                .iter()
                .position(|&id| id == hop)
                .ok_or(MigrateError::NoRoute {
                    from: self.local,
                    destination: envelope.destination,
                })?;
            envelope.hops += 1;
            buckets[slot].push(envelope);
            report.sent += 1;
        }

        let sends: Vec<Vec<u8>> = buckets.iter().map(to_bytes).collect();
        report.bytes_sent = sends.iter().map(Vec::len).sum();
        let received = comm.neighbor_exchange(&peers, sends)?;

        for buf in &received {
            report.bytes_received += buf.len();
            let batch: Vec<Envelope> = from_bytes(buf)?;
            for envelope in batch {
                if envelope.destination == self.local {
                    report.delivered.push(envelope);
                } else {
                    report.relayed += 1;
                    self.queue.push(envelope);
                }
            }
        }
        debug!(
            partition = %self.local,
            sent = report.sent,
            delivered = report.delivered.len(),
            relayed = report.relayed,
            "migration exchange complete"
        );
        Ok(report)
    }
}

impl CommitHook for Migrator {
    fn name(&self) -> &str {
        "migrator"
    }

    fn pre_commit(
        &mut self,
        _index: &PartitionIndex,
        _comm: &mut dyn Communicator,
    ) -> Result<(), HookError> {
        Ok(())
    }

    /// Routes are computed at exchange time, so the only state to
    /// revalidate is that queued destinations still exist.
    fn post_commit(
        &mut self,
        index: &PartitionIndex,
        _comm: &mut dyn Communicator,
    ) -> Result<(), HookError> {
        self.local = index.local_id();
        if let Some(lost) = self
            .queue
            .iter()
            .find(|e| index.partition(e.destination).is_none())
        {
            warn!(entity = %lost.entity(), destination = %lost.destination, "queued envelope lost its destination");
            return Err(HookError::Failed {
                reason: format!(
                    "queued envelope for {} names removed partition {}",
                    lost.entity(),
                    lost.destination
                ),
            });
        }
        Ok(())
    }
}
