//! [`HaloField`]: one rank's slice of a distributed grid.

use std::marker::PhantomData;

use tracing::debug;

use tessera_comm::Communicator;
use tessera_core::codec::{from_bytes, to_bytes};
use tessera_core::{ByteReader, ByteWriter, Coord, FieldId, GlobalField, LayoutVersion, Rect};
use tessera_partition::{CommitHook, HookError, IndexError, Partition, PartitionIndex};
use tessera_remote::{Promise, RemoteEndpoint, Target};

use crate::cell::CellValue;
use crate::error::HaloError;
use crate::grid::{DenseGrid, GridStorage};
use crate::plan::SyncPlan;

/// Remote selector: read one owned cell. The argument is the encoded
/// wrapped [`Coord`]; the answer is the encoded cell.
pub const GET_CELL: u32 = 0;

/// Where a point lies relative to this rank's partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Zone {
    /// Owned, and further than one AOI margin from the partition edge.
    Private,
    /// Owned, within one AOI margin of the edge (neighbours replicate it).
    Shared,
    /// A read-only replica of a neighbour's cell.
    Halo,
    /// Neither owned nor replicated here.
    Remote,
}

/// Result of [`HaloField::fetch`].
#[derive(Debug)]
pub enum Fetched<'a, T> {
    /// Answered from local storage.
    Local(&'a T),
    /// Requested from the owner; resolves at the next maintenance phase.
    Pending(Promise),
}

impl<T> Fetched<'_, T> {
    /// True when the value was available locally.
    pub fn is_local(&self) -> bool {
        matches!(self, Fetched::Local(_))
    }
}

/// Byte and cell counts from one [`HaloField::sync`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Neighbours exchanged with.
    pub peers: usize,
    /// Payload bytes sent.
    pub bytes_sent: usize,
    /// Payload bytes received.
    pub bytes_received: usize,
    /// Halo cells overwritten from neighbours.
    pub cells_received: usize,
    /// Halo cells filled from this rank's own cells across a wrap.
    pub cells_copied: usize,
}

/// A grid field partitioned across ranks, with a replicated halo.
///
/// Storage covers the halo rectangle (the owned rectangle expanded by
/// the AOI, clipped only in non-toroidal dimensions). Points are given
/// in global coordinates and resolved to the owned cell or to the halo
/// replica that stands for them.
pub struct HaloField<T: CellValue, S: GridStorage<Cell = T> = DenseGrid<T>> {
    id: FieldId,
    name: String,
    field: GlobalField,
    aoi: Coord,
    local: Rect,
    private: Rect,
    halo: Rect,
    storage: S,
    plan: SyncPlan,
    version: LayoutVersion,
    previous: Option<Vec<Partition>>,
    _cell: PhantomData<fn() -> T>,
}

impl<T: CellValue> HaloField<T> {
    /// A field over `index`'s committed layout with dense storage, every
    /// cell at `T::default()`.
    pub fn new(
        id: FieldId,
        name: impl Into<String>,
        index: &PartitionIndex,
    ) -> Result<Self, HaloError> {
        let halo = halo_of(index)?;
        Self::with_storage(id, name, index, DenseGrid::new(halo))
    }
}

impl<T: CellValue, S: GridStorage<Cell = T>> HaloField<T, S> {
    /// A field backed by `storage`, reshaped to the halo rectangle.
    pub fn with_storage(
        id: FieldId,
        name: impl Into<String>,
        index: &PartitionIndex,
        storage: S,
    ) -> Result<Self, HaloError> {
        let mut field = Self {
            id,
            name: name.into(),
            field: index.field().clone(),
            aoi: Coord::from_slice(index.aoi()),
            local: index.local().rect.clone(),
            private: index.local().rect.shrink(index.aoi()),
            halo: index.local().rect.clone(),
            storage,
            plan: SyncPlan::default(),
            version: index.version(),
            previous: None,
            _cell: PhantomData,
        };
        field.reload(index)?;
        Ok(field)
    }

    /// Field id.
    pub fn id(&self) -> FieldId {
        self.id
    }

    /// Field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owned rectangle.
    pub fn local_rect(&self) -> &Rect {
        &self.local
    }

    /// Owned rectangle shrunk by the AOI.
    pub fn private_rect(&self) -> &Rect {
        &self.private
    }

    /// Storage rectangle.
    pub fn halo_rect(&self) -> &Rect {
        &self.halo
    }

    /// Layout version the field is shaped for.
    pub fn version(&self) -> LayoutVersion {
        self.version
    }

    /// The backing storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub(crate) fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub(crate) fn global(&self) -> &GlobalField {
        &self.field
    }

    /// The current exchange schedule.
    pub fn plan(&self) -> &SyncPlan {
        &self.plan
    }

    // ── Access ──────────────────────────────────────────────────

    /// Zone of `point` (global coordinates, wrapped as needed).
    pub fn zone(&self, point: &[i32]) -> Result<Zone, HaloError> {
        self.resolve(point).map(|(_, zone)| zone)
    }

    /// Read an owned or halo cell.
    pub fn read(&self, point: &[i32]) -> Result<&T, HaloError> {
        let (pos, zone) = self.resolve(point)?;
        if zone == Zone::Remote {
            return Err(HaloError::OutsideHalo {
                point: Coord::from_slice(point),
            });
        }
        self.storage.get(&pos).ok_or(HaloError::OutsideHalo { point: pos })
    }

    /// Overwrite an owned cell.
    pub fn write(&mut self, point: &[i32], value: T) -> Result<(), HaloError> {
        *self.owned_mut(point)? = value;
        Ok(())
    }

    /// Update an owned cell in place.
    pub fn modify(&mut self, point: &[i32], f: impl FnOnce(&mut T)) -> Result<(), HaloError> {
        f(self.owned_mut(point)?);
        Ok(())
    }

    /// Merge an encoded value into an owned cell (see
    /// [`CellValue::place`]).
    pub fn place(&mut self, point: &[i32], bytes: &[u8]) -> Result<(), HaloError> {
        self.owned_mut(point)?.place(bytes)?;
        Ok(())
    }

    /// Remove one value placed from `bytes` in an owned cell. Returns
    /// false if the cell no longer holds it.
    pub fn take(&mut self, point: &[i32], bytes: &[u8]) -> Result<bool, HaloError> {
        Ok(self.owned_mut(point)?.take(bytes))
    }

    /// Read any cell of the field. Cells outside the halo are requested
    /// from their owner through `endpoint`; the promise is ready after
    /// the next maintenance phase.
    pub fn fetch(
        &self,
        point: &[i32],
        index: &PartitionIndex,
        endpoint: &mut RemoteEndpoint,
    ) -> Result<Fetched<'_, T>, HaloError> {
        let (pos, zone) = self.resolve(point)?;
        if zone != Zone::Remote {
            return self
                .storage
                .get(&pos)
                .map(Fetched::Local)
                .ok_or(HaloError::OutsideHalo { point: pos });
        }
        let owner = index.owner_of_wrapped(&pos)?;
        let rank = index
            .owner_rank(owner)
            .ok_or(IndexError::UnknownPartition { id: owner })?;
        let promise = endpoint.request(
            Target::Field {
                field: self.id,
                rank,
            },
            GET_CELL,
            to_bytes(&pos),
        );
        Ok(Fetched::Pending(promise))
    }

    /// Owned cells in row-major order.
    pub fn iter_local(&self) -> impl Iterator<Item = (Coord, &T)> + '_ {
        self.local
            .points()
            .filter_map(move |p| self.storage.get(&p).map(|v| (p, v)))
    }

    /// Answer a remote request addressed to this field.
    pub fn respond(&self, selector: u32, arg: &[u8]) -> Result<Vec<u8>, String> {
        match selector {
            GET_CELL => {
                let point: Coord = from_bytes(arg).map_err(|e| e.to_string())?;
                let (pos, zone) = self.resolve(&point).map_err(|e| e.to_string())?;
                if !matches!(zone, Zone::Private | Zone::Shared) {
                    return Err(format!("{} does not own {point:?}", self.name));
                }
                self.storage
                    .get(&pos)
                    .map(to_bytes)
                    .ok_or_else(|| format!("{} has no cell {point:?}", self.name))
            }
            other => Err(format!("unknown selector {other} for field {}", self.name)),
        }
    }

    /// Map a global point to its storage position and zone. Owned cells
    /// win over halo replicas of the same cell.
    pub(crate) fn resolve(&self, point: &[i32]) -> Result<(Coord, Zone), HaloError> {
        let wrapped = self.field.wrap(point).ok_or_else(|| HaloError::OutsideField {
            point: Coord::from_slice(point),
        })?;
        if self.local.contains(&wrapped) {
            let zone = if self.private.contains(&wrapped) {
                Zone::Private
            } else {
                Zone::Shared
            };
            return Ok((wrapped, zone));
        }
        for t in self.field.shifts() {
            let q: Coord = wrapped.iter().zip(t).map(|(x, s)| x + s).collect();
            if self.halo.contains(&q) {
                return Ok((q, Zone::Halo));
            }
        }
        Ok((wrapped, Zone::Remote))
    }

    fn owned_mut(&mut self, point: &[i32]) -> Result<&mut T, HaloError> {
        let (pos, zone) = self.resolve(point)?;
        match zone {
            Zone::Private | Zone::Shared => self
                .storage
                .get_mut(&pos)
                .ok_or(HaloError::NotLocal { point: pos }),
            Zone::Halo => Err(HaloError::WriteIntoHalo {
                point: Coord::from_slice(point),
            }),
            Zone::Remote => Err(HaloError::NotLocal {
                point: Coord::from_slice(point),
            }),
        }
    }

    // ── Synchronization ─────────────────────────────────────────

    /// Refresh every halo cell from its owner. Collective over the
    /// neighbour set: every rank syncs the same fields in the same order.
    pub fn sync(
        &mut self,
        index: &PartitionIndex,
        comm: &mut dyn Communicator,
    ) -> Result<SyncStats, HaloError> {
        if self.version != index.version() {
            self.reload(index)?;
        }
        let peers = self.plan.peers();
        let mut stats = SyncStats {
            peers: peers.len(),
            ..Default::default()
        };

        let mut sends = Vec::with_capacity(peers.len());
        for transfer in self.plan.transfers() {
            let mut w = ByteWriter::new();
            for region in &transfer.send {
                self.storage.pack(region, &mut w);
            }
            stats.bytes_sent += w.len();
            sends.push(w.into_bytes());
        }

        let received = comm.neighbor_exchange(&peers, sends)?;
        for (transfer, buf) in self.plan.transfers().iter().zip(&received) {
            let mut r = ByteReader::new(buf);
            for region in &transfer.recv {
                stats.cells_received += self.storage.unpack(region, &mut r)?;
            }
            r.finish()?;
            stats.bytes_received += buf.len();
        }

        for copy in self.plan.self_copies() {
            for dest in copy.dest.points() {
                let src: Coord = dest.iter().zip(&copy.offset).map(|(x, o)| x - o).collect();
                if let Some(value) = self.storage.get(&src).cloned() {
                    if let Some(cell) = self.storage.get_mut(&dest) {
                        *cell = value;
                        stats.cells_copied += 1;
                    }
                }
            }
        }

        debug!(
            field = %self.name,
            peers = stats.peers,
            sent = stats.bytes_sent,
            received = stats.bytes_received,
            "halo synced"
        );
        Ok(stats)
    }

    /// Reshape to `index`'s committed layout: recompute the owned,
    /// private and halo rectangles, resize storage (keeping cells in both
    /// the old and the new halo), and rebuild the exchange plan.
    pub fn reload(&mut self, index: &PartitionIndex) -> Result<(), HaloError> {
        self.local = index.local().rect.clone();
        self.private = self.local.shrink(&self.aoi);
        self.halo = halo_of(index)?;
        self.storage.reshape(self.halo.clone());
        self.plan = SyncPlan::build(index)?;
        self.version = index.version();
        Ok(())
    }

    /// Move owned cells to their owners under the new layout, then
    /// reload and refresh the halo.
    fn redistribute(
        &mut self,
        index: &PartitionIndex,
        comm: &mut dyn Communicator,
    ) -> Result<SyncStats, HaloError> {
        let me = index.rank();
        let old = self.previous.take().unwrap_or_else(|| {
            vec![Partition {
                id: index.local_id(),
                rect: self.local.clone(),
                owner: me,
            }]
        });
        let old_rect = |rank: u32| old.iter().find(|p| p.owner == rank).map(|p| p.rect.clone());
        let new_rect = |rank: u32| index.partitions().find(|p| p.owner == rank).map(|p| p.rect.clone());
        let old_local = old_rect(me).unwrap_or_else(|| self.local.clone());
        let new_local = index.local().rect.clone();

        // Symmetric: both sides evaluate the same pair of intersections.
        let mut peers: Vec<u32> = index
            .partitions()
            .map(|p| p.owner)
            .chain(old.iter().map(|p| p.owner))
            .filter(|&r| r != me)
            .filter(|&r| {
                new_rect(r).is_some_and(|n| old_local.intersects(&n))
                    || old_rect(r).is_some_and(|o| o.intersects(&new_local))
            })
            .collect();
        peers.sort_unstable();
        peers.dedup();

        let sends = peers
            .iter()
            .map(|&r| {
                let mut w = ByteWriter::new();
                if let Some(region) = new_rect(r).and_then(|n| old_local.intersection(&n)) {
                    self.storage.pack(&region, &mut w);
                }
                w.into_bytes()
            })
            .collect();
        let received = comm.neighbor_exchange(&peers, sends)?;

        self.reload(index)?;
        let mut moved = 0;
        for (&r, buf) in peers.iter().zip(&received) {
            let mut reader = ByteReader::new(buf);
            if let Some(region) = old_rect(r).and_then(|o| new_local.intersection(&o)) {
                moved += self.storage.unpack(&region, &mut reader)?;
            }
            reader.finish()?;
        }
        debug!(field = %self.name, rank = me, peers = peers.len(), cells = moved, "cells redistributed");
        self.sync(index, comm)
    }
}

impl<T: CellValue, S: GridStorage<Cell = T>> CommitHook for HaloField<T, S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn pre_commit(
        &mut self,
        index: &PartitionIndex,
        _comm: &mut dyn Communicator,
    ) -> Result<(), HookError> {
        self.previous = Some(index.partitions().cloned().collect());
        Ok(())
    }

    fn post_commit(
        &mut self,
        index: &PartitionIndex,
        comm: &mut dyn Communicator,
    ) -> Result<(), HookError> {
        self.redistribute(index, comm)?;
        Ok(())
    }
}

fn halo_of(index: &PartitionIndex) -> Result<Rect, IndexError> {
    let id = index.local_id();
    index
        .halo_rect(id)
        .ok_or(IndexError::UnknownPartition { id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_comm::{run_local, LocalCluster};
    use tessera_core::PartitionId;

    fn rect(lo: &[i32], hi: &[i32]) -> Rect {
        Rect::new(Coord::from_slice(lo), Coord::from_slice(hi))
    }

    fn columns(rank: u32) -> PartitionIndex {
        let field = GlobalField::new(&[8, 8], &[true, true]).unwrap();
        let parts = vec![
            Partition {
                id: PartitionId(0),
                rect: rect(&[0, 0], &[8, 4]),
                owner: 0,
            },
            Partition {
                id: PartitionId(1),
                rect: rect(&[0, 4], &[8, 8]),
                owner: 1,
            },
        ];
        PartitionIndex::with_layout(field, &[1, 1], rank, parts).unwrap()
    }

    #[test]
    fn zones_classify_points() {
        let index = columns(0);
        let f: HaloField<i32> = HaloField::new(FieldId(0), "heat", &index).unwrap();
        assert_eq!(f.halo_rect(), &rect(&[-1, -1], &[9, 5]));
        assert_eq!(f.zone(&[4, 2]).unwrap(), Zone::Private);
        assert!(f.private_rect().contains(&[4, 2]));
        assert!(!f.private_rect().contains(&[0, 0]));
        assert_eq!(f.zone(&[0, 0]).unwrap(), Zone::Shared);
        assert_eq!(f.zone(&[4, 4]).unwrap(), Zone::Halo);
        // Column 7 is reached across the wrap as column -1.
        assert_eq!(f.zone(&[4, 7]).unwrap(), Zone::Halo);
        assert_eq!(f.zone(&[4, 6]).unwrap(), Zone::Remote);
        assert_eq!(f.zone(&[4, -2]).unwrap(), Zone::Remote);
    }

    #[test]
    fn writes_are_restricted_to_owned_cells() {
        let index = columns(0);
        let mut f: HaloField<i32> = HaloField::new(FieldId(0), "heat", &index).unwrap();
        f.write(&[3, 3], 9).unwrap();
        assert_eq!(f.read(&[3, 3]).unwrap(), &9);
        assert!(matches!(f.write(&[3, 4], 1), Err(HaloError::WriteIntoHalo { .. })));
        assert!(matches!(f.write(&[3, 6], 1), Err(HaloError::NotLocal { .. })));
        assert!(matches!(f.read(&[3, 6]), Err(HaloError::OutsideHalo { .. })));
    }

    #[test]
    fn sync_fills_both_edges_of_the_torus() {
        let results = run_local(2, |mut comm| {
            let index = columns(comm.rank());
            let mut f: HaloField<u32> = HaloField::new(FieldId(0), "id", &index).unwrap();
            let mine = comm.rank() + 10;
            for p in f.local_rect().clone().points() {
                f.write(&p, mine).unwrap();
            }
            let stats = f.sync(&index, &mut comm).unwrap();
            let left = *f.read(&[2, if comm.rank() == 0 { 7 } else { 3 }]).unwrap();
            let right = *f.read(&[2, if comm.rank() == 0 { 4 } else { 0 }]).unwrap();
            (stats, left, right)
        });
        assert_eq!(results[0].1, 11);
        assert_eq!(results[0].2, 11);
        assert_eq!(results[1].1, 10);
        assert_eq!(results[1].2, 10);
        // Two halo columns of ten cells, four bytes each.
        assert_eq!(results[0].0.cells_received, 20);
        assert_eq!(results[0].0.bytes_received, 80);
        // The top and bottom halo rows wrap onto the partition itself.
        assert_eq!(results[0].0.cells_copied, 8);
    }

    #[test]
    fn fetch_outside_halo_returns_pending_promise() {
        let results = run_local(2, |mut comm| {
            let index = columns(comm.rank());
            let mut f: HaloField<u32> = HaloField::new(FieldId(3), "id", &index).unwrap();
            for p in f.local_rect().clone().points() {
                let v = (p[0] * 8 + p[1]) as u32;
                f.write(&p, v).unwrap();
            }
            let mut endpoint = RemoteEndpoint::new(comm.rank());
            let far = if comm.rank() == 0 { [5, 6] } else { [5, 2] };
            let promise = match f.fetch(&far, &index, &mut endpoint).unwrap() {
                Fetched::Pending(p) => p,
                Fetched::Local(_) => panic!("point should be remote"),
            };
            assert!(!promise.is_ready());
            struct One<'a>(&'a HaloField<u32>);
            impl tessera_remote::Responder for One<'_> {
                fn respond_field(
                    &mut self,
                    _: FieldId,
                    s: u32,
                    a: &[u8],
                ) -> Result<Vec<u8>, String> {
                    self.0.respond(s, a)
                }
            }
            endpoint.maintain(&mut comm, &mut One(&f)).unwrap();
            promise.get_as::<u32>().unwrap()
        });
        assert_eq!(results, vec![46, 42]);
    }

    #[test]
    fn commit_moves_cells_to_new_owner() {
        let results = run_local(2, |mut comm| {
            let rank = comm.rank();
            let mut index = columns(rank);
            let mut f: HaloField<u32> = HaloField::new(FieldId(0), "v", &index).unwrap();
            for p in f.local_rect().clone().points() {
                f.write(&p, (p[0] * 8 + p[1]) as u32).unwrap();
            }
            index.update(Partition {
                id: PartitionId(0),
                rect: rect(&[0, 0], &[8, 2]),
                owner: 0,
            });
            index.update(Partition {
                id: PartitionId(1),
                rect: rect(&[0, 2], &[8, 8]),
                owner: 1,
            });
            index.commit(&mut [&mut f], &mut comm).unwrap();
            let owned: Vec<(Coord, u32)> = f.iter_local().map(|(p, v)| (p, *v)).collect();
            (f.local_rect().clone(), owned, *f.read(&[0, 2]).unwrap())
        });
        assert_eq!(results[1].0, rect(&[0, 2], &[8, 8]));
        for (p, v) in &results[1].1 {
            assert_eq!(*v, (p[0] * 8 + p[1]) as u32, "cell {p:?}");
        }
        // Rank 0's halo was re-synced after the move.
        assert_eq!(results[0].2, 2);
    }

    #[test]
    fn respond_refuses_cells_it_does_not_own() {
        let mut comm = LocalCluster::new(1).remove(0);
        let field = GlobalField::new(&[4], &[false]).unwrap();
        let index = PartitionIndex::with_layout(
            field,
            &[1],
            0,
            vec![Partition {
                id: PartitionId(0),
                rect: rect(&[0], &[4]),
                owner: 0,
            }],
        )
        .unwrap();
        let mut f: HaloField<f64> = HaloField::new(FieldId(0), "x", &index).unwrap();
        f.write(&[2], 1.5).unwrap();
        f.sync(&index, &mut comm).unwrap();
        let coord: Coord = Coord::from_slice(&[2]);
        assert_eq!(f.respond(GET_CELL, &to_bytes(&coord)).unwrap(), to_bytes(&1.5f64));
        assert!(f.respond(GET_CELL, &to_bytes(&Coord::from_slice(&[9]))).is_err());
        assert!(f.respond(7, &[]).is_err());
    }
}
