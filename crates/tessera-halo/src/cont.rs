//! Continuous positions bucketed into grid cells.
//!
//! A [`ContinuousGrid`] holds particles at real-valued positions. Each
//! particle lives in the grid cell containing it and stores its offset
//! from that cell's lower corner, so halo exchange moves whole cells
//! exactly as for dense storage: the receiver unpacks the cell at its own
//! (possibly wrapped) coordinates and the particle lands at the matching
//! position there.
//!
//! Cell `c` covers `[c * w, (c + 1) * w)` along a dimension of width `w`.
//! Neighbour queries search owned cells and the halo only; particles
//! further than one AOI margin beyond the partition are not seen.

use indexmap::IndexMap;
use smallvec::SmallVec;

use tessera_core::{ByteReader, ByteWriter, CodecError, Coord, EntityId, FieldId, Rect, Wire};
use tessera_partition::PartitionIndex;

use crate::error::HaloError;
use crate::field::{HaloField, Zone};
use crate::grid::{DenseGrid, GridStorage};

/// A real-valued position, one component per dimension.
pub type Position = SmallVec<[f64; 4]>;

/// A halo field of particles at continuous positions.
pub type ContinuousField<T> = HaloField<Vec<Particle<T>>, ContinuousGrid<T>>;

/// One object at a continuous position.
#[derive(Clone, Debug, PartialEq)]
pub struct Particle<T> {
    /// Identity, unique across ranks.
    pub id: EntityId,
    /// Offset from the lower corner of the holding cell.
    pub offset: Position,
    /// Payload.
    pub value: T,
}

impl<T: Wire> Wire for Particle<T> {
    fn encode(&self, w: &mut ByteWriter) {
        self.id.encode(w);
        w.write_u32_le(self.offset.len() as u32);
        for &x in &self.offset {
            w.write_f64_le(x);
        }
        self.value.encode(w);
    }

    fn decode(r: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let id = EntityId::decode(r)?;
        let len = r.read_u32_le()? as usize;
        let mut offset = Position::with_capacity(len.min(r.remaining()));
        for _ in 0..len {
            offset.push(r.read_f64_le()?);
        }
        Ok(Self {
            id,
            offset,
            value: T::decode(r)?,
        })
    }
}

/// A particle found by a neighbour query.
#[derive(Clone, Debug, PartialEq)]
pub struct Neighbour<'a, T> {
    /// Particle id.
    pub id: EntityId,
    /// Position in field coordinates, wrapped into the field.
    pub position: Position,
    /// Distance from the query point, across wraps where shorter.
    pub distance: f64,
    /// Payload.
    pub value: &'a T,
}

// ── Storage ────────────────────────────────────────────────────────

/// Cell-bucketed particle storage.
///
/// An id index points at the cell last known to hold each particle.
/// Lookups check the cell before trusting the index and fall back to a
/// scan, so writes that bypass it (plain cell writes, wrap copies during
/// sync) never produce wrong answers.
#[derive(Clone, Debug)]
pub struct ContinuousGrid<T> {
    cells: DenseGrid<Vec<Particle<T>>>,
    width: Position,
    index: IndexMap<EntityId, Coord>,
}

impl<T> ContinuousGrid<T>
where
    T: Wire + Clone + Send + 'static,
{
    /// Empty storage over `bounds` with cells `width` units wide.
    pub fn new(bounds: Rect, width: &[f64]) -> Self {
        Self {
            cells: DenseGrid::new(bounds),
            width: Position::from_slice(width),
            index: IndexMap::new(),
        }
    }

    /// Cell width per dimension.
    pub fn width(&self) -> &[f64] {
        &self.width
    }

    /// Particles stored, halo replicas included.
    pub fn len(&self) -> usize {
        self.cells
            .bounds()
            .points()
            .filter_map(|p| self.cells.get(&p).map(Vec::len))
            .sum()
    }

    /// True if no cell holds a particle.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn holds(&self, cell: &[i32], id: EntityId) -> bool {
        self.cells
            .get(cell)
            .is_some_and(|ps| ps.iter().any(|p| p.id == id))
    }

    /// Cell holding `id` inside `region`.
    fn find_in(&self, id: EntityId, region: &Rect) -> Option<Coord> {
        if let Some(cell) = self.index.get(&id) {
            if region.contains(cell) && self.holds(cell, id) {
                return Some(cell.clone());
            }
        }
        region.points().find(|p| self.holds(p, id))
    }

    fn push(&mut self, cell: Coord, particle: Particle<T>) {
        let id = particle.id;
        if let Some(ps) = self.cells.get_mut(&cell) {
            ps.push(particle);
            self.index.insert(id, cell);
        }
    }

    fn pull(&mut self, cell: &[i32], id: EntityId) -> Option<Particle<T>> {
        let ps = self.cells.get_mut(cell)?;
        let i = ps.iter().position(|p| p.id == id)?;
        let particle = ps.remove(i);
        if self.index.get(&id).is_some_and(|c| c.as_slice() == cell) {
            self.index.shift_remove(&id);
        }
        Some(particle)
    }
}

impl<T> GridStorage for ContinuousGrid<T>
where
    T: Wire + Clone + Send + 'static,
{
    type Cell = Vec<Particle<T>>;

    fn bounds(&self) -> &Rect {
        self.cells.bounds()
    }

    fn get(&self, p: &[i32]) -> Option<&Self::Cell> {
        self.cells.get(p)
    }

    fn get_mut(&mut self, p: &[i32]) -> Option<&mut Self::Cell> {
        self.cells.get_mut(p)
    }

    fn reshape(&mut self, bounds: Rect) {
        self.index.retain(|_, cell| bounds.contains(cell));
        self.cells.reshape(bounds);
    }

    fn unpack(&mut self, region: &Rect, r: &mut ByteReader<'_>) -> Result<usize, CodecError> {
        let count = self.cells.unpack(region, r)?;
        for p in region.points() {
            let ids: Vec<EntityId> = match self.cells.get(&p) {
                Some(ps) => ps.iter().map(|q| q.id).collect(),
                None => continue,
            };
            for id in ids {
                // Keep an index entry that still holds; owned copies win.
                let stale = match self.index.get(&id) {
                    Some(cell) => !self.holds(cell, id),
                    None => true,
                };
                if stale {
                    self.index.insert(id, p.clone());
                }
            }
        }
        Ok(count)
    }
}

// ── Field operations ───────────────────────────────────────────────

impl<T> HaloField<Vec<Particle<T>>, ContinuousGrid<T>>
where
    T: Wire + Clone + Send + 'static,
{
    /// An empty continuous field over `index`'s committed layout, with
    /// cells `width` units wide in each dimension.
    pub fn continuous(
        id: FieldId,
        name: impl Into<String>,
        index: &PartitionIndex,
        width: &[f64],
    ) -> Result<Self, HaloError> {
        let dims = index.field().dims();
        if width.len() != dims || width.iter().any(|w| !w.is_finite() || *w <= 0.0) {
            return Err(HaloError::BadCellWidth {
                dims,
                width: width.to_vec(),
            });
        }
        let storage = ContinuousGrid::new(index.local().rect.clone(), width);
        Self::with_storage(id, name, index, storage)
    }

    /// Put particle `id` at `position`, replacing any copy already held
    /// in an owned cell. The position must fall in an owned cell.
    pub fn set_location(
        &mut self,
        id: EntityId,
        position: &[f64],
        value: T,
    ) -> Result<(), HaloError> {
        let (cell, offset) = self.owned_bucket(position)?;
        self.remove(id);
        self.storage_mut().push(cell, Particle { id, offset, value });
        Ok(())
    }

    /// Move a held particle to `position`, which must fall in an owned
    /// cell. Returns false if no owned cell holds `id`.
    pub fn relocate(&mut self, id: EntityId, position: &[f64]) -> Result<bool, HaloError> {
        let (cell, offset) = self.owned_bucket(position)?;
        let Some(mut particle) = self.pull_owned(id) else {
            return Ok(false);
        };
        particle.offset = offset;
        self.storage_mut().push(cell, particle);
        Ok(true)
    }

    /// Take a particle out of its owned cell.
    pub fn remove(&mut self, id: EntityId) -> Option<T> {
        self.pull_owned(id).map(|p| p.value)
    }

    /// Position of a particle held here, owned or replicated.
    pub fn location(&self, id: EntityId) -> Option<Position> {
        let (cell, particle) = self.particle(id)?;
        Some(self.wrapped(&cell, &particle.offset))
    }

    /// Payload of a particle held here, owned or replicated.
    pub fn get(&self, id: EntityId) -> Option<&T> {
        self.particle(id).map(|(_, p)| &p.value)
    }

    /// Owned particles with their positions, in cell order.
    pub fn iter_particles(&self) -> impl Iterator<Item = (Position, &Particle<T>)> + '_ {
        self.iter_local()
            .flat_map(move |(cell, ps)| ps.iter().map(move |p| (self.wrapped(&cell, &p.offset), p)))
    }

    /// Particles within `radius` of `position`, nearest first. `exclude`
    /// drops one id, typically the asking particle. The position must be
    /// owned or in the halo.
    pub fn within(
        &self,
        position: &[f64],
        radius: f64,
        exclude: Option<EntityId>,
    ) -> Result<Vec<Neighbour<'_, T>>, HaloError> {
        let (centre, q) = self.visible_bucket(position)?;
        let lo: Coord = centre
            .iter()
            .zip(self.storage().width())
            .map(|(&c, &w)| c - (radius / w).ceil() as i32)
            .collect();
        let hi: Coord = centre
            .iter()
            .zip(self.storage().width())
            .map(|(&c, &w)| c + (radius / w).ceil() as i32 + 1)
            .collect();
        let mut found = IndexMap::new();
        if let Some(block) = Rect::new(lo, hi).intersection(self.storage().bounds()) {
            for cell in block.points() {
                self.gather(&cell, &q, exclude, &mut found);
            }
        }
        let mut out: Vec<Neighbour<'_, T>> =
            found.into_values().filter(|n| n.distance <= radius).collect();
        sort_by_distance(&mut out);
        Ok(out)
    }

    /// Up to `k` particles nearest to `position`, nearest first.
    /// `exclude` drops one id. The position must be owned or in the halo.
    pub fn nearest(
        &self,
        position: &[f64],
        k: usize,
        exclude: Option<EntityId>,
    ) -> Result<Vec<Neighbour<'_, T>>, HaloError> {
        let (centre, q) = self.visible_bucket(position)?;
        let bounds = self.storage().bounds().clone();
        let narrowest = self
            .storage()
            .width()
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min);
        let layers = centre
            .iter()
            .enumerate()
            .map(|(d, &c)| (c - bounds.lo()[d]).max(bounds.hi()[d] - 1 - c))
            .max()
            .unwrap_or(0);

        // A particle in a cell `layer + 1` steps away is at least
        // `layer * narrowest` from the query point.
        let mut found = IndexMap::new();
        for layer in 0..=layers {
            let lo: Coord = centre.iter().map(|c| c - layer).collect();
            let hi: Coord = centre.iter().map(|c| c + layer + 1).collect();
            if let Some(block) = Rect::new(lo, hi).intersection(&bounds) {
                for cell in block.points() {
                    let ring = cell.iter().zip(&centre).map(|(a, b)| (a - b).abs()).max();
                    if ring == Some(layer) {
                        self.gather(&cell, &q, exclude, &mut found);
                    }
                }
            }
            let settled = found
                .values()
                .filter(|n| n.distance <= f64::from(layer) * narrowest)
                .count();
            if settled >= k {
                break;
            }
        }
        let mut out: Vec<Neighbour<'_, T>> = found.into_values().collect();
        sort_by_distance(&mut out);
        out.truncate(k);
        Ok(out)
    }

    // ── Internals ───────────────────────────────────────────────

    /// Storage cell and zone for `position`, plus the position in the
    /// storage frame (unwrapped to match the cell).
    fn bucket(&self, position: &[f64]) -> Result<(Coord, Zone, Position), HaloError> {
        let width = self.storage().width();
        let outside = || HaloError::OutsideField {
            point: position.iter().map(|x| x.floor() as i32).collect(),
        };
        if position.len() != width.len() || position.iter().any(|x| !x.is_finite()) {
            return Err(outside());
        }
        let raw: Coord = position
            .iter()
            .zip(width)
            .map(|(x, w)| (x / w).floor() as i32)
            .collect();
        let (cell, zone) = self.resolve(&raw)?;
        let q = position
            .iter()
            .zip(width)
            .zip(cell.iter().zip(&raw))
            .map(|((x, w), (c, r))| x + f64::from(c - r) * w)
            .collect();
        Ok((cell, zone, q))
    }

    fn owned_bucket(&self, position: &[f64]) -> Result<(Coord, Position), HaloError> {
        let (cell, zone, q) = self.bucket(position)?;
        match zone {
            Zone::Private | Zone::Shared => {
                let offset = q
                    .iter()
                    .zip(self.storage().width())
                    .zip(&cell)
                    .map(|((x, w), &c)| x - f64::from(c) * w)
                    .collect();
                Ok((cell, offset))
            }
            Zone::Halo => Err(HaloError::WriteIntoHalo { point: cell }),
            Zone::Remote => Err(HaloError::NotLocal { point: cell }),
        }
    }

    fn visible_bucket(&self, position: &[f64]) -> Result<(Coord, Position), HaloError> {
        match self.bucket(position)? {
            (cell, Zone::Remote, _) => Err(HaloError::OutsideHalo { point: cell }),
            (cell, _, q) => Ok((cell, q)),
        }
    }

    fn pull_owned(&mut self, id: EntityId) -> Option<Particle<T>> {
        let local = self.local_rect().clone();
        let cell = self.storage().find_in(id, &local)?;
        self.storage_mut().pull(&cell, id)
    }

    fn particle(&self, id: EntityId) -> Option<(Coord, &Particle<T>)> {
        let storage = self.storage();
        let cell = storage
            .find_in(id, self.local_rect())
            .or_else(|| storage.find_in(id, storage.bounds()))?;
        let particle = storage.get(&cell)?.iter().find(|p| p.id == id)?;
        Some((cell, particle))
    }

    /// Storage-frame position of a particle.
    fn unwrapped(&self, cell: &[i32], offset: &[f64]) -> Position {
        cell.iter()
            .zip(offset)
            .zip(self.storage().width())
            .map(|((&c, o), w)| f64::from(c) * w + o)
            .collect()
    }

    fn wrapped(&self, cell: &[i32], offset: &[f64]) -> Position {
        let field = self.global();
        self.unwrapped(cell, offset)
            .iter()
            .zip(self.storage().width())
            .enumerate()
            .map(|(d, (&x, w))| {
                if field.is_toroidal(d) {
                    x.rem_euclid(f64::from(field.size()[d]) * w)
                } else {
                    x
                }
            })
            .collect()
    }

    /// Add the particles of one storage cell, keeping the shortest
    /// distance when a particle is seen through more than one copy.
    fn gather<'a>(
        &'a self,
        cell: &[i32],
        q: &[f64],
        exclude: Option<EntityId>,
        found: &mut IndexMap<EntityId, Neighbour<'a, T>>,
    ) {
        let Some(ps) = self.storage().get(cell) else {
            return;
        };
        for p in ps.iter().filter(|p| Some(p.id) != exclude) {
            let at = self.unwrapped(cell, &p.offset);
            let distance = at
                .iter()
                .zip(q)
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f64>()
                .sqrt();
            if found.get(&p.id).is_some_and(|n| n.distance <= distance) {
                continue;
            }
            found.insert(
                p.id,
                Neighbour {
                    id: p.id,
                    position: self.wrapped(cell, &p.offset),
                    distance,
                    value: &p.value,
                },
            );
        }
    }
}

fn sort_by_distance<T>(out: &mut [Neighbour<'_, T>]) {
    out.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.id.raw().cmp(&b.id.raw()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_comm::{run_local, Communicator, LocalCluster};
    use tessera_core::{GlobalField, PartitionId};
    use tessera_partition::Partition;

    fn rect(lo: &[i32], hi: &[i32]) -> Rect {
        Rect::new(Coord::from_slice(lo), Coord::from_slice(hi))
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    /// One rank owning a 5x5 torus of 2-unit cells: a 10x10 space.
    fn whole() -> PartitionIndex {
        let field = GlobalField::new(&[5, 5], &[true, true]).unwrap();
        let parts = vec![Partition {
            id: PartitionId(0),
            rect: rect(&[0, 0], &[5, 5]),
            owner: 0,
        }];
        PartitionIndex::with_layout(field, &[1, 1], 0, parts).unwrap()
    }

    /// Two ranks splitting an 8x8 torus of unit cells by columns.
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

    fn ids<T>(found: &[Neighbour<'_, T>]) -> Vec<EntityId> {
        found.iter().map(|n| n.id).collect()
    }

    #[test]
    fn rejects_bad_widths() {
        let index = whole();
        for width in [vec![1.0], vec![1.0, 0.0], vec![f64::NAN, 1.0]] {
            assert!(matches!(
                ContinuousField::<u32>::continuous(FieldId(0), "p", &index, &width),
                Err(HaloError::BadCellWidth { dims: 2, .. })
            ));
        }
    }

    #[test]
    fn particles_move_and_leave() {
        let index = whole();
        let mut f = ContinuousField::<u32>::continuous(FieldId(0), "p", &index, &[2.0, 2.0])
            .unwrap();
        let a = EntityId::new(0, 0);
        f.set_location(a, &[3.0, 7.5], 11).unwrap();
        assert_eq!(f.read(&[1, 3]).unwrap().len(), 1);
        assert_eq!(f.location(a).unwrap().to_vec(), vec![3.0, 7.5]);

        assert!(f.relocate(a, &[13.0, -0.5]).unwrap());
        // Wrapped into the field: (3, 9.5), cell (1, 4).
        assert_eq!(f.location(a).unwrap().to_vec(), vec![3.0, 9.5]);
        assert!(f.read(&[1, 3]).unwrap().is_empty());
        assert_eq!(f.get(a), Some(&11));

        f.set_location(a, &[0.5, 0.5], 12).unwrap();
        assert_eq!(f.storage().len(), 1);
        assert_eq!(f.remove(a), Some(12));
        assert_eq!(f.remove(a), None);
        assert!(!f.relocate(a, &[1.0, 1.0]).unwrap());
        assert!(f.storage().is_empty());
    }

    #[test]
    fn neighbours_are_found_across_the_wrap() {
        let mut comm = LocalCluster::new(1).remove(0);
        let index = whole();
        let mut f = ContinuousField::<u32>::continuous(FieldId(0), "p", &index, &[2.0, 2.0])
            .unwrap();
        let [a, b, c, d] = [0, 1, 2, 3].map(|s| EntityId::new(0, s));
        f.set_location(a, &[0.5, 0.5], 1).unwrap();
        f.set_location(b, &[9.5, 0.5], 2).unwrap();
        f.set_location(c, &[5.0, 5.0], 3).unwrap();
        f.set_location(d, &[3.0, 0.5], 4).unwrap();
        f.sync(&index, &mut comm).unwrap();

        let near = f.within(&[0.5, 0.5], 1.5, Some(a)).unwrap();
        assert_eq!(ids(&near), vec![b]);
        assert!(close(near[0].distance, 1.0));
        assert_eq!(near[0].position.to_vec(), vec![9.5, 0.5]);
        assert_eq!(near[0].value, &2);

        let all = f.within(&[0.5, 0.5], 3.0, None).unwrap();
        assert_eq!(ids(&all), vec![a, b, d]);

        let two = f.nearest(&[0.5, 0.5], 2, Some(a)).unwrap();
        assert_eq!(ids(&two), vec![b, d]);
        assert!(close(two[1].distance, 2.5));

        // Asking for more than exist returns everything once.
        let every = f.nearest(&[0.5, 0.5], 10, None).unwrap();
        assert_eq!(ids(&every), vec![a, b, d, c]);
    }

    #[test]
    fn neighbours_are_found_across_partitions() {
        let results = run_local(2, |mut comm| {
            let rank = comm.rank();
            let index = columns(rank);
            let mut f =
                ContinuousField::<u64>::continuous(FieldId(0), "p", &index, &[1.0, 1.0]).unwrap();
            let mine = EntityId::new(rank, 0);
            let at = if rank == 0 { [2.5, 3.5] } else { [2.5, 7.8] };
            f.set_location(mine, &at, u64::from(rank) + 100).unwrap();
            assert!(matches!(
                f.set_location(EntityId::new(rank, 1), &[2.5, 4.5 - 4.0 * f64::from(rank)], 0),
                Err(HaloError::WriteIntoHalo { .. })
            ));
            f.sync(&index, &mut comm).unwrap();

            // Rank 1 looks left across the partition edge; rank 0 looks
            // left across the torus edge.
            let query = if rank == 0 { [2.5, 0.3] } else { [2.5, 4.2] };
            let seen = f
                .within(&query, 1.0, Some(mine))
                .unwrap()
                .into_iter()
                .map(|n| (n.id, n.distance, n.position.to_vec(), *n.value))
                .collect::<Vec<_>>();
            let nearest = f
                .nearest(&at, 1, Some(mine))
                .unwrap()
                .into_iter()
                .map(|n| (n.id, n.distance))
                .collect::<Vec<_>>();
            (seen, nearest, f.location(EntityId::new(1 - rank, 0)).is_some())
        });

        let (seen, nearest, replicated) = &results[0];
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, EntityId::new(1, 0));
        assert!(close(seen[0].1, 0.5));
        assert!(close(seen[0].2[1], 7.8));
        assert_eq!(seen[0].3, 101);
        // Rank 1's particle is 3.7 away through the wrap, 4.3 directly.
        assert!(close(nearest[0].1, 3.7));
        assert!(replicated);

        let (seen, nearest, _) = &results[1];
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, EntityId::new(0, 0));
        assert!(close(seen[0].1, 0.7));
        assert_eq!(seen[0].2, vec![2.5, 3.5]);
        assert_eq!(nearest[0].0, EntityId::new(0, 0));
    }

    #[test]
    fn queries_outside_the_halo_fail() {
        let index = columns(0);
        let f = ContinuousField::<u8>::continuous(FieldId(0), "p", &index, &[1.0, 1.0]).unwrap();
        assert!(matches!(
            f.within(&[2.0, 5.5], 1.0, None),
            Err(HaloError::OutsideHalo { .. })
        ));
        assert!(matches!(
            f.nearest(&[2.0], 1, None),
            Err(HaloError::OutsideField { .. })
        ));
    }

    #[test]
    fn particle_survives_the_wire() {
        let p = Particle {
            id: EntityId::new(3, 4),
            offset: Position::from_slice(&[0.25, 1.5]),
            value: 9u32,
        };
        let mut w = ByteWriter::new();
        p.encode(&mut w);
        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        assert_eq!(Particle::<u32>::decode(&mut r).unwrap(), p);
        r.finish().unwrap();
    }
}
