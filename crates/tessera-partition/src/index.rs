//! The spatial partition index and its two-phase mutation protocol.
//!
//! Queries always see the last committed layout. `insert`, `remove`,
//! and `update` only queue changes; [`PartitionIndex::commit`] applies
//! them between the pre-commit and post-commit hooks of every dependent
//! subsystem:
//!
//! 1. the staged layout is built and checked for exact tiling,
//! 2. every hook's `pre_commit` runs against the old layout,
//! 3. the staged layout is installed,
//! 4. every hook's `post_commit` runs against the new layout.
//!
//! Hooks receive the index by shared reference, so a hook cannot commit
//! from inside a commit.

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::{debug, info};

use tessera_comm::Communicator;
use tessera_core::{Coord, GlobalField, LayoutVersion, PartitionId, Rect};

use crate::error::{HookError, IndexError};
use crate::interval::IntervalIndex;

// ── Partition ───────────────────────────────────────────────────

/// One rank's exclusively owned rectangle of the field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    /// Stable partition id.
    pub id: PartitionId,
    /// Owned cells. Always inside the field bounds.
    pub rect: Rect,
    /// Rank that owns the partition.
    pub owner: u32,
}

// ── CommitHook ──────────────────────────────────────────────────

/// A subsystem whose derived state depends on the layout.
///
/// Hooks run synchronously inside [`PartitionIndex::commit`] in the
/// order they are passed. Both methods may use `comm` for collectives;
/// every rank commits the same change set, so every rank runs the same
/// hooks in the same order.
pub trait CommitHook {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Flush anything sized against the current (old) layout.
    fn pre_commit(
        &mut self,
        index: &PartitionIndex,
        comm: &mut dyn Communicator,
    ) -> Result<(), HookError>;

    /// Rebuild derived state against the new layout.
    fn post_commit(
        &mut self,
        index: &PartitionIndex,
        comm: &mut dyn Communicator,
    ) -> Result<(), HookError>;
}

#[derive(Clone, Debug)]
enum Change {
    Insert(Partition),
    Remove(PartitionId),
    Update(Partition),
}

// ── Layout ──────────────────────────────────────────────────────

/// A committed (or staged) layout with its derived query structures.
#[derive(Clone, Debug)]
struct Layout {
    partitions: IndexMap<PartitionId, Partition>,
    axes: Vec<IntervalIndex>,
    neighbours: IndexMap<PartitionId, Vec<PartitionId>>,
    local: PartitionId,
}

impl Layout {
    fn build(
        field: &GlobalField,
        aoi: &[i32],
        rank: u32,
        mut partitions: IndexMap<PartitionId, Partition>,
    ) -> Result<Self, IndexError> {
        partitions.sort_keys();
        verify_tiling(field, partitions.values())?;

        let axes = (0..field.dims())
            .map(|d| {
                IntervalIndex::build(
                    partitions
                        .values()
                        .map(|p| (p.rect.lo()[d], p.rect.hi()[d], p.id)),
                )
            })
            .collect();

        let owned: Vec<PartitionId> = partitions
            .values()
            .filter(|p| p.owner == rank)
            .map(|p| p.id)
            .collect();
        let local = match owned.as_slice() {
            [id] => *id,
            [] => return Err(IndexError::NoLocalPartition { rank }),
            _ => {
                return Err(IndexError::MultipleLocalPartitions {
                    rank,
                    count: owned.len(),
                })
            }
        };

        let mut layout = Self {
            partitions,
            axes,
            neighbours: IndexMap::new(),
            local,
        };

        // Halo rectangles intersect exactly when the owned rectangles are
        // within two AOI margins of each other.
        let reach: Coord = aoi.iter().map(|a| 2 * a).collect();
        let mut neighbours = IndexMap::with_capacity(layout.partitions.len());
        for p in layout.partitions.values() {
            let search = p.rect.expand(&reach);
            let mut found = layout.overlapping_wrapped(field, &search);
            found.retain(|id| *id != p.id);
            neighbours.insert(p.id, found);
        }
        layout.neighbours = neighbours;
        Ok(layout)
    }

    /// Per-axis candidates intersected across axes.
    fn overlapping(&self, r: &Rect) -> Vec<PartitionId> {
        let mut result: Vec<PartitionId> = Vec::new();
        let mut scratch = Vec::new();
        for (d, axis) in self.axes.iter().enumerate() {
            scratch.clear();
            axis.overlapping(r.lo()[d], r.hi()[d], &mut scratch);
            scratch.sort_unstable();
            if d == 0 {
                result.extend_from_slice(&scratch);
            } else {
                result.retain(|id| scratch.binary_search(id).is_ok());
            }
            if result.is_empty() {
                break;
            }
        }
        result
    }

    fn overlapping_wrapped(&self, field: &GlobalField, r: &Rect) -> Vec<PartitionId> {
        let mut out: Vec<PartitionId> = field
            .shifts()
            .iter()
            .flat_map(|s| self.overlapping(&r.shift(s)))
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }
}

/// Check that `partitions` tile `field` exactly: every rectangle is
/// non-empty and inside the field, no two overlap, and together they
/// cover every cell.
pub fn verify_tiling<'a>(
    field: &GlobalField,
    partitions: impl IntoIterator<Item = &'a Partition>,
) -> Result<(), IndexError> {
    let bounds = field.bounds();
    let parts: Vec<&Partition> = partitions.into_iter().collect();
    let mut covered = 0u64;
    for p in &parts {
        if p.rect.dims() != field.dims() {
            return Err(IndexError::DimensionMismatch {
                expected: field.dims(),
                got: p.rect.dims(),
            });
        }
        if p.rect.is_empty() {
            return Err(IndexError::EmptyPartition { id: p.id });
        }
        if !bounds.contains_rect(&p.rect) {
            return Err(IndexError::OutOfField {
                id: p.id,
                rect: p.rect.clone(),
            });
        }
        covered += p.rect.volume();
    }
    for (i, a) in parts.iter().enumerate() {
        for b in &parts[i + 1..] {
            if a.rect.intersects(&b.rect) {
                return Err(IndexError::Overlap { a: a.id, b: b.id });
            }
        }
    }
    let total = field.volume();
    if covered != total {
        return Err(IndexError::Gap { covered, total });
    }
    Ok(())
}

// ── PartitionIndex ──────────────────────────────────────────────

/// Maps points and rectangles to owning partitions and tracks the
/// neighbour topology of the committed layout.
///
/// Owned by exactly one rank; every rank holds an identical replica of
/// the layout, differing only in which partition is local.
#[derive(Clone, Debug)]
pub struct PartitionIndex {
    field: GlobalField,
    aoi: Coord,
    rank: u32,
    layout: Layout,
    pending: Vec<Change>,
    version: LayoutVersion,
}

impl PartitionIndex {
    /// Build an index whose committed layout is `partitions`.
    ///
    /// No hooks exist yet, so the initial layout is installed directly.
    pub fn with_layout(
        field: GlobalField,
        aoi: &[i32],
        rank: u32,
        partitions: impl IntoIterator<Item = Partition>,
    ) -> Result<Self, IndexError> {
        if aoi.len() != field.dims() {
            return Err(IndexError::DimensionMismatch {
                expected: field.dims(),
                got: aoi.len(),
            });
        }
        let mut map = IndexMap::new();
        for p in partitions {
            if map.contains_key(&p.id) {
                return Err(IndexError::DuplicatePartition { id: p.id });
            }
            map.insert(p.id, p);
        }
        let layout = Layout::build(&field, aoi, rank, map)?;
        Ok(Self {
            field,
            aoi: Coord::from_slice(aoi),
            rank,
            layout,
            pending: Vec::new(),
            version: LayoutVersion(0),
        })
    }

    // ── Accessors ───────────────────────────────────────────────

    /// The global field.
    pub fn field(&self) -> &GlobalField {
        &self.field
    }

    /// Area-of-interest margin per dimension.
    pub fn aoi(&self) -> &[i32] {
        &self.aoi
    }

    /// This rank.
    pub fn rank(&self) -> u32 {
        self.rank
    }

    /// Version of the committed layout.
    pub fn version(&self) -> LayoutVersion {
        self.version
    }

    /// Number of partitions in the committed layout.
    pub fn len(&self) -> usize {
        self.layout.partitions.len()
    }

    /// True if the committed layout has no partitions (never the case
    /// for a constructed index).
    pub fn is_empty(&self) -> bool {
        self.layout.partitions.is_empty()
    }

    /// Committed partitions in id order.
    pub fn partitions(&self) -> impl Iterator<Item = &Partition> {
        self.layout.partitions.values()
    }

    /// Look up a committed partition.
    pub fn partition(&self, id: PartitionId) -> Option<&Partition> {
        self.layout.partitions.get(&id)
    }

    /// The partition owned by this rank.
    pub fn local(&self) -> &Partition {
        &self.layout.partitions[&self.layout.local]
    }

    /// Id of the partition owned by this rank.
    pub fn local_id(&self) -> PartitionId {
        self.layout.local
    }

    /// Rank owning partition `id`.
    pub fn owner_rank(&self, id: PartitionId) -> Option<u32> {
        self.partition(id).map(|p| p.owner)
    }

    // ── Queries ─────────────────────────────────────────────────

    /// The unique partition containing `point`, without wraparound.
    ///
    /// Zero or several candidates is a tiling violation.
    pub fn owner_of(&self, point: &[i32]) -> Result<PartitionId, IndexError> {
        self.check_dims(point.len())?;
        let found = self.candidates_at(point);
        exactly_one(point, found.into_vec())
    }

    /// The unique partition containing `point` or any of its toroidal
    /// images.
    pub fn owner_of_wrapped(&self, point: &[i32]) -> Result<PartitionId, IndexError> {
        self.check_dims(point.len())?;
        let mut found: Vec<PartitionId> = Vec::new();
        for s in self.field.shifts() {
            let shifted: Coord = point.iter().zip(s).map(|(x, o)| x + o).collect();
            found.extend(self.candidates_at(&shifted));
        }
        found.sort_unstable();
        found.dedup();
        exactly_one(point, found)
    }

    /// Every partition intersecting `rect`, without wraparound, in id
    /// order.
    pub fn intersecting(&self, rect: &Rect) -> Result<Vec<PartitionId>, IndexError> {
        self.check_dims(rect.dims())?;
        Ok(self.layout.overlapping(rect))
    }

    /// Every partition intersecting `rect` or any of its toroidal
    /// images, in id order.
    pub fn intersecting_wrapped(&self, rect: &Rect) -> Result<Vec<PartitionId>, IndexError> {
        self.check_dims(rect.dims())?;
        Ok(self.layout.overlapping_wrapped(&self.field, rect))
    }

    /// Halo rectangle of `id`: its rectangle expanded by the AOI,
    /// clipped in non-toroidal dimensions only.
    pub fn halo_rect(&self, id: PartitionId) -> Option<Rect> {
        self.partition(id)
            .map(|p| self.field.clip(&p.rect.expand(&self.aoi)))
    }

    /// Neighbours of `id` (halo rectangles intersect, including toroidal
    /// copies), excluding `id` itself, in id order.
    pub fn neighbours(&self, id: PartitionId) -> &[PartitionId] {
        self.layout
            .neighbours
            .get(&id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Neighbours of the local partition.
    pub fn local_neighbours(&self) -> &[PartitionId] {
        self.neighbours(self.layout.local)
    }

    /// True if `point` (or its toroidal image) lies in the local
    /// partition.
    pub fn is_local(&self, point: &[i32]) -> bool {
        self.field
            .wrap(point)
            .is_some_and(|p| self.local().rect.contains(&p))
    }

    fn candidates_at(&self, point: &[i32]) -> SmallVec<[PartitionId; 4]> {
        let r = Rect::new(
            Coord::from_slice(point),
            point.iter().map(|x| x.saturating_add(1)).collect(),
        );
        self.layout.overlapping(&r).into_iter().collect()
    }

    fn check_dims(&self, got: usize) -> Result<(), IndexError> {
        if got != self.field.dims() {
            return Err(IndexError::DimensionMismatch {
                expected: self.field.dims(),
                got,
            });
        }
        Ok(())
    }

    // ── Mutation ────────────────────────────────────────────────

    /// Queue a new partition. Not visible until [`commit()`](Self::commit).
    pub fn insert(&mut self, partition: Partition) {
        self.pending.push(Change::Insert(partition));
    }

    /// Queue removal of a partition.
    pub fn remove(&mut self, id: PartitionId) {
        self.pending.push(Change::Remove(id));
    }

    /// Queue replacement of a partition (remove then insert under the
    /// same id).
    pub fn update(&mut self, partition: Partition) {
        self.pending.push(Change::Update(partition));
    }

    /// Number of queued changes.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Apply every queued change between the pre- and post-commit hooks.
    ///
    /// Returns `Ok(false)` without running any hook when nothing is
    /// queued. A staged layout that does not tile the field is rejected
    /// before any hook runs.
    pub fn commit(
        &mut self,
        hooks: &mut [&mut dyn CommitHook],
        comm: &mut dyn Communicator,
    ) -> Result<bool, IndexError> {
        if self.pending.is_empty() {
            return Ok(false);
        }
        let changes = std::mem::take(&mut self.pending);
        let change_count = changes.len();
        let staged = self.stage(changes)?;

        for hook in hooks.iter_mut() {
            debug!(rank = self.rank, hook = hook.name(), "pre-commit");
            hook.pre_commit(self, comm).map_err(|source| IndexError::Hook {
                hook: hook.name().to_string(),
                stage: "pre",
                source,
            })?;
        }

        self.layout = staged;
        self.version = LayoutVersion(self.version.0 + 1);
        info!(
            rank = self.rank,
            version = %self.version,
            changes = change_count,
            local = %self.local().rect,
            "layout committed"
        );

        for hook in hooks.iter_mut() {
            debug!(rank = self.rank, hook = hook.name(), "post-commit");
            hook.post_commit(self, comm).map_err(|source| IndexError::Hook {
                hook: hook.name().to_string(),
                stage: "post",
                source,
            })?;
        }
        Ok(true)
    }

    fn stage(&self, changes: Vec<Change>) -> Result<Layout, IndexError> {
        let mut parts = self.layout.partitions.clone();
        for change in changes {
            match change {
                Change::Insert(p) => {
                    if parts.contains_key(&p.id) {
                        return Err(IndexError::DuplicatePartition { id: p.id });
                    }
                    parts.insert(p.id, p);
                }
                Change::Remove(id) => {
                    if parts.shift_remove(&id).is_none() {
                        return Err(IndexError::UnknownPartition { id });
                    }
                }
                Change::Update(p) => {
                    if parts.shift_remove(&p.id).is_none() {
                        return Err(IndexError::UnknownPartition { id: p.id });
                    }
                    parts.insert(p.id, p);
                }
            }
        }
        Layout::build(&self.field, &self.aoi, self.rank, parts)
    }
}

fn exactly_one(point: &[i32], found: Vec<PartitionId>) -> Result<PartitionId, IndexError> {
    match found.as_slice() {
        [id] => Ok(*id),
        _ => Err(IndexError::TilingViolation {
            point: Coord::from_slice(point),
            found,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_comm::{LocalCluster, LocalComm};

    fn rect(lo: &[i32], hi: &[i32]) -> Rect {
        Rect::new(Coord::from_slice(lo), Coord::from_slice(hi))
    }

    fn part(id: u32, lo: &[i32], hi: &[i32]) -> Partition {
        Partition {
            id: PartitionId(id),
            rect: rect(lo, hi),
            owner: id,
        }
    }

    fn quadrants() -> Vec<Partition> {
        vec![
            part(0, &[0, 0], &[50, 50]),
            part(1, &[0, 50], &[50, 100]),
            part(2, &[50, 0], &[100, 50]),
            part(3, &[50, 50], &[100, 100]),
        ]
    }

    fn torus() -> GlobalField {
        GlobalField::new(&[100, 100], &[true, true]).unwrap()
    }

    fn solo_comm() -> LocalComm {
        LocalCluster::new(1).remove(0)
    }

    #[test]
    fn owner_of_respects_boundaries() {
        let idx = PartitionIndex::with_layout(torus(), &[1, 1], 0, quadrants()).unwrap();
        assert_eq!(idx.owner_of(&[49, 49]).unwrap(), PartitionId(0));
        assert_eq!(idx.owner_of(&[49, 50]).unwrap(), PartitionId(1));
        assert_eq!(idx.owner_of(&[50, 49]).unwrap(), PartitionId(2));
        assert_eq!(idx.owner_of(&[99, 99]).unwrap(), PartitionId(3));
    }

    #[test]
    fn unwrapped_query_outside_field_is_a_violation() {
        let idx = PartitionIndex::with_layout(torus(), &[1, 1], 0, quadrants()).unwrap();
        match idx.owner_of(&[-1, 10]) {
            Err(IndexError::TilingViolation { found, .. }) => assert!(found.is_empty()),
            other => panic!("expected TilingViolation, got {other:?}"),
        }
        assert_eq!(idx.owner_of_wrapped(&[-1, 10]).unwrap(), PartitionId(2));
        assert_eq!(idx.owner_of_wrapped(&[100, 100]).unwrap(), PartitionId(0));
    }

    #[test]
    fn toroidal_quadrants_are_all_mutual_neighbours() {
        let idx = PartitionIndex::with_layout(torus(), &[1, 1], 0, quadrants()).unwrap();
        assert_eq!(
            idx.local_neighbours(),
            &[PartitionId(1), PartitionId(2), PartitionId(3)]
        );
        for p in idx.partitions() {
            for n in idx.neighbours(p.id) {
                assert!(idx.neighbours(*n).contains(&p.id), "neighbours are symmetric");
            }
        }
    }

    #[test]
    fn non_toroidal_strip_has_no_wrap_neighbour() {
        let field = GlobalField::new(&[30], &[false]).unwrap();
        let parts = vec![
            part(0, &[0], &[10]),
            part(1, &[10], &[20]),
            part(2, &[20], &[30]),
        ];
        let idx = PartitionIndex::with_layout(field.clone(), &[1], 0, parts.clone()).unwrap();
        assert_eq!(idx.local_neighbours(), &[PartitionId(1)]);

        let wrapped = GlobalField::new(&[30], &[true]).unwrap();
        let idx = PartitionIndex::with_layout(wrapped, &[1], 0, parts).unwrap();
        assert_eq!(idx.local_neighbours(), &[PartitionId(1), PartitionId(2)]);
    }

    #[test]
    fn halo_rect_clips_only_flat_dims() {
        let field = GlobalField::new(&[100, 100], &[true, false]).unwrap();
        let idx = PartitionIndex::with_layout(field, &[2, 2], 0, quadrants()).unwrap();
        assert_eq!(
            idx.halo_rect(PartitionId(0)).unwrap(),
            rect(&[-2, 0], &[52, 52])
        );
    }

    #[test]
    fn wrapped_range_query_catches_seam() {
        let idx = PartitionIndex::with_layout(torus(), &[1, 1], 0, quadrants()).unwrap();
        let r = rect(&[-1, 10], &[1, 20]);
        assert_eq!(idx.intersecting(&r).unwrap(), vec![PartitionId(0)]);
        assert_eq!(
            idx.intersecting_wrapped(&r).unwrap(),
            vec![PartitionId(0), PartitionId(2)]
        );
    }

    #[test]
    fn overlapping_layout_is_rejected() {
        let mut parts = quadrants();
        parts[0].rect = rect(&[0, 0], &[51, 50]);
        match PartitionIndex::with_layout(torus(), &[1, 1], 0, parts) {
            Err(IndexError::Overlap { a, b }) => {
                assert_eq!((a, b), (PartitionId(0), PartitionId(2)));
            }
            other => panic!("expected Overlap, got {other:?}"),
        }
    }

    #[test]
    fn gap_in_layout_is_rejected() {
        let mut parts = quadrants();
        parts.pop();
        match PartitionIndex::with_layout(torus(), &[1, 1], 0, parts) {
            Err(IndexError::Gap { covered, total }) => {
                assert_eq!((covered, total), (7500, 10000));
            }
            other => panic!("expected Gap, got {other:?}"),
        }
    }

    #[test]
    fn rank_without_partition_is_rejected() {
        match PartitionIndex::with_layout(torus(), &[1, 1], 7, quadrants()) {
            Err(IndexError::NoLocalPartition { rank: 7 }) => {}
            other => panic!("expected NoLocalPartition, got {other:?}"),
        }
    }

    // ── Commit protocol ─────────────────────────────────────────

    #[derive(Default)]
    struct Recorder {
        name: &'static str,
        log: Vec<String>,
    }

    impl CommitHook for Recorder {
        fn name(&self) -> &str {
            self.name
        }
        fn pre_commit(
            &mut self,
            index: &PartitionIndex,
            _comm: &mut dyn Communicator,
        ) -> Result<(), HookError> {
            self.log.push(format!("{} pre {}", self.name, index.local().rect));
            Ok(())
        }
        fn post_commit(
            &mut self,
            index: &PartitionIndex,
            _comm: &mut dyn Communicator,
        ) -> Result<(), HookError> {
            self.log.push(format!("{} post {}", self.name, index.local().rect));
            Ok(())
        }
    }

    fn strip_index() -> PartitionIndex {
        let field = GlobalField::new(&[20], &[false]).unwrap();
        PartitionIndex::with_layout(
            field,
            &[1],
            0,
            vec![part(0, &[0], &[10]), part(1, &[10], &[20])],
        )
        .unwrap()
    }

    #[test]
    fn queued_changes_are_invisible_until_commit() {
        let mut idx = strip_index();
        idx.update(part(0, &[0], &[12]));
        idx.update(part(1, &[12], &[20]));
        assert_eq!(idx.pending(), 2);
        assert_eq!(idx.owner_of(&[11]).unwrap(), PartitionId(1));

        let mut comm = solo_comm();
        assert!(idx.commit(&mut [], &mut comm).unwrap());
        assert_eq!(idx.owner_of(&[11]).unwrap(), PartitionId(0));
        assert_eq!(idx.version(), LayoutVersion(1));
        assert_eq!(idx.pending(), 0);
    }

    #[test]
    fn hooks_see_old_layout_before_and_new_after() {
        let mut idx = strip_index();
        idx.update(part(0, &[0], &[12]));
        idx.update(part(1, &[12], &[20]));

        let mut halo = Recorder {
            name: "halo",
            ..Default::default()
        };
        let mut migrator = Recorder {
            name: "migrator",
            ..Default::default()
        };
        let mut comm = solo_comm();
        idx.commit(&mut [&mut halo, &mut migrator], &mut comm)
            .unwrap();
        assert_eq!(
            halo.log,
            vec!["halo pre [[0]..[10])", "halo post [[0]..[12])"]
        );
        assert_eq!(
            migrator.log,
            vec!["migrator pre [[0]..[10])", "migrator post [[0]..[12])"]
        );
    }

    #[test]
    fn empty_commit_runs_no_hooks() {
        let mut idx = strip_index();
        let mut hook = Recorder {
            name: "halo",
            ..Default::default()
        };
        let mut comm = solo_comm();
        assert!(!idx.commit(&mut [&mut hook], &mut comm).unwrap());
        assert!(hook.log.is_empty());
        assert_eq!(idx.version(), LayoutVersion(0));
    }

    #[test]
    fn invalid_staged_layout_runs_no_hooks() {
        let mut idx = strip_index();
        idx.update(part(0, &[0], &[12]));
        let mut hook = Recorder {
            name: "halo",
            ..Default::default()
        };
        let mut comm = solo_comm();
        match idx.commit(&mut [&mut hook], &mut comm) {
            Err(IndexError::Overlap { .. }) => {}
            other => panic!("expected Overlap, got {other:?}"),
        }
        assert!(hook.log.is_empty());
        assert_eq!(idx.local().rect, rect(&[0], &[10]));
    }

    #[test]
    fn remove_then_insert_replaces_partition() {
        let mut idx = strip_index();
        idx.remove(PartitionId(1));
        idx.insert(Partition {
            id: PartitionId(5),
            rect: rect(&[10], &[20]),
            owner: 1,
        });
        let mut comm = solo_comm();
        idx.commit(&mut [], &mut comm).unwrap();
        assert_eq!(idx.owner_of(&[15]).unwrap(), PartitionId(5));
        assert_eq!(idx.local_neighbours(), &[PartitionId(5)]);
    }

    #[test]
    fn updating_unknown_partition_fails() {
        let mut idx = strip_index();
        idx.update(part(9, &[0], &[1]));
        let mut comm = solo_comm();
        match idx.commit(&mut [], &mut comm) {
            Err(IndexError::UnknownPartition { id }) => assert_eq!(id, PartitionId(9)),
            other => panic!("expected UnknownPartition, got {other:?}"),
        }
    }

    struct Failing;

    impl CommitHook for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn pre_commit(
            &mut self,
            _index: &PartitionIndex,
            _comm: &mut dyn Communicator,
        ) -> Result<(), HookError> {
            Ok(())
        }
        fn post_commit(
            &mut self,
            _index: &PartitionIndex,
            _comm: &mut dyn Communicator,
        ) -> Result<(), HookError> {
            Err(HookError::Failed {
                reason: "cannot reshape".into(),
            })
        }
    }

    #[test]
    fn hook_failure_names_the_hook() {
        let mut idx = strip_index();
        idx.update(part(0, &[0], &[12]));
        idx.update(part(1, &[12], &[20]));
        let mut comm = solo_comm();
        match idx.commit(&mut [&mut Failing], &mut comm) {
            Err(IndexError::Hook { hook, stage, .. }) => {
                assert_eq!(hook, "failing");
                assert_eq!(stage, "post");
            }
            other => panic!("expected Hook error, got {other:?}"),
        }
    }
}
