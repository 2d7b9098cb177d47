//! Weight-proportional rebalancing of the quad tree.
//!
//! Each round:
//!
//! 1. For every ancestor of its leaf, deepest first, a rank exchanges its
//!    weight with the other ranks under that node (a group collective
//!    scoped to the subtree).
//! 2. Level by level from the root, each node's master compares, per
//!    split axis, the low side's share of the weight against its share
//!    of the ranks. Axes within the tolerance are left alone; otherwise
//!    the split moves to where the low side's estimated weight equals
//!    `W * P_lo / P`, assuming weight is spread uniformly inside each
//!    side.
//! 3. The level's proposals are all-gathered and applied by every rank,
//!    so the replicated trees stay identical, before the next level is
//!    proposed against the moved rectangles. A proposal that would leave
//!    a leaf below the minimum extent is rejected.
//! 4. Leaves whose rectangle changed are queued as index updates; the
//!    caller commits them through the two-phase protocol.

use tracing::{debug, info, warn};

use tessera_comm::Communicator;
use tessera_core::{ByteReader, ByteWriter, Coord, PartitionId, Wire};

use crate::error::BalanceError;
use crate::index::PartitionIndex;
use crate::quadtree::{NodeId, QuadTree};

/// Summary of one rebalancing round.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RebalanceReport {
    /// Proposals published by all masters.
    pub proposals: usize,
    /// Proposals applied to the tree.
    pub applied: usize,
    /// Proposals rejected for violating the minimum extent.
    pub rejected: usize,
    /// Partitions whose rectangle changed (queued as index updates).
    pub changed: Vec<PartitionId>,
}

/// Moves quad-tree split points towards weight-proportional shares.
#[derive(Clone, Debug)]
pub struct Rebalancer {
    tolerance: f64,
}

impl Rebalancer {
    /// A rebalancer that ignores imbalances of at most `tolerance`
    /// (as a fraction of the subtree weight).
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    /// Tolerance below which a subtree counts as balanced.
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Run one collective round. Every rank must call this with its own
    /// weight in the same tick.
    pub fn rebalance(
        &self,
        tree: &mut QuadTree,
        index: &mut PartitionIndex,
        weight: f64,
        comm: &mut dyn Communicator,
    ) -> Result<RebalanceReport, BalanceError> {
        let rank = comm.rank();
        if !weight.is_finite() || weight < 0.0 {
            return Err(BalanceError::InvalidWeight { rank, weight });
        }
        if tree.leaves().len() != comm.size() as usize {
            return Err(BalanceError::LeafCountMismatch {
                leaves: tree.leaves().len(),
                ranks: comm.size(),
            });
        }
        let leaf = tree
            .leaf_of_rank(rank)
            .ok_or(BalanceError::LeafCountMismatch {
                leaves: tree.leaves().len(),
                ranks: comm.size(),
            })?;

        // 1. Subtree weight exchanges, deepest ancestor first.
        let mut mastered: Vec<(NodeId, Vec<f64>)> = Vec::new();
        for node in tree.ancestors(leaf) {
            let group: Vec<u32> = tree.subtree_ranks(node).collect();
            let sends = vec![weight.to_le_bytes().to_vec(); group.len()];
            let received = comm.group_exchange(&group, sends)?;
            let mut weights = Vec::with_capacity(received.len());
            for (buf, &peer) in received.iter().zip(&group) {
                let mut r = ByteReader::new(buf);
                let w = r.read_f64_le()?;
                r.finish()?;
                if !w.is_finite() || w < 0.0 {
                    return Err(BalanceError::InvalidWeight {
                        rank: peer,
                        weight: w,
                    });
                }
                weights.push(w);
            }
            if tree.master(node) == rank {
                mastered.push((node, weights));
            }
        }

        // 2-3. Propose, publish and apply one level at a time.
        let before = tree.partitions();
        let mut report = RebalanceReport::default();
        for level in 0..tree.depth() {
            let mut mine: Vec<(NodeId, Coord)> = Vec::new();
            for (node, weights) in &mastered {
                if tree.level(*node) != level {
                    continue;
                }
                if let Some(origin) = self.propose(tree, *node, weights) {
                    debug!(rank, %node, ?origin, "proposing split move");
                    mine.push((*node, origin));
                }
            }
            let mut proposals = exchange_proposals(&mine, comm)?;
            proposals.sort_by_key(|(node, _)| *node);
            report.proposals += proposals.len();
            for (node, origin) in &proposals {
                match tree.move_origin(*node, origin) {
                    Ok(()) => report.applied += 1,
                    Err(BalanceError::BelowMinimumExtent { .. }) => {
                        warn!(rank, %node, ?origin, "rebalance proposal below minimum extent; rejected");
                        report.rejected += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        // 4. Queue the changed leaves.
        for (old, new) in before.iter().zip(tree.partitions()) {
            if old.rect != new.rect {
                report.changed.push(new.id);
                index.update(new);
            }
        }
        if !report.changed.is_empty() {
            info!(
                rank,
                applied = report.applied,
                rejected = report.rejected,
                changed = report.changed.len(),
                "rebalance queued"
            );
        }
        Ok(report)
    }

    /// New origin for `node`, or `None` if it is balanced on every axis.
    /// `weights[i]` is the weight of rank `subtree_ranks(node).start + i`.
    fn propose(&self, tree: &QuadTree, node: NodeId, weights: &[f64]) -> Option<Coord> {
        let rect = tree.rect(node)?;
        let origin = tree.origin(node)?;
        let base = tree.subtree_ranks(node).start;
        let children = tree.children(node);

        let child_stats: Vec<(f64, f64)> = children
            .iter()
            .map(|&c| {
                let span = tree.subtree_ranks(c);
                let w: f64 = span
                    .clone()
                    .map(|r| weights[(r - base) as usize])
                    .sum();
                (w, span.len() as f64)
            })
            .collect();
        let total_w: f64 = child_stats.iter().map(|s| s.0).sum();
        let total_p: f64 = child_stats.iter().map(|s| s.1).sum();
        if total_w <= 0.0 || total_p <= 0.0 {
            return None;
        }

        let axes = tree.axes(node);
        let mut proposed = Coord::from_slice(origin);
        let mut moved = false;
        for d in (0..rect.dims()).filter(|d| axes & (1 << d) != 0) {
            let (mut w_lo, mut p_lo) = (0.0, 0.0);
            for (idx, &(w, p)) in child_stats.iter().enumerate() {
                if tree.child_sides(node, idx) & (1 << d) == 0 {
                    w_lo += w;
                    p_lo += p;
                }
            }
            let share = p_lo / total_p;
            if (w_lo / total_w - share).abs() <= self.tolerance {
                continue;
            }
            let target = total_w * share;
            let (lo, o, hi) = (rect.lo()[d] as f64, origin[d] as f64, rect.hi()[d] as f64);
            let x = if target <= w_lo {
                lo + (o - lo) * target / w_lo
            } else {
                o + (hi - o) * (target - w_lo) / (total_w - w_lo)
            };
            let x = x.round() as i32;
            if x != origin[d] {
                proposed[d] = x;
                moved = true;
            }
        }
        moved.then_some(proposed)
    }
}

/// All-gather every master's proposals for one level.
fn exchange_proposals(
    mine: &[(NodeId, Coord)],
    comm: &mut dyn Communicator,
) -> Result<Vec<(NodeId, Coord)>, BalanceError> {
    let mut w = ByteWriter::new();
    w.write_u32_le(mine.len() as u32);
    for (node, origin) in mine {
        w.write_u32_le(node.0);
        origin.encode(&mut w);
    }
    let gathered = comm.all_gather(w.into_bytes())?;
    let mut proposals = Vec::new();
    for buf in &gathered {
        let mut r = ByteReader::new(buf);
        let count = r.read_u32_le()?;
        for _ in 0..count {
            let node = NodeId(r.read_u32_le()?);
            proposals.push((node, Coord::decode(&mut r)?));
        }
        r.finish()?;
    }
    Ok(proposals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_comm::run_local;
    use tessera_core::{GlobalField, Rect};

    fn field() -> GlobalField {
        GlobalField::new(&[100, 100], &[true, true]).unwrap()
    }

    fn setup(rank: u32, ranks: u32) -> (QuadTree, PartitionIndex) {
        let f = field();
        let tree = QuadTree::uniform(f.bounds(), &[1, 1], ranks).unwrap();
        let index = PartitionIndex::with_layout(f, &[1, 1], rank, tree.partitions()).unwrap();
        (tree, index)
    }

    #[test]
    fn balanced_weights_propose_nothing() {
        let reports = run_local(4, |mut comm| {
            let (mut tree, mut index) = setup(comm.rank(), 4);
            Rebalancer::new(0.05)
                .rebalance(&mut tree, &mut index, 10.0, &mut comm)
                .unwrap()
        });
        for r in reports {
            assert_eq!(r, RebalanceReport::default());
        }
    }

    #[test]
    fn heavy_low_corner_pulls_split_towards_it() {
        let results = run_local(4, |mut comm| {
            let (mut tree, mut index) = setup(comm.rank(), 4);
            // Rank 0 (low x, low y) carries three times the load.
            let weight = if comm.rank() == 0 { 30.0 } else { 10.0 };
            let report = Rebalancer::new(0.05)
                .rebalance(&mut tree, &mut index, weight, &mut comm)
                .unwrap();
            index.commit(&mut [], &mut comm).unwrap();
            (report, index.local().rect.clone(), tree.origin(tree.root()).map(Coord::from_slice))
        });
        let origin = results[0].2.clone().unwrap();
        for (report, _, o) in &results {
            assert_eq!(report.proposals, 1);
            assert_eq!(report.applied, 1);
            assert_eq!(report.changed.len(), 4);
            assert_eq!(o.as_ref(), Some(&origin), "replicated trees agree");
        }
        // Low side weight 40 of 60 against a rank share of one half: the
        // split moves to 30/40 of the way across the low half.
        assert_eq!(origin.as_slice(), &[38, 38]);
        assert_eq!(
            results[0].1,
            Rect::new(Coord::from_slice(&[0, 0]), Coord::from_slice(&[38, 38]))
        );
    }

    #[test]
    fn child_splits_follow_the_moved_parent() {
        let results = run_local(16, |mut comm| {
            let (mut tree, mut index) = setup(comm.rank(), 16);
            let weight = match comm.rank() {
                0 => 50.0,
                12 => 20.0,
                _ => 10.0,
            };
            let report = Rebalancer::new(0.05)
                .rebalance(&mut tree, &mut index, weight, &mut comm)
                .unwrap();
            let origin = |n: NodeId| tree.origin(n).map(Coord::from_slice);
            let kids = tree.children(tree.root()).to_vec();
            (report, origin(tree.root()), origin(kids[0]), origin(kids[3]))
        });
        for (report, root, low, high) in &results {
            assert_eq!((report.proposals, report.applied, report.rejected), (3, 3, 0));
            assert_eq!(root.as_deref(), Some(&[44, 44][..]));
            assert_eq!(low.as_deref(), Some(&[17, 17][..]));
            // The upper quadrant now starts at 44, not 50; its split is
            // placed within the moved rectangle.
            assert_eq!(high.as_deref(), Some(&[70, 70][..]));
        }
    }

    #[test]
    fn binary_split_moves_along_its_one_axis() {
        let results = run_local(2, |mut comm| {
            let (mut tree, mut index) = setup(comm.rank(), 2);
            let weight = if comm.rank() == 0 { 30.0 } else { 10.0 };
            let report = Rebalancer::new(0.05)
                .rebalance(&mut tree, &mut index, weight, &mut comm)
                .unwrap();
            (report, tree.partitions())
        });
        for (report, parts) in &results {
            assert_eq!(report.applied, 1);
            // 30 of 40 on the low side against half the ranks.
            assert_eq!(
                parts[0].rect,
                Rect::new(Coord::from_slice(&[0, 0]), Coord::from_slice(&[33, 100]))
            );
        }
    }

    #[test]
    fn proposal_below_minimum_extent_is_rejected() {
        let reports = run_local(4, |mut comm| {
            let f = field();
            let mut tree = QuadTree::uniform(f.bounds(), &[45, 45], 4).unwrap();
            let mut index =
                PartitionIndex::with_layout(f, &[1, 1], comm.rank(), tree.partitions()).unwrap();
            let weight = if comm.rank() == 0 { 100.0 } else { 1.0 };
            let report = Rebalancer::new(0.05)
                .rebalance(&mut tree, &mut index, weight, &mut comm)
                .unwrap();
            (report, index.pending())
        });
        for (report, pending) in reports {
            assert_eq!(report.proposals, 1);
            assert_eq!(report.rejected, 1);
            assert!(report.changed.is_empty());
            assert_eq!(pending, 0);
        }
    }

    #[test]
    fn negative_weight_is_rejected_locally() {
        let mut comms = tessera_comm::LocalCluster::new(1);
        let mut comm = comms.remove(0);
        let (mut tree, mut index) = setup(0, 1);
        match Rebalancer::new(0.1).rebalance(&mut tree, &mut index, -1.0, &mut comm) {
            Err(BalanceError::InvalidWeight { rank: 0, .. }) => {}
            other => panic!("expected InvalidWeight, got {other:?}"),
        }
    }
}
