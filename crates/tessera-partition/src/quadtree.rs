//! Recursive split tree producing partition layouts.
//!
//! Every internal node splits its rectangle at an *origin* point along a
//! subset of the axes (its *split mask*), giving `2^k` children for `k`
//! split axes. Child `i` takes the upper half along the `j`-th split axis
//! when bit `j` of `i` is set; along the other axes it spans the whole
//! parent. A full split on every axis is a quad tree in 2-D, a single
//! axis a binary split. Leaves are numbered in depth-first order
//! and leaf `k` becomes partition `k`, owned by rank `k`. Because of the
//! depth-first numbering, the ranks under any node form a contiguous
//! range, and the node's *master* is the first of them.
//!
//! Every rank holds an identical replica of the tree; it only changes
//! through operations every rank applies in the same order.

use std::fmt;
use std::ops::Range;

use smallvec::SmallVec;

use tessera_core::{Coord, PartitionId, Rect};

use crate::error::BalanceError;
use crate::index::Partition;

/// Index of a node in the tree's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {}", self.0)
    }
}

#[derive(Clone, Debug)]
struct Node {
    rect: Rect,
    /// Split point; `Some` exactly for internal nodes.
    origin: Option<Coord>,
    /// Bit `d` set when the node is split along dimension `d`.
    axes: u32,
    parent: Option<NodeId>,
    children: SmallVec<[NodeId; 4]>,
    level: u32,
    /// Leaf ranks under this node.
    span: Range<u32>,
}

/// Arena-backed split tree.
#[derive(Clone, Debug)]
pub struct QuadTree {
    nodes: Vec<Node>,
    min_extent: Coord,
    leaves: Vec<NodeId>,
}

impl QuadTree {
    /// A single-leaf tree covering `bounds`. No split may leave a child
    /// narrower than `min_extent[d]` (or one cell) along dimension `d`.
    pub fn new(bounds: Rect, min_extent: &[i32]) -> Self {
        let mut tree = Self {
            nodes: vec![Node {
                rect: bounds,
                origin: None,
                axes: 0,
                parent: None,
                children: SmallVec::new(),
                level: 0,
                span: 0..1,
            }],
            min_extent: Coord::from_slice(min_extent),
            leaves: Vec::new(),
        };
        tree.renumber();
        tree
    }

    /// A full tree with one leaf per rank, every node split at its
    /// centre. `ranks` must be a power of two.
    ///
    /// Each level splits every leaf along as many axes as the remaining
    /// factor of two allows (all of them while it can), picking the
    /// widest axes first. Four ranks in 2-D give quadrants; two give
    /// halves along the first axis.
    pub fn uniform(bounds: Rect, min_extent: &[i32], ranks: u32) -> Result<Self, BalanceError> {
        if !ranks.is_power_of_two() {
            return Err(BalanceError::UnsupportedRankCount { ranks });
        }
        let dims = bounds.dims() as u32;
        let mut remaining = ranks.trailing_zeros();
        let mut tree = Self::new(bounds, min_extent);
        while remaining > 0 {
            let k = remaining.min(dims);
            for leaf in tree.leaves.clone() {
                let rect = tree.node(leaf)?.rect.clone();
                let mut widest: Vec<usize> = (0..rect.dims()).collect();
                widest.sort_by_key(|&d| (std::cmp::Reverse(rect.extent(d)), d));
                let axes = widest[..k as usize].iter().fold(0u32, |m, &d| m | 1 << d);
                tree.split_axes(leaf, &rect.center(), axes)?;
            }
            remaining -= k;
        }
        Ok(tree)
    }

    /// Build a tree by splitting, for each point in turn, the leaf that
    /// contains it at that point.
    pub fn from_split_points(
        bounds: Rect,
        min_extent: &[i32],
        points: &[Coord],
    ) -> Result<Self, BalanceError> {
        let mut tree = Self::new(bounds, min_extent);
        for p in points {
            let leaf = tree.leaf_at(p)?;
            tree.split(leaf, p)?;
        }
        Ok(tree)
    }

    // ── Structure ───────────────────────────────────────────────

    /// Split leaf `node` at `origin` into `2^d` children, one per
    /// combination of sides on every axis.
    pub fn split(&mut self, node: NodeId, origin: &[i32]) -> Result<(), BalanceError> {
        let all = (1u32 << origin.len()) - 1;
        self.split_axes(node, origin, all)
    }

    /// Split leaf `node` at `origin` along the axes set in `axes` only.
    /// Coordinates of `origin` on the other axes are ignored.
    pub fn split_axes(
        &mut self,
        node: NodeId,
        origin: &[i32],
        axes: u32,
    ) -> Result<(), BalanceError> {
        let n = self.node(node)?;
        if n.origin.is_some() {
            return Err(BalanceError::NotALeaf { node });
        }
        let rect = n.rect.clone();
        let level = n.level + 1;
        let axes = axes & ((1u32 << rect.dims()) - 1);
        if axes == 0 || !self.origin_fits(&rect, origin, axes) {
            return Err(BalanceError::BelowMinimumExtent {
                node,
                origin: Coord::from_slice(origin),
            });
        }
        // Unsplit axes carry the centre so replicas store identical origins.
        let mut origin = Coord::from_slice(origin);
        let centre = rect.center();
        for d in 0..rect.dims() {
            if axes & (1 << d) == 0 {
                origin[d] = centre[d];
            }
        }
        let fanout = 1usize << axes.count_ones();
        let mut children = SmallVec::with_capacity(fanout);
        for idx in 0..fanout {
            let id = NodeId(self.nodes.len() as u32);
            self.nodes.push(Node {
                rect: child_rect(&rect, &origin, axes, side_bits(axes, idx)),
                origin: None,
                axes: 0,
                parent: Some(node),
                children: SmallVec::new(),
                level,
                span: 0..0,
            });
            children.push(id);
        }
        let n = &mut self.nodes[node.0 as usize];
        n.origin = Some(origin);
        n.axes = axes;
        n.children = children;
        self.renumber();
        Ok(())
    }

    /// Move the split point of internal node `node`.
    ///
    /// Descendant rectangles are recomputed; a descendant whose own
    /// origin falls outside its new rectangle is re-centred. The move is
    /// rejected (and the tree left untouched) if any resulting leaf
    /// would fall below the minimum extent.
    pub fn move_origin(&mut self, node: NodeId, origin: &[i32]) -> Result<(), BalanceError> {
        let n = self.node(node)?;
        if n.origin.is_none() {
            return Err(BalanceError::NotInternal { node });
        }
        let rejected = || BalanceError::BelowMinimumExtent {
            node,
            origin: Coord::from_slice(origin),
        };
        if !self.origin_fits(&n.rect, origin, n.axes) {
            return Err(rejected());
        }
        let mut moved = Coord::from_slice(origin);
        let centre = n.rect.center();
        for d in (0..centre.len()).filter(|d| n.axes & (1 << d) == 0) {
            moved[d] = centre[d];
        }
        let mut staged = self.nodes.clone();
        staged[node.0 as usize].origin = Some(moved);
        relayout(&mut staged, node);
        let fits = self.subtree_leaves(node).all(|leaf| {
            let r = &staged[leaf.0 as usize].rect;
            (0..r.dims()).all(|d| r.extent(d) >= self.min_extent_of(d))
        });
        if !fits {
            return Err(rejected());
        }
        self.nodes = staged;
        Ok(())
    }

    fn origin_fits(&self, rect: &Rect, origin: &[i32], axes: u32) -> bool {
        origin.len() == rect.dims()
            && (0..rect.dims()).filter(|d| axes & (1 << d) != 0).all(|d| {
                let min = self.min_extent_of(d);
                origin[d] - rect.lo()[d] >= min && rect.hi()[d] - origin[d] >= min
            })
    }

    fn min_extent_of(&self, d: usize) -> i32 {
        self.min_extent.get(d).copied().unwrap_or(0).max(1)
    }

    /// Recompute depth-first leaf order and per-node rank spans.
    fn renumber(&mut self) {
        self.leaves.clear();
        let mut next = 0u32;
        self.number(NodeId(0), &mut next);
    }

    fn number(&mut self, node: NodeId, next: &mut u32) {
        let start = *next;
        let children = self.nodes[node.0 as usize].children.clone();
        if children.is_empty() {
            self.leaves.push(node);
            *next += 1;
        } else {
            for c in children {
                self.number(c, next);
            }
        }
        self.nodes[node.0 as usize].span = start..*next;
    }

    // ── Queries ─────────────────────────────────────────────────

    fn node(&self, node: NodeId) -> Result<&Node, BalanceError> {
        self.nodes
            .get(node.0 as usize)
            .ok_or(BalanceError::UnknownNode { node })
    }

    /// The root node.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Rectangle covered by `node`.
    pub fn rect(&self, node: NodeId) -> Option<&Rect> {
        self.nodes.get(node.0 as usize).map(|n| &n.rect)
    }

    /// Split point of an internal node.
    pub fn origin(&self, node: NodeId) -> Option<&[i32]> {
        self.nodes
            .get(node.0 as usize)
            .and_then(|n| n.origin.as_deref())
    }

    /// Split mask of `node`: bit `d` is set when it splits along
    /// dimension `d`. Zero for a leaf.
    pub fn axes(&self, node: NodeId) -> u32 {
        self.nodes.get(node.0 as usize).map_or(0, |n| n.axes)
    }

    /// Sides taken by child `idx` of `node`: bit `d` is set when the
    /// child lies on the upper side of the split along dimension `d`.
    pub fn child_sides(&self, node: NodeId, idx: usize) -> u32 {
        side_bits(self.axes(node), idx)
    }

    /// Children of `node` in child-index order (empty for a leaf).
    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node.0 as usize)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Parent of `node` (`None` for the root).
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0 as usize).and_then(|n| n.parent)
    }

    /// Depth of `node`; the root is level 0.
    pub fn level(&self, node: NodeId) -> u32 {
        self.nodes.get(node.0 as usize).map_or(0, |n| n.level)
    }

    /// True if `node` has no children.
    pub fn is_leaf(&self, node: NodeId) -> bool {
        self.children(node).is_empty()
    }

    /// Leaves in depth-first order; leaf `k` belongs to rank `k`.
    pub fn leaves(&self) -> &[NodeId] {
        &self.leaves
    }

    /// The leaf owned by `rank`.
    pub fn leaf_of_rank(&self, rank: u32) -> Option<NodeId> {
        self.leaves.get(rank as usize).copied()
    }

    /// Ranks owning the leaves under `node`.
    pub fn subtree_ranks(&self, node: NodeId) -> Range<u32> {
        self.nodes
            .get(node.0 as usize)
            .map_or(0..0, |n| n.span.clone())
    }

    /// Rank that speaks for `node`'s subtree: the owner of its first leaf.
    pub fn master(&self, node: NodeId) -> u32 {
        self.subtree_ranks(node).start
    }

    /// Ancestors of `node`, nearest first, ending at the root.
    pub fn ancestors(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cur = self.parent(node);
        while let Some(p) = cur {
            out.push(p);
            cur = self.parent(p);
        }
        out
    }

    /// The leaf whose rectangle contains `point`.
    pub fn leaf_at(&self, point: &[i32]) -> Result<NodeId, BalanceError> {
        let outside = || BalanceError::OutsideTree {
            point: Coord::from_slice(point),
        };
        let mut cur = self.root();
        if !self.nodes[0].rect.contains(point) {
            return Err(outside());
        }
        while let Some(origin) = self.origin(cur) {
            let axes = self.axes(cur);
            let idx = (0..point.len())
                .filter(|d| axes & (1 << d) != 0)
                .enumerate()
                .fold(0usize, |acc, (j, d)| acc | (usize::from(point[d] >= origin[d]) << j));
            cur = *self.children(cur).get(idx).ok_or_else(outside)?;
        }
        Ok(cur)
    }

    /// Leaves under `node` in depth-first order.
    pub fn subtree_leaves(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let span = self.subtree_ranks(node);
        self.leaves[span.start as usize..span.end as usize]
            .iter()
            .copied()
    }

    /// Number of levels below the root.
    pub fn depth(&self) -> u32 {
        self.nodes.iter().map(|n| n.level).max().unwrap_or(0)
    }

    /// The layout described by the leaves: leaf `k` becomes partition
    /// `k` owned by rank `k`.
    pub fn partitions(&self) -> Vec<Partition> {
        self.leaves
            .iter()
            .enumerate()
            .map(|(k, leaf)| Partition {
                id: PartitionId(k as u32),
                rect: self.nodes[leaf.0 as usize].rect.clone(),
                owner: k as u32,
            })
            .collect()
    }

    /// Internal nodes ordered deepest level first.
    pub fn internal_nodes_bottom_up(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = (0..self.nodes.len() as u32)
            .map(NodeId)
            .filter(|&n| !self.is_leaf(n))
            .collect();
        nodes.sort_by_key(|&n| (std::cmp::Reverse(self.level(n)), n));
        nodes
    }
}

/// Spread the low bits of child index `idx` over the set bits of `axes`.
fn side_bits(axes: u32, idx: usize) -> u32 {
    let mut sides = 0;
    let mut j = 0;
    for d in 0..u32::BITS {
        if axes & (1 << d) != 0 {
            if idx & (1 << j) != 0 {
                sides |= 1 << d;
            }
            j += 1;
        }
    }
    sides
}

/// Rectangle of the child on sides `bits` when `rect` is split at
/// `origin` along `axes`.
fn child_rect(rect: &Rect, origin: &[i32], axes: u32, bits: u32) -> Rect {
    let mut lo = Coord::from_slice(rect.lo());
    let mut hi = Coord::from_slice(rect.hi());
    for d in (0..rect.dims()).filter(|d| axes & (1 << d) != 0) {
        if bits & (1 << d) != 0 {
            lo[d] = origin[d];
        } else {
            hi[d] = origin[d];
        }
    }
    Rect::new(lo, hi)
}

/// Recompute the rectangles under `node` after its rectangle or origin
/// changed.
fn relayout(nodes: &mut [Node], node: NodeId) {
    let (rect, origin, axes, children) = {
        let n = &nodes[node.0 as usize];
        match &n.origin {
            Some(o) => (n.rect.clone(), o.clone(), n.axes, n.children.clone()),
            None => return,
        }
    };
    for (idx, child) in children.iter().enumerate() {
        let r = child_rect(&rect, &origin, axes, side_bits(axes, idx));
        let c = &mut nodes[child.0 as usize];
        if let Some(o) = &mut c.origin {
            let own = c.axes;
            let centre = r.center();
            for d in 0..r.dims() {
                let split_here = own & (1 << d) != 0;
                if !split_here || !(r.lo()[d] < o[d] && o[d] < r.hi()[d]) {
                    o[d] = centre[d];
                }
            }
        }
        c.rect = r;
        relayout(nodes, *child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::verify_tiling;
    use tessera_core::GlobalField;

    fn c(v: &[i32]) -> Coord {
        Coord::from_slice(v)
    }

    fn field() -> GlobalField {
        GlobalField::new(&[100, 100], &[true, true]).unwrap()
    }

    #[test]
    fn uniform_four_ranks_gives_quadrants() {
        let f = field();
        let tree = QuadTree::uniform(f.bounds(), &[1, 1], 4).unwrap();
        let parts = tree.partitions();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0].rect, Rect::new(c(&[0, 0]), c(&[50, 50])));
        assert_eq!(parts[1].rect, Rect::new(c(&[50, 0]), c(&[100, 50])));
        assert_eq!(parts[2].rect, Rect::new(c(&[0, 50]), c(&[50, 100])));
        assert_eq!(parts[3].rect, Rect::new(c(&[50, 50]), c(&[100, 100])));
        verify_tiling(&f, &parts).unwrap();
    }

    #[test]
    fn uniform_sixteen_ranks_is_two_levels() {
        let f = field();
        let tree = QuadTree::uniform(f.bounds(), &[1, 1], 16).unwrap();
        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.leaves().len(), 16);
        verify_tiling(&f, &tree.partitions()).unwrap();
        // Ranks under each child of the root are contiguous.
        let spans: Vec<_> = tree
            .children(tree.root())
            .iter()
            .map(|&n| tree.subtree_ranks(n))
            .collect();
        assert_eq!(spans, vec![0..4, 4..8, 8..12, 12..16]);
        assert_eq!(tree.master(tree.children(tree.root())[2]), 8);
    }

    #[test]
    fn uniform_rejects_non_power_rank_count() {
        let f = field();
        match QuadTree::uniform(f.bounds(), &[1, 1], 6) {
            Err(BalanceError::UnsupportedRankCount { ranks: 6 }) => {}
            other => panic!("expected UnsupportedRankCount, got {other:?}"),
        }
        assert!(QuadTree::uniform(f.bounds(), &[1, 1], 1).is_ok());
    }

    #[test]
    fn uniform_two_ranks_is_a_binary_split() {
        let f = field();
        let tree = QuadTree::uniform(f.bounds(), &[1, 1], 2).unwrap();
        assert_eq!(tree.axes(tree.root()), 0b01);
        let parts = tree.partitions();
        assert_eq!(parts[0].rect, Rect::new(c(&[0, 0]), c(&[50, 100])));
        assert_eq!(parts[1].rect, Rect::new(c(&[50, 0]), c(&[100, 100])));
        verify_tiling(&f, &parts).unwrap();
        assert_eq!(tree.leaf_at(&[70, 99]).unwrap(), tree.leaves()[1]);
    }

    #[test]
    fn uniform_eight_ranks_halves_each_quadrant() {
        let f = field();
        let tree = QuadTree::uniform(f.bounds(), &[1, 1], 8).unwrap();
        assert_eq!(tree.depth(), 2);
        let quadrant = tree.children(tree.root())[3];
        assert_eq!(tree.axes(quadrant), 0b01);
        assert_eq!(tree.subtree_ranks(quadrant), 6..8);
        let parts = tree.partitions();
        assert_eq!(parts[6].rect, Rect::new(c(&[50, 50]), c(&[75, 100])));
        assert_eq!(parts[7].rect, Rect::new(c(&[75, 50]), c(&[100, 100])));
        verify_tiling(&f, &parts).unwrap();
    }

    #[test]
    fn uniform_prefers_the_wider_axis() {
        let f = GlobalField::new(&[40, 200], &[false, false]).unwrap();
        let tree = QuadTree::uniform(f.bounds(), &[1, 1], 2).unwrap();
        assert_eq!(tree.axes(tree.root()), 0b10);
        assert_eq!(tree.partitions()[0].rect, Rect::new(c(&[0, 0]), c(&[40, 100])));
    }

    #[test]
    fn axis_split_child_spans_unsplit_axis() {
        let f = field();
        let mut tree = QuadTree::new(f.bounds(), &[5, 5]);
        // Only the y coordinate matters; x lies outside the extent limit.
        tree.split_axes(tree.root(), &[1, 30], 0b10).unwrap();
        assert_eq!(tree.origin(tree.root()).unwrap(), &[50, 30]);
        assert_eq!(tree.child_sides(tree.root(), 1), 0b10);
        let parts = tree.partitions();
        assert_eq!(parts[1].rect, Rect::new(c(&[0, 30]), c(&[100, 100])));
        tree.move_origin(tree.root(), &[0, 60]).unwrap();
        assert_eq!(tree.partitions()[0].rect, Rect::new(c(&[0, 0]), c(&[100, 60])));
        assert!(tree.move_origin(tree.root(), &[0, 98]).is_err());
    }

    #[test]
    fn split_points_build_uneven_layout() {
        let f = field();
        let tree =
            QuadTree::from_split_points(f.bounds(), &[1, 1], &[c(&[30, 30]), c(&[10, 10])])
                .unwrap();
        assert_eq!(tree.leaves().len(), 7);
        let parts = tree.partitions();
        verify_tiling(&f, &parts).unwrap();
        assert_eq!(parts[0].rect, Rect::new(c(&[0, 0]), c(&[10, 10])));
    }

    #[test]
    fn split_below_minimum_extent_is_rejected() {
        let f = field();
        let mut tree = QuadTree::new(f.bounds(), &[5, 5]);
        match tree.split(tree.root(), &[3, 50]) {
            Err(BalanceError::BelowMinimumExtent { .. }) => {}
            other => panic!("expected BelowMinimumExtent, got {other:?}"),
        }
        assert_eq!(tree.leaves().len(), 1);
    }

    #[test]
    fn leaf_at_descends_by_origin() {
        let f = field();
        let tree = QuadTree::uniform(f.bounds(), &[1, 1], 4).unwrap();
        assert_eq!(tree.leaf_at(&[49, 50]).unwrap(), tree.leaves()[2]);
        assert_eq!(tree.leaf_at(&[51, 50]).unwrap(), tree.leaves()[3]);
        assert!(tree.leaf_at(&[100, 0]).is_err());
    }

    #[test]
    fn move_origin_reshapes_children() {
        let f = field();
        let mut tree = QuadTree::uniform(f.bounds(), &[1, 1], 4).unwrap();
        tree.move_origin(tree.root(), &[60, 40]).unwrap();
        let parts = tree.partitions();
        assert_eq!(parts[0].rect, Rect::new(c(&[0, 0]), c(&[60, 40])));
        verify_tiling(&f, &parts).unwrap();
    }

    #[test]
    fn move_origin_recentres_stranded_grandchild() {
        let f = field();
        let mut tree = QuadTree::uniform(f.bounds(), &[1, 1], 16).unwrap();
        let child0 = tree.children(tree.root())[0];
        assert_eq!(tree.origin(child0).unwrap(), &[25, 25]);
        tree.move_origin(tree.root(), &[20, 20]).unwrap();
        assert_eq!(tree.origin(child0).unwrap(), &[10, 10]);
        verify_tiling(&f, &tree.partitions()).unwrap();
    }

    #[test]
    fn move_origin_that_starves_a_leaf_leaves_tree_untouched() {
        let f = field();
        let mut tree = QuadTree::uniform(f.bounds(), &[4, 4], 16).unwrap();
        let before = tree.partitions();
        // The root's lower children become 6 wide; their children need 4
        // each side of a re-centred origin at 3.
        match tree.move_origin(tree.root(), &[6, 50]) {
            Err(BalanceError::BelowMinimumExtent { .. }) => {}
            other => panic!("expected BelowMinimumExtent, got {other:?}"),
        }
        assert_eq!(tree.partitions(), before);
    }

    #[test]
    fn bottom_up_order_visits_deepest_first() {
        let f = field();
        let tree = QuadTree::uniform(f.bounds(), &[1, 1], 16).unwrap();
        let order = tree.internal_nodes_bottom_up();
        assert_eq!(order.len(), 5);
        assert_eq!(*order.last().unwrap(), tree.root());
        assert!(order[..4].iter().all(|&n| tree.level(n) == 1));
    }
}
