//! One-dimensional interval index.
//!
//! Segments are half-open `[lo, hi)` and tagged with the partition they
//! belong to. The index is an implicit balanced search tree: segments
//! sorted by `lo`, with the subtree rooted at the middle of every range
//! augmented by the largest `hi` it contains. Layouts change only at
//! commit points, so the index is rebuilt wholesale rather than updated.

use tessera_core::PartitionId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Segment {
    lo: i32,
    hi: i32,
    id: PartitionId,
}

/// Static interval index over one axis.
#[derive(Clone, Debug, Default)]
pub struct IntervalIndex {
    segments: Vec<Segment>,
    /// `max_hi[mid]` is the largest `hi` in the subtree rooted at `mid`.
    max_hi: Vec<i32>,
}

impl IntervalIndex {
    /// Build an index over `(lo, hi, id)` segments.
    pub fn build(segments: impl IntoIterator<Item = (i32, i32, PartitionId)>) -> Self {
        let mut segments: Vec<Segment> = segments
            .into_iter()
            .map(|(lo, hi, id)| Segment { lo, hi, id })
            .collect();
        segments.sort_by_key(|s| (s.lo, s.hi, s.id));
        let mut max_hi = vec![i32::MIN; segments.len()];
        fill_max(&segments, &mut max_hi, 0, segments.len());
        Self { segments, max_hi }
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// True if the index holds no segments.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Append to `out` every segment containing `x`.
    pub fn stab(&self, x: i32, out: &mut Vec<PartitionId>) {
        self.overlapping(x, x.saturating_add(1), out);
    }

    /// Append to `out` every segment intersecting `[lo, hi)`.
    pub fn overlapping(&self, lo: i32, hi: i32, out: &mut Vec<PartitionId>) {
        if lo < hi {
            self.visit(0, self.segments.len(), lo, hi, out);
        }
    }

    fn visit(&self, start: usize, end: usize, lo: i32, hi: i32, out: &mut Vec<PartitionId>) {
        if start >= end {
            return;
        }
        let mid = start + (end - start) / 2;
        // Nothing in this subtree ends after the query starts.
        if self.max_hi[mid] <= lo {
            return;
        }
        self.visit(start, mid, lo, hi, out);
        let seg = self.segments[mid];
        // Everything to the right starts at or after `seg.lo`.
        if seg.lo >= hi {
            return;
        }
        if seg.hi > lo {
            out.push(seg.id);
        }
        self.visit(mid + 1, end, lo, hi, out);
    }
}

fn fill_max(segments: &[Segment], max_hi: &mut [i32], start: usize, end: usize) -> i32 {
    if start >= end {
        return i32::MIN;
    }
    let mid = start + (end - start) / 2;
    let left = fill_max(segments, max_hi, start, mid);
    let right = fill_max(segments, max_hi, mid + 1, end);
    max_hi[mid] = segments[mid].hi.max(left).max(right);
    max_hi[mid]
}
