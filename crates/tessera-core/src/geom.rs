//! Rectangle geometry over a bounded, optionally toroidal, global field.
//!
//! All rectangles are half-open: a [`Rect`] covers `lo[d] <= x < hi[d]`
//! in every dimension `d`. Rectangles may extend past the field bounds
//! in toroidal dimensions (a halo that wraps around the edge); such cells
//! are replicas of the cells reached by [`GlobalField::wrap`].

use std::fmt;

use smallvec::{smallvec, SmallVec};

use crate::error::GeometryError;
use crate::id::Coord;

// ── Rect ────────────────────────────────────────────────────────

/// Axis-aligned half-open box `[lo, hi)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Rect {
    lo: Coord,
    hi: Coord,
}

impl Rect {
    /// Create a rectangle from its lower (inclusive) and upper
    /// (exclusive) corners.
    pub fn new(lo: Coord, hi: Coord) -> Self {
        debug_assert_eq!(lo.len(), hi.len(), "corner dimensionality differs");
        Self { lo, hi }
    }

    /// The rectangle `[0, size)`.
    pub fn from_size(size: &[i32]) -> Self {
        Self {
            lo: smallvec![0; size.len()],
            hi: Coord::from_slice(size),
        }
    }

    /// Number of dimensions.
    pub fn dims(&self) -> usize {
        self.lo.len()
    }

    /// Lower (inclusive) corner.
    pub fn lo(&self) -> &[i32] {
        &self.lo
    }

    /// Upper (exclusive) corner.
    pub fn hi(&self) -> &[i32] {
        &self.hi
    }

    /// Width along dimension `d`. Non-positive for an empty rectangle.
    pub fn extent(&self, d: usize) -> i32 {
        self.hi[d] - self.lo[d]
    }

    /// Smallest width across all dimensions.
    pub fn min_extent(&self) -> i32 {
        (0..self.dims()).map(|d| self.extent(d)).min().unwrap_or(0)
    }

    /// True if the rectangle covers no cells.
    pub fn is_empty(&self) -> bool {
        self.lo.iter().zip(&self.hi).any(|(l, h)| h <= l)
    }

    /// Number of cells covered.
    pub fn volume(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        (0..self.dims()).map(|d| self.extent(d) as u64).product()
    }

    /// True if `p` lies inside the rectangle.
    pub fn contains(&self, p: &[i32]) -> bool {
        p.len() == self.dims()
            && p.iter()
                .zip(self.lo.iter().zip(&self.hi))
                .all(|(&x, (&l, &h))| l <= x && x < h)
    }

    /// True if `other` lies entirely inside this rectangle.
    pub fn contains_rect(&self, other: &Rect) -> bool {
        (0..self.dims()).all(|d| self.lo[d] <= other.lo[d] && other.hi[d] <= self.hi[d])
    }

    /// True if the two rectangles share at least one cell.
    pub fn intersects(&self, other: &Rect) -> bool {
        (0..self.dims()).all(|d| self.lo[d].max(other.lo[d]) < self.hi[d].min(other.hi[d]))
    }

    /// The shared cells of two rectangles, or `None` if they are disjoint.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let lo: Coord = (0..self.dims())
            .map(|d| self.lo[d].max(other.lo[d]))
            .collect();
        let hi: Coord = (0..self.dims())
            .map(|d| self.hi[d].min(other.hi[d]))
            .collect();
        let r = Rect { lo, hi };
        (!r.is_empty()).then_some(r)
    }

    /// Grow by `margin[d]` on both sides of every dimension.
    pub fn expand(&self, margin: &[i32]) -> Rect {
        Rect {
            lo: self.lo.iter().zip(margin).map(|(l, m)| l - m).collect(),
            hi: self.hi.iter().zip(margin).map(|(h, m)| h + m).collect(),
        }
    }

    /// Shrink by `margin[d]` on both sides. Collapses to an empty
    /// rectangle rather than inverting.
    pub fn shrink(&self, margin: &[i32]) -> Rect {
        let lo: Coord = self.lo.iter().zip(margin).map(|(l, m)| l + m).collect();
        let hi: Coord = self
            .hi
            .iter()
            .zip(margin)
            .zip(&lo)
            .map(|((h, m), l)| (h - m).max(*l))
            .collect();
        Rect { lo, hi }
    }

    /// Translate by `offset`.
    pub fn shift(&self, offset: &[i32]) -> Rect {
        Rect {
            lo: self.lo.iter().zip(offset).map(|(l, o)| l + o).collect(),
            hi: self.hi.iter().zip(offset).map(|(h, o)| h + o).collect(),
        }
    }

    /// The cell at the middle of the rectangle (rounded towards `lo`).
    pub fn center(&self) -> Coord {
        (0..self.dims())
            .map(|d| self.lo[d] + self.extent(d) / 2)
            .collect()
    }

    /// Chebyshev gap to `other`: zero if they touch or overlap.
    pub fn gap(&self, other: &Rect) -> i64 {
        (0..self.dims())
            .map(|d| {
                let before = other.lo[d] as i64 - self.hi[d] as i64;
                let after = self.lo[d] as i64 - other.hi[d] as i64;
                before.max(after).max(0)
            })
            .max()
            .unwrap_or(0)
    }

    /// Row-major offset of `p` (last dimension fastest), or `None` if
    /// `p` is outside the rectangle.
    pub fn offset_of(&self, p: &[i32]) -> Option<usize> {
        if !self.contains(p) {
            return None;
        }
        let mut offset = 0usize;
        for (d, &x) in p.iter().enumerate() {
            offset = offset * self.extent(d) as usize + (x - self.lo[d]) as usize;
        }
        Some(offset)
    }

    /// Iterate every cell in row-major order.
    pub fn points(&self) -> RectPoints {
        RectPoints {
            rect: self.clone(),
            cursor: (!self.is_empty()).then(|| self.lo.clone()),
        }
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}..{:?})", self.lo.as_slice(), self.hi.as_slice())
    }
}

/// Row-major iterator over the cells of a [`Rect`].
#[derive(Clone, Debug)]
pub struct RectPoints {
    rect: Rect,
    cursor: Option<Coord>,
}

impl Iterator for RectPoints {
    type Item = Coord;

    fn next(&mut self) -> Option<Coord> {
        let current = self.cursor.take()?;
        let mut next = current.clone();
        for d in (0..next.len()).rev() {
            next[d] += 1;
            if next[d] < self.rect.hi[d] {
                self.cursor = Some(next);
                return Some(current);
            }
            next[d] = self.rect.lo[d];
        }
        Some(current)
    }
}

// ── GlobalField ─────────────────────────────────────────────────

/// The simulated field: per-dimension extent `[0, size[d])` plus a
/// wraparound flag per dimension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GlobalField {
    size: Coord,
    toroidal: SmallVec<[bool; 4]>,
    shifts: Vec<Coord>,
}

impl GlobalField {
    /// Create a field, validating that every dimension is non-empty.
    pub fn new(size: &[i32], toroidal: &[bool]) -> Result<Self, GeometryError> {
        if size.is_empty() {
            return Err(GeometryError::NoDimensions);
        }
        if toroidal.len() != size.len() {
            return Err(GeometryError::DimensionMismatch {
                expected: size.len(),
                got: toroidal.len(),
            });
        }
        if let Some((dim, &s)) = size.iter().enumerate().find(|(_, &s)| s <= 0) {
            return Err(GeometryError::EmptyDimension { dim, size: s });
        }
        let shifts = build_shifts(size, toroidal);
        Ok(Self {
            size: Coord::from_slice(size),
            toroidal: SmallVec::from_slice(toroidal),
            shifts,
        })
    }

    /// Number of dimensions.
    pub fn dims(&self) -> usize {
        self.size.len()
    }

    /// Extent per dimension.
    pub fn size(&self) -> &[i32] {
        &self.size
    }

    /// Wraparound flags per dimension.
    pub fn toroidal(&self) -> &[bool] {
        &self.toroidal
    }

    /// True if dimension `d` wraps around.
    pub fn is_toroidal(&self, d: usize) -> bool {
        self.toroidal[d]
    }

    /// The rectangle `[0, size)`.
    pub fn bounds(&self) -> Rect {
        Rect::from_size(&self.size)
    }

    /// Total number of cells.
    pub fn volume(&self) -> u64 {
        self.size.iter().map(|&s| s as u64).product()
    }

    /// Map `p` into the field: toroidal dimensions are reduced modulo
    /// their size, other dimensions must already be in range.
    pub fn wrap(&self, p: &[i32]) -> Option<Coord> {
        if p.len() != self.dims() {
            return None;
        }
        let mut out = Coord::with_capacity(p.len());
        for (d, &x) in p.iter().enumerate() {
            let s = self.size[d];
            if self.toroidal[d] {
                out.push(x.rem_euclid(s));
            } else if (0..s).contains(&x) {
                out.push(x);
            } else {
                return None;
            }
        }
        Some(out)
    }

    /// Every offset by which a query must be repeated to catch
    /// wraparound overlaps: all of `{-size, 0, +size}` over the toroidal
    /// dimensions, zero elsewhere. The zero offset comes first; the rest
    /// follow in lexicographic order so every rank iterates them alike.
    pub fn shifts(&self) -> &[Coord] {
        &self.shifts
    }

    /// Clip a rectangle to the field in non-toroidal dimensions only.
    pub fn clip(&self, r: &Rect) -> Rect {
        let lo = (0..self.dims())
            .map(|d| {
                if self.toroidal[d] {
                    r.lo[d]
                } else {
                    r.lo[d].max(0)
                }
            })
            .collect();
        let hi = (0..self.dims())
            .map(|d| {
                if self.toroidal[d] {
                    r.hi[d]
                } else {
                    r.hi[d].min(self.size[d])
                }
            })
            .collect();
        Rect { lo, hi }
    }

    /// Smallest Chebyshev gap between `a` and any wrapped copy of `b`.
    pub fn gap(&self, a: &Rect, b: &Rect) -> i64 {
        self.shifts
            .iter()
            .map(|s| a.gap(&b.shift(s)))
            .min()
            .unwrap_or(0)
    }
}

fn build_shifts(size: &[i32], toroidal: &[bool]) -> Vec<Coord> {
    let mut shifts: Vec<Coord> = vec![Coord::new()];
    for (d, &s) in size.iter().enumerate() {
        let choices: &[i32] = if toroidal[d] { &[-1, 0, 1] } else { &[0] };
        shifts = shifts
            .into_iter()
            .flat_map(|prefix| {
                choices.iter().map(move |&c| {
                    let mut v = prefix.clone();
                    v.push(c * s);
                    v
                })
            })
            .collect();
    }
    if let Some(zero) = shifts.iter().position(|v| v.iter().all(|&x| x == 0)) {
        let z = shifts.remove(zero);
        shifts.insert(0, z);
    }
    shifts
}
