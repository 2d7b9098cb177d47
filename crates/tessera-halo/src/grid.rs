//! Grid storage behind a halo field.

use tessera_core::{ByteReader, ByteWriter, CodecError, Rect, Wire};

use crate::cell::CellValue;

/// Storage for the cells of one rank's halo rectangle.
///
/// Coordinates are unwrapped: a halo that crosses a toroidal edge is
/// addressed past the field bounds (for example `-1` or `size`).
pub trait GridStorage: Send {
    /// Cell type.
    type Cell: CellValue;

    /// Rectangle covered by the storage.
    fn bounds(&self) -> &Rect;

    /// Cell at `p`, or `None` outside [`bounds()`](Self::bounds).
    fn get(&self, p: &[i32]) -> Option<&Self::Cell>;

    /// Mutable cell at `p`.
    fn get_mut(&mut self, p: &[i32]) -> Option<&mut Self::Cell>;

    /// Change the covered rectangle, keeping the content of cells in
    /// both the old and the new rectangle. New cells start at their
    /// default value.
    fn reshape(&mut self, bounds: Rect);

    /// Append the cells of `region` in row-major order. Returns the
    /// number of cells written. `region` must lie inside the bounds.
    fn pack(&self, region: &Rect, w: &mut ByteWriter) -> usize {
        let mut count = 0;
        for p in region.points() {
            if let Some(cell) = self.get(&p) {
                cell.encode(w);
                count += 1;
            }
        }
        count
    }

    /// Overwrite the cells of `region` from `r`, in the order
    /// [`pack`](Self::pack) produced them.
    fn unpack(&mut self, region: &Rect, r: &mut ByteReader<'_>) -> Result<usize, CodecError> {
        let mut count = 0;
        for p in region.points() {
            let value = Self::Cell::decode(r)?;
            if let Some(cell) = self.get_mut(&p) {
                *cell = value;
                count += 1;
            }
        }
        Ok(count)
    }
}

/// Row-major dense storage, last dimension fastest.
#[derive(Clone, Debug)]
pub struct DenseGrid<T> {
    bounds: Rect,
    cells: Vec<T>,
}

impl<T: CellValue> DenseGrid<T> {
    /// Storage covering `bounds`, every cell at `T::default()`.
    pub fn new(bounds: Rect) -> Self {
        let cells = vec![T::default(); bounds.volume() as usize];
        Self { bounds, cells }
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// True if the storage covers no cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl<T: CellValue> GridStorage for DenseGrid<T> {
    type Cell = T;

    fn bounds(&self) -> &Rect {
        &self.bounds
    }

    fn get(&self, p: &[i32]) -> Option<&T> {
        let i = self.bounds.offset_of(p)?;
        self.cells.get(i)
    }

    fn get_mut(&mut self, p: &[i32]) -> Option<&mut T> {
        let i = self.bounds.offset_of(p)?;
        self.cells.get_mut(i)
    }

    fn reshape(&mut self, bounds: Rect) {
        if bounds == self.bounds {
            return;
        }
        let mut next = DenseGrid::new(bounds);
        if let Some(common) = self.bounds.intersection(&next.bounds) {
            for p in common.points() {
                let src = self.bounds.offset_of(&p);
                let dst = next.bounds.offset_of(&p);
                if let (Some(src), Some(dst)) = (src, dst) {
                    next.cells[dst] = std::mem::take(&mut self.cells[src]);
                }
            }
        }
        *self = next;
    }
}
