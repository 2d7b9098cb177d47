//! The cell contract for halo fields.

use tessera_core::codec::{from_bytes, to_bytes};
use tessera_core::{CodecError, Wire};

/// A value that can live in a grid cell and travel in halo buffers.
///
/// [`place`](Self::place) is how migrated objects arrive in a cell: the
/// default replaces the cell with the decoded value, while collection
/// cells append to what is already there. [`take`](Self::take) undoes
/// one placement.
pub trait CellValue: Wire + Clone + Default + Send + 'static {
    /// Merge an encoded value arriving from another partition.
    fn place(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        *self = from_bytes(bytes)?;
        Ok(())
    }

    /// Remove a value previously placed from `bytes`. Returns false if
    /// the cell no longer holds it.
    fn take(&mut self, bytes: &[u8]) -> bool {
        if to_bytes(self) != bytes {
            return false;
        }
        *self = Self::default();
        true
    }
}

macro_rules! scalar_cells {
    ($($ty:ty),* $(,)?) => {
        $(impl CellValue for $ty {})*
    };
}

scalar_cells!(u8, u32, u64, i32, i64, f32, f64, bool);

/// Object cells: each arrival is one more element.
impl<T> CellValue for Vec<T>
where
    T: Wire + Clone + Send + 'static,
{
    fn place(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.push(from_bytes(bytes)?);
        Ok(())
    }

    /// Removes the first element that encodes to `bytes`.
    fn take(&mut self, bytes: &[u8]) -> bool {
        match self.iter().position(|item| to_bytes(item) == bytes) {
            Some(i) => {
                self.remove(i);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::codec::to_bytes;

    #[test]
    fn scalar_place_replaces() {
        let mut v = 3.5f64;
        v.place(&to_bytes(&1.25f64)).unwrap();
        assert_eq!(v, 1.25);
    }

    #[test]
    fn vec_place_appends() {
        let mut bag: Vec<u32> = vec![1];
        bag.place(&to_bytes(&7u32)).unwrap();
        assert_eq!(bag, vec![1, 7]);
    }

    #[test]
    fn take_removes_one_matching_placement() {
        let mut bag: Vec<u32> = vec![4, 7, 7];
        assert!(bag.take(&to_bytes(&7u32)));
        assert_eq!(bag, vec![4, 7]);
        assert!(!bag.take(&to_bytes(&9u32)));

        let mut v = 5u32;
        assert!(!v.take(&to_bytes(&6u32)));
        assert!(v.take(&to_bytes(&5u32)));
        assert_eq!(v, 0);
    }

    #[test]
    fn place_rejects_trailing_bytes() {
        let mut v = 0u8;
        assert!(v.place(&[1, 2]).is_err());
    }
}
