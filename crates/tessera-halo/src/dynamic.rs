//! Object-safe view of a halo field, for holding fields of different
//! cell types side by side.

use std::any::Any;

use tessera_comm::Communicator;
use tessera_core::FieldId;
use tessera_partition::{CommitHook, PartitionIndex};

use crate::cell::CellValue;
use crate::error::HaloError;
use crate::field::{HaloField, SyncStats};
use crate::grid::GridStorage;

/// A halo field with its cell type erased.
///
/// Use [`as_any`](Self::as_any) / [`as_any_mut`](Self::as_any_mut) to
/// downcast back to the concrete [`HaloField`].
pub trait SyncField: CommitHook + Send {
    /// Field id.
    fn id(&self) -> FieldId;

    /// See [`HaloField::sync`].
    fn sync(
        &mut self,
        index: &PartitionIndex,
        comm: &mut dyn Communicator,
    ) -> Result<SyncStats, HaloError>;

    /// See [`HaloField::reload`].
    fn reload(&mut self, index: &PartitionIndex) -> Result<(), HaloError>;

    /// See [`HaloField::place`].
    fn place(&mut self, point: &[i32], bytes: &[u8]) -> Result<(), HaloError>;

    /// See [`HaloField::take`].
    fn take(&mut self, point: &[i32], bytes: &[u8]) -> Result<bool, HaloError>;

    /// See [`HaloField::respond`].
    fn respond(&self, selector: u32, arg: &[u8]) -> Result<Vec<u8>, String>;

    /// The field as a commit hook.
    fn as_commit_hook(&mut self) -> &mut dyn CommitHook;

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;

    /// Mutable downcast support.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T, S> SyncField for HaloField<T, S>
where
    T: CellValue,
    S: GridStorage<Cell = T> + 'static,
{
    fn id(&self) -> FieldId {
        HaloField::id(self)
    }

    fn sync(
        &mut self,
        index: &PartitionIndex,
        comm: &mut dyn Communicator,
    ) -> Result<SyncStats, HaloError> {
        HaloField::sync(self, index, comm)
    }

    fn reload(&mut self, index: &PartitionIndex) -> Result<(), HaloError> {
        HaloField::reload(self, index)
    }

    fn place(&mut self, point: &[i32], bytes: &[u8]) -> Result<(), HaloError> {
        HaloField::place(self, point, bytes)
    }

    fn take(&mut self, point: &[i32], bytes: &[u8]) -> Result<bool, HaloError> {
        HaloField::take(self, point, bytes)
    }

    fn respond(&self, selector: u32, arg: &[u8]) -> Result<Vec<u8>, String> {
        HaloField::respond(self, selector, arg)
    }

    fn as_commit_hook(&mut self) -> &mut dyn CommitHook {
        self
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::codec::to_bytes;
    use tessera_core::{Coord, GlobalField, PartitionId, Rect};
    use tessera_partition::Partition;

    #[test]
    fn boxed_fields_downcast_to_their_cell_type() {
        let field = GlobalField::new(&[6, 6], &[false, false]).unwrap();
        let index = PartitionIndex::with_layout(
            field,
            &[1, 1],
            0,
            vec![Partition {
                id: PartitionId(0),
                rect: Rect::from_size(&[6, 6]),
                owner: 0,
            }],
        )
        .unwrap();
        let mut fields: Vec<Box<dyn SyncField>> = vec![
            Box::new(HaloField::<f64>::new(FieldId(0), "heat", &index).unwrap()),
            Box::new(HaloField::<Vec<u32>>::new(FieldId(1), "bags", &index).unwrap()),
        ];
        fields[1].place(&[2, 2], &to_bytes(&5u32)).unwrap();
        fields[1].place(&[2, 2], &to_bytes(&6u32)).unwrap();

        let bags = fields[1]
            .as_any()
            .downcast_ref::<HaloField<Vec<u32>>>()
            .unwrap();
        assert_eq!(bags.read(&Coord::from_slice(&[2, 2])).unwrap(), &vec![5, 6]);
        assert!(fields[1].take(&[2, 2], &to_bytes(&5u32)).unwrap());
        assert!(fields[0].as_any().downcast_ref::<HaloField<u32>>().is_none());
        assert_eq!(fields[0].name(), "heat");
        assert_eq!(fields[0].id(), FieldId(0));
    }
}
