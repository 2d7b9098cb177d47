//! Which cells move where during a halo sync.
//!
//! For a neighbour `B` and every toroidal shift `t` (in the field's
//! shift order), this rank sends `L_me ∩ H_B.shift(-t)` and receives into
//! `H_me ∩ L_B.shift(t)`. The two sides compute mirror-image regions of
//! identical shape from the same replicated layout, so a buffer is just
//! the cells in row-major order with no coordinates attached.

use tessera_core::{Coord, PartitionId, Rect};
use tessera_partition::{IndexError, PartitionIndex};

/// The regions exchanged with one neighbour.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transfer {
    /// Neighbour partition.
    pub partition: PartitionId,
    /// Rank owning the neighbour partition.
    pub rank: u32,
    /// Owned regions packed for the neighbour, in shift order.
    pub send: Vec<Rect>,
    /// Halo regions filled from the neighbour, in the same order.
    pub recv: Vec<Rect>,
}

/// A halo region filled from this rank's own cells: the region, and the
/// offset to subtract to find the source cells.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelfCopy {
    /// Halo cells to fill.
    pub dest: Rect,
    /// `dest.shift(-offset)` is inside the local rectangle.
    pub offset: Coord,
}

/// The full exchange schedule for one layout.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncPlan {
    transfers: Vec<Transfer>,
    self_copies: Vec<SelfCopy>,
}

impl SyncPlan {
    /// Plan for the local partition of `index`'s committed layout.
    pub fn build(index: &PartitionIndex) -> Result<Self, IndexError> {
        let field = index.field();
        let local = index.local();
        let my_halo = index
            .halo_rect(local.id)
            .ok_or(IndexError::UnknownPartition { id: local.id })?;

        let mut transfers = Vec::with_capacity(index.local_neighbours().len());
        for &id in index.local_neighbours() {
            let peer = index
                .partition(id)
                .ok_or(IndexError::UnknownPartition { id })?;
            let peer_halo = index
                .halo_rect(id)
                .ok_or(IndexError::UnknownPartition { id })?;
            let mut send = Vec::new();
            let mut recv = Vec::new();
            for t in field.shifts() {
                let neg: Coord = t.iter().map(|x| -x).collect();
                if let Some(r) = local.rect.intersection(&peer_halo.shift(&neg)) {
                    send.push(r);
                }
                if let Some(r) = my_halo.intersection(&peer.rect.shift(t)) {
                    recv.push(r);
                }
            }
            transfers.push(Transfer {
                partition: id,
                rank: peer.owner,
                send,
                recv,
            });
        }

        let self_copies = field
            .shifts()
            .iter()
            .skip(1)
            .filter_map(|t| {
                my_halo
                    .intersection(&local.rect.shift(t))
                    .map(|dest| SelfCopy {
                        dest,
                        offset: t.clone(),
                    })
            })
            .collect();

        Ok(Self {
            transfers,
            self_copies,
        })
    }

    /// Per-neighbour transfers, ordered by partition id.
    pub fn transfers(&self) -> &[Transfer] {
        &self.transfers
    }

    /// Halo regions that wrap onto the local partition itself.
    pub fn self_copies(&self) -> &[SelfCopy] {
        &self.self_copies
    }

    /// Ranks to exchange with.
    pub fn peers(&self) -> Vec<u32> {
        self.transfers.iter().map(|t| t.rank).collect()
    }

    /// Total halo cells filled by one sync.
    pub fn halo_cells(&self) -> u64 {
        let received: u64 = self
            .transfers
            .iter()
            .flat_map(|t| &t.recv)
            .map(Rect::volume)
            .sum();
        let copied: u64 = self.self_copies.iter().map(|c| c.dest.volume()).sum();
        received + copied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::GlobalField;
    use tessera_partition::Partition;

    fn rect(lo: &[i32], hi: &[i32]) -> Rect {
        Rect::new(Coord::from_slice(lo), Coord::from_slice(hi))
    }

    fn index(rank: u32, parts: Vec<Partition>, size: &[i32], toroidal: &[bool]) -> PartitionIndex {
        let field = GlobalField::new(size, toroidal).unwrap();
        let aoi = vec![1; size.len()];
        PartitionIndex::with_layout(field, &aoi, rank, parts).unwrap()
    }

    fn halves() -> Vec<Partition> {
        vec![
            Partition {
                id: PartitionId(0),
                rect: rect(&[0], &[10]),
                owner: 0,
            },
            Partition {
                id: PartitionId(1),
                rect: rect(&[10], &[20]),
                owner: 1,
            },
        ]
    }

    #[test]
    fn line_torus_exchanges_both_edges() {
        let plan = SyncPlan::build(&index(0, halves(), &[20], &[true])).unwrap();
        assert_eq!(plan.peers(), vec![1]);
        let t = &plan.transfers()[0];
        // Rank 1's halo is [9, 21): it needs cell 9 directly and cell 0
        // as its wrapped cell 20.
        assert_eq!(t.send, vec![rect(&[9], &[10]), rect(&[0], &[1])]);
        // Our halo [-1, 11) gets cell -1 from 19 and 10 directly.
        assert_eq!(t.recv, vec![rect(&[10], &[11]), rect(&[-1], &[0])]);
        assert!(plan.self_copies().is_empty());
        assert_eq!(plan.halo_cells(), 2);
    }

    #[test]
    fn send_and_recv_are_mirror_images() {
        let a = SyncPlan::build(&index(0, halves(), &[20], &[true])).unwrap();
        let b = SyncPlan::build(&index(1, halves(), &[20], &[true])).unwrap();
        let sent: Vec<u64> = a.transfers()[0].send.iter().map(Rect::volume).collect();
        let got: Vec<u64> = b.transfers()[0].recv.iter().map(Rect::volume).collect();
        assert_eq!(sent, got);
    }

    #[test]
    fn single_partition_wraps_onto_itself() {
        let whole = vec![Partition {
            id: PartitionId(0),
            rect: rect(&[0, 0], &[8, 8]),
            owner: 0,
        }];
        let plan = SyncPlan::build(&index(0, whole, &[8, 8], &[true, false])).unwrap();
        assert!(plan.transfers().is_empty());
        assert_eq!(plan.self_copies().len(), 2);
        assert_eq!(plan.self_copies()[0].dest, rect(&[-1, 0], &[0, 8]));
        assert_eq!(plan.halo_cells(), 16);
    }

    #[test]
    fn non_toroidal_edge_has_no_halo() {
        let plan = SyncPlan::build(&index(0, halves(), &[20], &[false])).unwrap();
        assert_eq!(plan.transfers()[0].send, vec![rect(&[9], &[10])]);
        assert_eq!(plan.transfers()[0].recv, vec![rect(&[10], &[11])]);
    }
}
