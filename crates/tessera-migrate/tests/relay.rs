//! Multi-hop delivery: an envelope `k` partitions away arrives exactly
//! once, `k` exchanges after it was queued.

use tessera_comm::{run_local, Communicator};
use tessera_core::{Coord, EntityId, GlobalField, PartitionId, Rect};
use tessera_migrate::{Envelope, Migrator, Reschedule};
use tessera_partition::{Partition, PartitionIndex};

fn ring(rank: u32, n: u32) -> PartitionIndex {
    let field = GlobalField::new(&[(n * 8) as i32, 4], &[true, false]).unwrap();
    let parts: Vec<_> = (0..n)
        .map(|i| Partition {
            id: PartitionId(i),
            rect: Rect::new(
                Coord::from_slice(&[(i * 8) as i32, 0]),
                Coord::from_slice(&[(i * 8 + 8) as i32, 4]),
            ),
            owner: i,
        })
        .collect();
    PartitionIndex::with_layout(field, &[1, 1], rank, parts).unwrap()
}

/// Every rank sends one envelope to every other partition at tick 0,
/// then exchanges for `n` ticks. Returns, per rank, `(tick, origin,
/// hops)` for every delivery.
fn run_ring(n: u32) -> Vec<Vec<(u32, u32, u8)>> {
    run_local(n, move |mut comm| {
        let rank = comm.rank();
        let index = ring(rank, n);
        let mut m = Migrator::new(&index, None);
        for dest in (0..n).filter(|&d| d != rank) {
            let e = Envelope::agent(
                PartitionId(dest),
                EntityId::new(rank, dest),
                0,
                Vec::new(),
                Coord::from_slice(&[(dest * 8) as i32, 0]),
                Reschedule::ASAP,
            );
            m.enqueue(e, &index).unwrap();
        }
        let mut arrivals = Vec::new();
        for tick in 1..=n {
            let report = m.exchange(&index, &mut comm).unwrap();
            for e in report.delivered {
                arrivals.push((tick, e.entity().origin(), e.hops));
            }
        }
        assert_eq!(m.pending(), 0, "rank {rank} still holds envelopes");
        arrivals
    })
}

#[test]
fn ring_of_six_delivers_each_envelope_once_at_its_distance() {
    let n = 6;
    let arrivals = run_ring(n);
    for (rank, got) in arrivals.iter().enumerate() {
        let rank = rank as u32;
        assert_eq!(got.len(), (n - 1) as usize, "rank {rank}: {got:?}");
        for &(tick, origin, hops) in got {
            let d = (rank + n - origin) % n;
            let distance = d.min(n - d);
            assert_eq!(tick, distance, "from {origin} to {rank}");
            assert_eq!(u32::from(hops), distance);
        }
        let mut origins: Vec<u32> = got.iter().map(|a| a.1).collect();
        origins.sort_unstable();
        origins.dedup();
        assert_eq!(origins.len(), (n - 1) as usize, "no duplicates");
    }
}

#[test]
fn two_ranks_deliver_in_one_tick() {
    let arrivals = run_ring(2);
    assert_eq!(arrivals[0], vec![(1, 1, 1)]);
    assert_eq!(arrivals[1], vec![(1, 0, 1)]);
}
