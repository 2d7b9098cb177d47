//! Criterion benchmark for a full single-rank tick.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use tessera_bench::{agent_positions, reference_profile};
use tessera_comm::LocalCluster;
use tessera_migrate::Reschedule;
use tessera_test_utils::{walker_world, Walker};

/// Benchmark: one tick of 1000 walkers on a 256x256 torus held by one
/// rank (step, self-sync, empty exchange, maintenance, barrier).
fn bench_tick_1k_walkers(c: &mut Criterion) {
    let comm = LocalCluster::new(1).remove(0);
    let mut world = walker_world(reference_profile(7), comm).unwrap();
    let rect = world.index().local().rect.clone();
    for (i, p) in agent_positions(&rect, 1000, 7).iter().enumerate() {
        let delta = [(i % 3) as i32 - 1, (i % 5) as i32 - 2];
        world
            .spawn(Box::new(Walker::new(&delta)), p, Reschedule::repeating(1.0))
            .unwrap();
    }

    c.bench_function("tick_1k_walkers", |b| {
        b.iter(|| black_box(world.step().unwrap().agents_stepped));
    });
}

criterion_group!(benches, bench_tick_1k_walkers);
criterion_main!(benches);
