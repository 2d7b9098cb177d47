//! Benchmark profiles for Tessera.
//!
//! - [`reference_profile`]: 256x256 torus, uniform layout
//! - [`layout`]: the partition index a given rank sees under a profile
//! - [`agent_positions`]: deterministic positions inside a rectangle

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use tessera_core::{Coord, GlobalField, Rect};
use tessera_engine::{TickError, WorldConfig};
use tessera_partition::{PartitionIndex, QuadTree};

/// 256x256 torus with a two-cell halo.
pub fn reference_profile(seed: u64) -> WorldConfig {
    let mut config = WorldConfig::new(&[256, 256], &[true, true]);
    config.aoi = vec![2, 2];
    config.seed = seed;
    config
}

/// The uniform layout of `config` over `ranks`, as seen from `rank`.
pub fn layout(config: &WorldConfig, ranks: u32, rank: u32) -> Result<PartitionIndex, TickError> {
    config.validate(ranks)?;
    let field = GlobalField::new(&config.field_size, &config.toroidal)?;
    let tree = QuadTree::uniform(field.bounds(), &config.aoi, ranks)?;
    Ok(PartitionIndex::with_layout(field, &config.aoi, rank, tree.partitions())?)
}

/// `n` deterministic positions inside `rect`, spread by a
/// multiplicative hash of the seed.
pub fn agent_positions(rect: &Rect, n: usize, seed: u64) -> Vec<Coord> {
    (0..n as u64)
        .map(|i| {
            let h = (i ^ seed).wrapping_mul(6364136223846793007);
            (0..rect.dims())
                .map(|d| {
                    let span = rect.extent(d) as u64;
                    let x = (h >> (16 * d)) % span;
                    rect.lo()[d] + x as i32
                })
                .collect()
        })
        .collect()
}
