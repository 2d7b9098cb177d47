//! World configuration and validation.
//!
//! [`WorldConfig`] is the builder-input for [`DistributedWorld`](crate::DistributedWorld).
//! [`validate()`](WorldConfig::validate) checks structural invariants
//! against the number of ranks before anything collective happens, so
//! every rank rejects a bad configuration the same way.

use tessera_core::Coord;

// ── LayoutConfig ───────────────────────────────────────────────────

/// How the initial quad tree is built.
#[derive(Clone, Debug, PartialEq)]
pub enum LayoutConfig {
    /// Split every leaf at its centre until there is one leaf per rank.
    /// Requires the rank count to be a power of two; levels that cannot
    /// split every axis split the widest ones.
    Uniform,
    /// Split, for each point in turn, the leaf that contains it at that
    /// point. Each split adds `2^dims - 1` leaves.
    SplitPoints(Vec<Coord>),
}

// ── BalanceConfig ──────────────────────────────────────────────────

/// Periodic load balancing.
#[derive(Clone, Debug, PartialEq)]
pub struct BalanceConfig {
    /// Ticks between rebalancing rounds. `0` disables rebalancing.
    /// Default: 0.
    pub interval: u64,
    /// Imbalance (fraction of subtree weight) tolerated before a split
    /// moves. Default: 0.1.
    pub tolerance: f64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            interval: 0,
            tolerance: 0.1,
        }
    }
}

// ── ConfigError ────────────────────────────────────────────────────

/// Errors detected during [`WorldConfig::validate()`].
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// The field has no dimensions.
    #[error("field has no dimensions")]
    NoDimensions,
    /// `toroidal` or `aoi` length differs from `field_size`.
    #[error("{what} has {got} entries, field has {expected} dimensions")]
    DimensionMismatch {
        /// Which setting.
        what: &'static str,
        /// Dimensions of the field.
        expected: usize,
        /// Entries supplied.
        got: usize,
    },
    /// A field extent is zero or negative.
    #[error("field dimension {dim} has size {size}")]
    EmptyDimension {
        /// The dimension.
        dim: usize,
        /// Its size.
        size: i32,
    },
    /// An AOI margin is below one cell.
    #[error("aoi in dimension {dim} is {aoi}, must be at least 1")]
    AoiTooSmall {
        /// The dimension.
        dim: usize,
        /// The margin.
        aoi: i32,
    },
    /// A toroidal halo would wrap onto itself.
    #[error("aoi {aoi} is too wide for toroidal dimension {dim} of size {size}")]
    AoiTooWide {
        /// The dimension.
        dim: usize,
        /// The margin.
        aoi: i32,
        /// The dimension size.
        size: i32,
    },
    /// The uniform layout needs a power-of-two rank count.
    #[error("uniform layout over {dims} dimensions cannot produce {ranks} partitions")]
    UnsupportedRankCount {
        /// Dimensions of the field.
        dims: usize,
        /// Ranks in the run.
        ranks: u32,
    },
    /// The split points produce a different number of leaves than ranks.
    #[error("split points produce {leaves} partitions for {ranks} ranks")]
    LeafCountMismatch {
        /// Leaves the split points produce.
        leaves: u64,
        /// Ranks in the run.
        ranks: u32,
    },
    /// A split point lies outside the field.
    #[error("split point {point:?} lies outside the field")]
    SplitOutsideField {
        /// The point.
        point: Coord,
    },
    /// The balance tolerance is not in `[0, 1)`.
    #[error("balance tolerance must be finite and in [0, 1), got {value}")]
    InvalidTolerance {
        /// The configured tolerance.
        value: f64,
    },
    /// A hop ceiling of zero would reject every envelope.
    #[error("max_hops must be at least 1")]
    ZeroHopLimit,
}

// ── WorldConfig ────────────────────────────────────────────────────

/// Complete configuration for a [`DistributedWorld`](crate::DistributedWorld).
///
/// Every rank must be given an identical configuration. The toroidal
/// flags are fixed for the life of the world.
#[derive(Clone, Debug, PartialEq)]
pub struct WorldConfig {
    /// Field extent per dimension.
    pub field_size: Vec<i32>,
    /// Whether each dimension wraps.
    pub toroidal: Vec<bool>,
    /// Halo margin per dimension. Also the minimum partition extent.
    pub aoi: Vec<i32>,
    /// Initial layout.
    pub layout: LayoutConfig,
    /// Periodic load balancing.
    pub balance: BalanceConfig,
    /// Relay ceiling for migrating envelopes. `None` = partition count.
    pub max_hops: Option<u8>,
    /// RNG seed. Each rank derives its own stream from it.
    pub seed: u64,
    /// Advance the tick counter straight to the earliest scheduled time
    /// on any rank when every rank is idle until then. Rebalancing
    /// intervals count only the ticks that run. Default: false.
    pub skip_idle: bool,
}

impl WorldConfig {
    /// A configuration with an AOI of one cell, a uniform layout, no
    /// rebalancing and seed 0.
    pub fn new(field_size: &[i32], toroidal: &[bool]) -> Self {
        Self {
            field_size: field_size.to_vec(),
            toroidal: toroidal.to_vec(),
            aoi: vec![1; field_size.len()],
            layout: LayoutConfig::Uniform,
            balance: BalanceConfig::default(),
            max_hops: None,
            seed: 0,
            skip_idle: false,
        }
    }

    /// Number of dimensions.
    pub fn dims(&self) -> usize {
        self.field_size.len()
    }

    /// Validate all structural invariants for a run over `ranks` ranks.
    pub fn validate(&self, ranks: u32) -> Result<(), ConfigError> {
        let dims = self.dims();
        // 1. At least one dimension, and every per-dimension setting
        //    agrees on how many.
        if dims == 0 {
            return Err(ConfigError::NoDimensions);
        }
        for (what, got) in [("toroidal", self.toroidal.len()), ("aoi", self.aoi.len())] {
            if got != dims {
                return Err(ConfigError::DimensionMismatch {
                    what,
                    expected: dims,
                    got,
                });
            }
        }
        // 2. Non-empty extents.
        for (dim, &size) in self.field_size.iter().enumerate() {
            if size <= 0 {
                return Err(ConfigError::EmptyDimension { dim, size });
            }
        }
        // 3. AOI of at least one cell: the neighbour graph, and with it
        //    migration routing, is built from touching halos.
        // 3a. On a toroidal dimension the halo must not reach around the
        //     field onto itself.
        for dim in 0..dims {
            let (aoi, size) = (self.aoi[dim], self.field_size[dim]);
            if aoi < 1 {
                return Err(ConfigError::AoiTooSmall { dim, aoi });
            }
            if self.toroidal[dim] && 2 * aoi >= size {
                return Err(ConfigError::AoiTooWide { dim, aoi, size });
            }
        }
        // 4. The layout must give every rank exactly one partition.
        let fanout = 1u64 << dims;
        match &self.layout {
            LayoutConfig::Uniform => {
                if !ranks.is_power_of_two() {
                    return Err(ConfigError::UnsupportedRankCount { dims, ranks });
                }
            }
            LayoutConfig::SplitPoints(points) => {
                for p in points {
                    let inside = p.len() == dims
                        && p.iter().zip(&self.field_size).all(|(&x, &s)| (0..s).contains(&x));
                    if !inside {
                        return Err(ConfigError::SplitOutsideField { point: p.clone() });
                    }
                }
                let leaves = 1 + points.len() as u64 * (fanout - 1);
                if leaves != u64::from(ranks) {
                    return Err(ConfigError::LeafCountMismatch { leaves, ranks });
                }
            }
        }
        // 5. Balance tolerance.
        let t = self.balance.tolerance;
        if !t.is_finite() || !(0.0..1.0).contains(&t) {
            return Err(ConfigError::InvalidTolerance { value: t });
        }
        // 6. Hop ceiling.
        if self.max_hops == Some(0) {
            return Err(ConfigError::ZeroHopLimit);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn torus() -> WorldConfig {
        WorldConfig::new(&[100, 100], &[true, true])
    }

    #[test]
    fn default_torus_validates_for_powers_of_two() {
        let c = torus();
        for ranks in [1, 2, 4, 8, 16, 64] {
            c.validate(ranks).unwrap();
        }
        assert_eq!(
            c.validate(6),
            Err(ConfigError::UnsupportedRankCount { dims: 2, ranks: 6 })
        );
    }

    #[test]
    fn aoi_checks() {
        let mut c = torus();
        c.aoi = vec![0, 1];
        assert!(matches!(c.validate(4), Err(ConfigError::AoiTooSmall { dim: 0, .. })));
        c.aoi = vec![1, 50];
        assert!(matches!(c.validate(4), Err(ConfigError::AoiTooWide { dim: 1, .. })));
        c.toroidal = vec![true, false];
        c.validate(4).unwrap();
    }

    #[test]
    fn dimension_mismatch_names_the_setting() {
        let mut c = torus();
        c.toroidal = vec![true];
        match c.validate(4) {
            Err(ConfigError::DimensionMismatch { what: "toroidal", expected: 2, got: 1 }) => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn split_points_count_leaves() {
        let mut c = WorldConfig::new(&[30], &[false]);
        c.layout = LayoutConfig::SplitPoints(vec![Coord::from_slice(&[10]), Coord::from_slice(&[20])]);
        c.validate(3).unwrap();
        assert_eq!(
            c.validate(4),
            Err(ConfigError::LeafCountMismatch { leaves: 3, ranks: 4 })
        );
        c.layout = LayoutConfig::SplitPoints(vec![Coord::from_slice(&[30])]);
        assert!(matches!(c.validate(2), Err(ConfigError::SplitOutsideField { .. })));
    }

    #[test]
    fn tolerance_and_hops() {
        let mut c = torus();
        c.balance.tolerance = 1.0;
        assert!(matches!(c.validate(4), Err(ConfigError::InvalidTolerance { .. })));
        c.balance.tolerance = 0.05;
        c.max_hops = Some(0);
        assert_eq!(c.validate(4), Err(ConfigError::ZeroHopLimit));
    }
}
