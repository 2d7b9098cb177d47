//! Per-tick counters and phase timings.

/// Counters and timings collected during a single tick on one rank.
///
/// All durations are in microseconds. [`DistributedWorld::step`](crate::DistributedWorld::step)
/// returns the metrics of the tick it ran; the most recent are also kept
/// on the world.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickMetrics {
    /// The tick these metrics describe.
    pub tick: u64,
    /// Layout version at the end of the tick.
    pub layout_version: u64,
    /// Agents stepped during the local phase.
    pub agents_stepped: usize,
    /// Agents resident after the tick.
    pub agents_resident: usize,
    /// Halo payload bytes sent, over all fields.
    pub halo_bytes_sent: usize,
    /// Halo payload bytes received, over all fields.
    pub halo_bytes_received: usize,
    /// Envelopes shipped to neighbours.
    pub envelopes_sent: usize,
    /// Envelopes delivered locally.
    pub envelopes_delivered: usize,
    /// Envelopes received for forwarding.
    pub envelopes_relayed: usize,
    /// Remote requests sent.
    pub requests_sent: usize,
    /// Remote requests answered by this rank.
    pub requests_served: usize,
    /// Entity requests this rank passed on to the entity's holder.
    pub requests_forwarded: usize,
    /// Promises fulfilled on this rank.
    pub promises_fulfilled: usize,
    /// Earliest scheduled time on any rank after the tick (infinite when
    /// every schedule is empty).
    pub global_next_time: f64,
    /// Idle ticks jumped over after this one.
    pub ticks_skipped: u64,
    /// True if a rebalance changed the layout this tick.
    pub rebalanced: bool,
    /// Wall-clock time for the entire tick.
    pub total_us: u64,
    /// Local agent stepping.
    pub step_us: u64,
    /// Halo synchronization.
    pub halo_us: u64,
    /// Migration exchange and delivery.
    pub migrate_us: u64,
    /// Remote maintenance.
    pub remote_us: u64,
    /// Rebalancing and layout commit.
    pub balance_us: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_metrics_are_zero() {
        let m = TickMetrics::default();
        assert_eq!(m.tick, 0);
        assert_eq!(m.agents_stepped, 0);
        assert_eq!(m.halo_bytes_sent, 0);
        assert!(!m.rebalanced);
        assert_eq!(m.global_next_time, 0.0);
    }
}
