//! Test utilities and fixture agents for Tessera development.
//!
//! [`cluster`] runs one closure per rank on an in-process cluster with
//! logging routed to the test harness. [`Walker`] and [`Counter`] are
//! the fixture agent and remote object the scenario tests are written
//! against.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use tessera_comm::{run_local, LocalComm};
use tessera_core::{ByteReader, ByteWriter, CodecError, Coord, FieldId, Wire};
use tessera_engine::{Agent, AgentContext, DistributedWorld, TickError, WorldConfig};
use tessera_remote::RemoteObject;
use tracing_subscriber::EnvFilter;

/// Install a test-writer subscriber once per process. Filter with
/// `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Run `f` on `n` in-process ranks and collect the results in rank
/// order.
pub fn cluster<R, F>(n: u32, f: F) -> Vec<R>
where
    F: Fn(LocalComm) -> R + Sync,
    R: Send,
{
    init_tracing();
    run_local(n, f)
}

// ── Walker ─────────────────────────────────────────────────────────

/// Type tag of [`Walker`].
pub const WALKER: u32 = 0x5741_4c4b;

/// The field a [`Walker`] stamps by default.
pub const TRAIL: FieldId = FieldId(0);

/// Stamps `tick + 1` into its trail field, then moves by `delta`.
#[derive(Clone, Debug, PartialEq)]
pub struct Walker {
    pub delta: Coord,
    pub trail: FieldId,
    pub steps: u32,
}

impl Walker {
    pub fn new(delta: &[i32]) -> Self {
        Self {
            delta: Coord::from_slice(delta),
            trail: TRAIL,
            steps: 0,
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Box<dyn Agent>, CodecError> {
        let mut r = ByteReader::new(bytes);
        let delta = Coord::decode(&mut r)?;
        let trail = FieldId::decode(&mut r)?;
        let steps = r.read_u32_le()?;
        r.finish()?;
        Ok(Box::new(Walker { delta, trail, steps }))
    }
}

impl Agent for Walker {
    fn type_tag(&self) -> u32 {
        WALKER
    }

    fn step(&mut self, ctx: &mut AgentContext<'_>) -> Result<(), TickError> {
        self.steps += 1;
        let here = ctx.position().clone();
        let stamp = ctx.tick() + 1;
        ctx.write(self.trail, &here, stamp)?;
        let next: Coord = here.iter().zip(&self.delta).map(|(x, d)| x + d).collect();
        ctx.move_to(&next)
    }

    fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        self.delta.encode(&mut w);
        self.trail.encode(&mut w);
        w.write_u32_le(self.steps);
        w.into_bytes()
    }
}

/// A world with the [`Walker`] decoder registered and a `u64` trail
/// field at [`TRAIL`].
pub fn walker_world(
    config: WorldConfig,
    comm: LocalComm,
) -> Result<DistributedWorld<LocalComm>, TickError> {
    let mut world = DistributedWorld::new(config, comm)?;
    world.register_agent(WALKER, Walker::decode);
    world.add_field::<u64>(TRAIL, "trail")?;
    Ok(world)
}

// ── Counter ────────────────────────────────────────────────────────

/// Remote object answering every request with the next value of a
/// counter, encoded as `u64`.
#[derive(Debug, Default)]
pub struct Counter {
    pub next: u64,
}

impl RemoteObject for Counter {
    fn respond(&mut self, _selector: u32, _arg: &[u8]) -> Result<Vec<u8>, String> {
        self.next += 1;
        let mut w = ByteWriter::new();
        w.write_u64_le(self.next);
        Ok(w.into_bytes())
    }
}
