//! The [`Communicator`] trait: collectives consumed by the core.

use tessera_core::{ByteReader, ByteWriter};

use crate::error::CommError;

/// Transport-agnostic collective operations.
///
/// Exchanges are two-phase inside the implementation: buffer sizes are
/// exchanged first, then payloads are received into buffers sized
/// exactly to the announced counts. Callers only see whole buffers.
///
/// # Contract
///
/// - `neighbor_exchange` peer lists must be symmetric: if rank A names
///   B, then B names A in the same round.
/// - `group_exchange` is called by every member of `group` with the same
///   group (in the same order).
/// - Collectives between any pair of ranks happen in the same order on
///   both sides. The in-process transport detects violations as
///   [`CommError::Desync`].
///
/// The trait is object safe, so layers that do not care about the
/// concrete transport take `&mut dyn Communicator`.
pub trait Communicator: Send {
    /// This process's rank in `0..size()`.
    fn rank(&self) -> u32;

    /// Number of ranks taking part in the run.
    fn size(&self) -> u32;

    /// Exchange one buffer with each peer. `sends[i]` goes to `peers[i]`;
    /// the result's `i`-th buffer came from `peers[i]`. The caller's own
    /// rank must not appear in `peers`.
    fn neighbor_exchange(
        &mut self,
        peers: &[u32],
        sends: Vec<Vec<u8>>,
    ) -> Result<Vec<Vec<u8>>, CommError>;

    /// Like [`neighbor_exchange`](Self::neighbor_exchange) but over an
    /// arbitrary subset that includes the caller. The caller's own slot
    /// is delivered back to it without touching the transport.
    fn group_exchange(
        &mut self,
        group: &[u32],
        sends: Vec<Vec<u8>>,
    ) -> Result<Vec<Vec<u8>>, CommError>;

    /// Every rank contributes one buffer; every rank receives all of
    /// them, indexed by rank.
    fn all_gather(&mut self, bytes: Vec<u8>) -> Result<Vec<Vec<u8>>, CommError> {
        let all: Vec<u32> = (0..self.size()).collect();
        let sends = vec![bytes; all.len()];
        self.group_exchange(&all, sends)
    }

    /// Global minimum of one value per rank.
    fn all_reduce_min(&mut self, value: f64) -> Result<f64, CommError> {
        let mut w = ByteWriter::new();
        w.write_f64_le(value);
        let gathered = self.all_gather(w.into_bytes())?;
        let mut min = f64::INFINITY;
        for buf in &gathered {
            let mut r = ByteReader::new(buf);
            min = min.min(r.read_f64_le()?);
            r.finish()?;
        }
        Ok(min)
    }

    /// Block until every rank has reached the barrier.
    fn barrier(&mut self) -> Result<(), CommError> {
        self.all_gather(Vec::new()).map(|_| ())
    }
}
