//! In-process transport: one thread per rank, crossbeam channels between
//! every ordered pair of ranks.

use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::trace;

use crate::communicator::Communicator;
use crate::error::CommError;

/// Default time a rank waits for a peer before reporting a timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

// ── Frame ───────────────────────────────────────────────────────

/// One message on a pair channel. `seq` counts frames per ordered pair
/// so both ends can detect a protocol desync.
#[derive(Debug)]
struct Frame {
    seq: u64,
    body: FrameBody,
}

#[derive(Debug)]
enum FrameBody {
    Size(u64),
    Payload(Vec<u8>),
}

impl FrameBody {
    fn kind(&self) -> &'static str {
        match self {
            Self::Size(_) => "size",
            Self::Payload(_) => "payload",
        }
    }
}

// ── LocalCluster ────────────────────────────────────────────────

/// Factory for the endpoints of an in-process cluster.
pub struct LocalCluster;

impl LocalCluster {
    /// Build `n` connected endpoints, one per rank, indexed by rank.
    pub fn new(n: u32) -> Vec<LocalComm> {
        let n_us = n as usize;
        let mut tx: Vec<Vec<Sender<Frame>>> =
            (0..n_us).map(|_| Vec::with_capacity(n_us)).collect();
        let mut rx: Vec<Vec<Receiver<Frame>>> =
            (0..n_us).map(|_| Vec::with_capacity(n_us)).collect();
        for src in 0..n_us {
            for dst_rx in rx.iter_mut() {
                let (s, r) = unbounded();
                tx[src].push(s);
                dst_rx.push(r);
            }
        }
        tx.into_iter()
            .zip(rx)
            .enumerate()
            .map(|(rank, (tx, rx))| LocalComm {
                rank: rank as u32,
                size: n,
                tx,
                rx,
                seq_out: vec![0; n_us],
                seq_in: vec![0; n_us],
                timeout: DEFAULT_TIMEOUT,
            })
            .collect()
    }
}

/// Run `f` once per rank on its own thread and collect the results in
/// rank order.
///
/// A panic on any rank disconnects its channels, which makes its peers
/// fail their next collective with [`CommError::Disconnected`]; the
/// first panic is then re-raised on the calling thread.
pub fn run_local<R, F>(n: u32, f: F) -> Vec<R>
where
    F: Fn(LocalComm) -> R + Sync,
    R: Send,
{
    let comms = LocalCluster::new(n);
    std::thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let f = &f;
                s.spawn(move || f(comm))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| match h.join() {
                Ok(r) => r,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    })
}

// ── LocalComm ───────────────────────────────────────────────────

/// One rank's endpoint of a [`LocalCluster`].
///
/// [`Send`] so it can be moved onto the rank's thread; not shared.
pub struct LocalComm {
    rank: u32,
    size: u32,
    /// Senders indexed by destination rank.
    tx: Vec<Sender<Frame>>,
    /// Receivers indexed by source rank.
    rx: Vec<Receiver<Frame>>,
    seq_out: Vec<u64>,
    seq_in: Vec<u64>,
    timeout: Duration,
}

impl LocalComm {
    /// Replace the per-receive timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn check_peer(&self, peer: u32) -> Result<(), CommError> {
        if peer >= self.size {
            return Err(CommError::PeerOutOfRange {
                peer,
                size: self.size,
            });
        }
        Ok(())
    }

    fn send(&mut self, peer: u32, body: FrameBody) -> Result<(), CommError> {
        let p = peer as usize;
        let seq = self.seq_out[p];
        self.seq_out[p] += 1;
        self.tx[p]
            .send(Frame { seq, body })
            .map_err(|_| CommError::Disconnected { peer })
    }

    fn recv_size(&mut self, peer: u32) -> Result<u64, CommError> {
        match self.recv(peer, "size")? {
            FrameBody::Size(n) => Ok(n),
            other => Err(CommError::Desync {
                peer,
                expected: "size",
                got: other.kind(),
            }),
        }
    }

    fn recv_payload(&mut self, peer: u32) -> Result<Vec<u8>, CommError> {
        match self.recv(peer, "payload")? {
            FrameBody::Payload(bytes) => Ok(bytes),
            other => Err(CommError::Desync {
                peer,
                expected: "payload",
                got: other.kind(),
            }),
        }
    }

    fn recv(&mut self, peer: u32, expected: &'static str) -> Result<FrameBody, CommError> {
        let p = peer as usize;
        let frame = match self.rx[p].recv_timeout(self.timeout) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => {
                return Err(CommError::Timeout {
                    peer,
                    phase: expected,
                })
            }
            Err(RecvTimeoutError::Disconnected) => return Err(CommError::Disconnected { peer }),
        };
        if frame.seq != self.seq_in[p] || frame.body.kind() != expected {
            return Err(CommError::Desync {
                peer,
                expected,
                got: frame.body.kind(),
            });
        }
        self.seq_in[p] += 1;
        Ok(frame.body)
    }

    /// Two-phase exchange with `peers`. Slots whose peer is this rank are
    /// passed through locally.
    fn exchange(
        &mut self,
        peers: &[u32],
        sends: Vec<Vec<u8>>,
    ) -> Result<Vec<Vec<u8>>, CommError> {
        if peers.len() != sends.len() {
            return Err(CommError::BufferCountMismatch {
                peers: peers.len(),
                buffers: sends.len(),
            });
        }
        for &peer in peers {
            self.check_peer(peer)?;
        }

        // Phase 1: sizes.
        for (&peer, buf) in peers.iter().zip(&sends) {
            if peer != self.rank {
                self.send(peer, FrameBody::Size(buf.len() as u64))?;
            }
        }
        let mut announced = Vec::with_capacity(peers.len());
        for &peer in peers {
            if peer == self.rank {
                announced.push(0);
                continue;
            }
            announced.push(self.recv_size(peer)?);
        }

        // Phase 2: payloads, received into exactly sized buffers.
        let mut own = Vec::new();
        for (&peer, buf) in peers.iter().zip(sends) {
            if peer == self.rank {
                own = buf;
            } else {
                self.send(peer, FrameBody::Payload(buf))?;
            }
        }
        let mut out = Vec::with_capacity(peers.len());
        let mut own = Some(own);
        for (&peer, &size) in peers.iter().zip(&announced) {
            if peer == self.rank {
                out.push(own.take().unwrap_or_default());
                continue;
            }
            let mut buf = Vec::with_capacity(size as usize);
            buf.extend_from_slice(&self.recv_payload(peer)?);
            if buf.len() as u64 != size {
                return Err(CommError::SizeMismatch {
                    peer,
                    announced: size,
                    received: buf.len() as u64,
                });
            }
            out.push(buf);
        }
        trace!(
            rank = self.rank,
            peers = peers.len(),
            received = out.iter().map(Vec::len).sum::<usize>(),
            "exchange complete"
        );
        Ok(out)
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> u32 {
        self.rank
    }

    fn size(&self) -> u32 {
        self.size
    }

    fn neighbor_exchange(
        &mut self,
        peers: &[u32],
        sends: Vec<Vec<u8>>,
    ) -> Result<Vec<Vec<u8>>, CommError> {
        if peers.contains(&self.rank) {
            return Err(CommError::PeerOutOfRange {
                peer: self.rank,
                size: self.size,
            });
        }
        self.exchange(peers, sends)
    }

    fn group_exchange(
        &mut self,
        group: &[u32],
        sends: Vec<Vec<u8>>,
    ) -> Result<Vec<Vec<u8>>, CommError> {
        if !group.contains(&self.rank) {
            return Err(CommError::NotInGroup { rank: self.rank });
        }
        self.exchange(group, sends)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_neighbor_exchange() {
        let results = run_local(4, |mut comm| {
            let r = comm.rank();
            let left = (r + 3) % 4;
            let right = (r + 1) % 4;
            let recv = comm
                .neighbor_exchange(&[left, right], vec![vec![r as u8; 1], vec![r as u8; 2]])
                .unwrap();
            (r, recv)
        });
        for (r, recv) in results {
            let left = (r + 3) % 4;
            let right = (r + 1) % 4;
            // Left neighbour sent us its "right" buffer (two bytes) and
            // vice versa.
            assert_eq!(recv[0], vec![left as u8; 2]);
            assert_eq!(recv[1], vec![right as u8; 1]);
        }
    }

    #[test]
    fn all_gather_is_indexed_by_rank() {
        let results = run_local(3, |mut comm| {
            let me = comm.rank();
            comm.all_gather(vec![me as u8 * 10]).unwrap()
        });
        for gathered in results {
            assert_eq!(gathered, vec![vec![0], vec![10], vec![20]]);
        }
    }

    #[test]
    fn all_reduce_min_agrees_everywhere() {
        let results = run_local(5, |mut comm| {
            let v = 10.0 - comm.rank() as f64;
            comm.all_reduce_min(v).unwrap()
        });
        assert!(results.iter().all(|&m| m == 6.0));
    }

    #[test]
    fn group_exchange_includes_self_slot() {
        let results = run_local(4, |mut comm| {
            let me = comm.rank();
            if me < 2 {
                let out = comm
                    .group_exchange(&[0, 1], vec![vec![me as u8], vec![me as u8 + 100]])
                    .unwrap();
                Some(out)
            } else {
                None
            }
        });
        assert_eq!(results[0], Some(vec![vec![0], vec![1]]));
        assert_eq!(results[1], Some(vec![vec![100], vec![101]]));
        assert_eq!(results[2], None);
    }

    #[test]
    fn self_as_neighbor_is_rejected() {
        let mut comms = LocalCluster::new(2);
        let mut c0 = comms.remove(0);
        match c0.neighbor_exchange(&[0], vec![vec![]]) {
            Err(CommError::PeerOutOfRange { peer: 0, .. }) => {}
            other => panic!("expected PeerOutOfRange, got {other:?}"),
        }
    }

    #[test]
    fn buffer_count_mismatch_is_rejected() {
        let mut comms = LocalCluster::new(2);
        let mut c0 = comms.remove(0);
        match c0.neighbor_exchange(&[1], vec![]) {
            Err(CommError::BufferCountMismatch {
                peers: 1,
                buffers: 0,
            }) => {}
            other => panic!("expected BufferCountMismatch, got {other:?}"),
        }
    }

    #[test]
    fn dropped_peer_reports_disconnect() {
        let mut comms = LocalCluster::new(2);
        let c1 = comms.pop().unwrap();
        let mut c0 = comms.pop().unwrap();
        drop(c1);
        match c0.neighbor_exchange(&[1], vec![vec![1, 2, 3]]) {
            Err(CommError::Disconnected { peer: 1 }) => {}
            other => panic!("expected Disconnected, got {other:?}"),
        }
    }

    #[test]
    fn silent_peer_times_out() {
        let mut comms = LocalCluster::new(2);
        let _c1 = comms.pop().unwrap();
        let mut c0 = comms
            .pop()
            .unwrap()
            .with_timeout(Duration::from_millis(20));
        match c0.neighbor_exchange(&[1], vec![vec![]]) {
            Err(CommError::Timeout {
                peer: 1,
                phase: "size",
            }) => {}
            other => panic!("expected Timeout, got {other:?}"),
        }
    }
}
