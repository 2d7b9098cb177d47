//! Discrete-time agent schedule with cancellable handles.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tessera_core::{EntityId, ScheduleHandle};

/// An entry popped by [`Schedule::pop_due`].
#[derive(Clone, Debug)]
pub struct Due {
    /// The entity to step.
    pub entity: EntityId,
    /// Time the entry was scheduled for.
    pub time: f64,
    /// Tie-break among entries due at the same time.
    pub ordering: i32,
    /// Steps between repeats; zero or negative for one-shot.
    pub interval: f64,
    /// The entry's handle.
    pub handle: ScheduleHandle,
}

#[derive(Debug)]
struct Entry {
    due: Due,
    seq: u64,
}

impl Entry {
    fn key(&self) -> (f64, i32, u64) {
        (self.due.time, self.due.ordering, self.seq)
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed so the max-heap pops the earliest (time, ordering, seq).
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        let (t1, o1, s1) = self.key();
        let (t2, o2, s2) = other.key();
        t2.total_cmp(&t1).then(o2.cmp(&o1)).then(s2.cmp(&s1))
    }
}

/// Priority queue of scheduled entities, earliest first; equal times
/// by ordering, then by insertion.
#[derive(Debug, Default)]
pub struct Schedule {
    heap: BinaryHeap<Entry>,
    seq: u64,
}

impl Schedule {
    /// An empty schedule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `entity` at `time` under a fresh handle.
    pub fn schedule(
        &mut self,
        entity: EntityId,
        time: f64,
        ordering: i32,
        interval: f64,
    ) -> ScheduleHandle {
        let handle = ScheduleHandle::new();
        self.push(Due {
            entity,
            time,
            ordering,
            interval,
            handle: handle.clone(),
        });
        handle
    }

    /// Schedule under an existing handle (repeats keep their handle so
    /// one `stop()` cancels every future step).
    pub fn push(&mut self, due: Due) {
        let seq = self.seq;
        self.seq += 1;
        self.heap.push(Entry { due, seq });
    }

    /// Pop every live entry due at or before `now`, in step order.
    /// Entries whose handle was stopped are discarded.
    pub fn pop_due(&mut self, now: f64) -> Vec<Due> {
        let mut out = Vec::new();
        while self.heap.peek().is_some_and(|e| e.due.time <= now) {
            if let Some(entry) = self.heap.pop() {
                if !entry.due.handle.is_stopped() {
                    out.push(entry.due);
                }
            }
        }
        out
    }

    /// Time of the earliest live entry.
    pub fn next_time(&mut self) -> Option<f64> {
        while self.heap.peek().is_some_and(|e| e.due.handle.is_stopped()) {
            self.heap.pop();
        }
        self.heap.peek().map(|e| e.due.time)
    }

    /// Entries in the queue, including stopped ones not yet discarded.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e(n: u32) -> EntityId {
        EntityId::new(0, n)
    }

    #[test]
    fn pops_by_time_then_ordering_then_insertion() {
        let mut s = Schedule::new();
        s.schedule(e(0), 2.0, 0, 0.0);
        s.schedule(e(1), 1.0, 5, 0.0);
        s.schedule(e(2), 1.0, -1, 0.0);
        s.schedule(e(3), 1.0, 5, 0.0);
        let order: Vec<EntityId> = s.pop_due(1.0).into_iter().map(|d| d.entity).collect();
        assert_eq!(order, vec![e(2), e(1), e(3)]);
        assert_eq!(s.next_time(), Some(2.0));
    }

    #[test]
    fn stopped_entries_never_pop() {
        let mut s = Schedule::new();
        let h = s.schedule(e(0), 0.0, 0, 1.0);
        s.schedule(e(1), 3.0, 0, 0.0);
        h.stop();
        h.stop();
        assert!(s.pop_due(0.0).is_empty());
        assert_eq!(s.next_time(), Some(3.0));
    }

    #[test]
    fn entries_added_after_pop_wait_for_the_next_call() {
        let mut s = Schedule::new();
        s.schedule(e(0), 0.0, 0, 0.0);
        let due = s.pop_due(0.0);
        assert_eq!(due.len(), 1);
        s.schedule(e(1), 0.0, 0, 0.0);
        assert_eq!(s.len(), 1);
        assert_eq!(s.pop_due(0.0).len(), 1);
        assert!(s.is_empty());
        assert_eq!(s.next_time(), None);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn pop_due_is_sorted_and_bounded(
                entries in prop::collection::vec((0u8..8, -3i32..3), 0..64),
                now in 0u8..8,
            ) {
                let mut s = Schedule::new();
                for (i, (t, o)) in entries.iter().enumerate() {
                    s.schedule(e(i as u32), f64::from(*t), *o, 0.0);
                }
                let due = s.pop_due(f64::from(now));
                let expected = entries.iter().filter(|(t, _)| *t <= now).count();
                prop_assert_eq!(due.len(), expected);
                for pair in due.windows(2) {
                    let a = (pair[0].time, pair[0].ordering);
                    let b = (pair[1].time, pair[1].ordering);
                    prop_assert!(a <= b);
                }
                prop_assert_eq!(s.len(), entries.len() - expected);
            }
        }
    }
}
