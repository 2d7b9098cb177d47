//! Cancellation tokens for scheduled entities.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared, idempotently stoppable token returned when an entity is
/// scheduled.
///
/// Every clone observes the same state. Once stopped, a handle never
/// becomes live again; the scheduler silently skips entries whose
/// handle is stopped.
#[derive(Clone, Debug, Default)]
pub struct ScheduleHandle {
    stopped: Arc<AtomicBool>,
}

impl ScheduleHandle {
    /// Create a live handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the handle. Stopping twice is a no-op.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// True once [`stop()`](Self::stop) has been called on any clone.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// True if both handles refer to the same token.
    pub fn same_as(&self, other: &ScheduleHandle) -> bool {
        Arc::ptr_eq(&self.stopped, &other.stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_is_shared_and_idempotent() {
        let h = ScheduleHandle::new();
        let c = h.clone();
        assert!(!c.is_stopped());
        h.stop();
        h.stop();
        assert!(c.is_stopped());
        assert!(h.same_as(&c));
        assert!(!h.same_as(&ScheduleHandle::new()));
    }
}
