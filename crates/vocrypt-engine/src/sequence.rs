use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use vocrypt_core::SessionId;

/// Per-session monotonic counters. Numbering starts at 1.
#[derive(Debug, Default)]
pub struct SequenceAllocator {
    counters: DashMap<SessionId, Arc<AtomicU64>>,
}

impl SequenceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, session_id: &SessionId) -> Arc<AtomicU64> {
        if let Some(counter) = self.counters.get(session_id) {
            return Arc::clone(counter.value());
        }
        Arc::clone(self.counters.entry(session_id.clone()).or_default().value())
    }

    /// Issue the next number for `session_id`.
    pub fn next(&self, session_id: &SessionId) -> u64 {
        self.counter(session_id).fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Raise the counter to at least `high_water`. Never lowers it.
    pub fn seed(&self, session_id: &SessionId, high_water: u64) {
        self.counter(session_id)
            .fetch_max(high_water, Ordering::SeqCst);
    }

    /// Forget a session's counter once nothing can allocate from it.
    pub fn release(&self, session_id: &SessionId) {
        self.counters.remove(session_id);
    }

    /// Last issued number, 0 if none.
    pub fn current(&self, session_id: &SessionId) -> u64 {
        self.counters
            .get(session_id)
            .map(|c| c.value().load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}
