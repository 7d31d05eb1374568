use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic millisecond clock shared by the simulated collaborators. Only
/// the run loop moves it.
#[derive(Debug, Clone, Default)]
pub struct SimulatedClock {
    now_ms: Arc<AtomicU64>,
}

impl SimulatedClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::Acquire)
    }

    /// Moves the clock forward to `now_ms`. Never moves it back.
    pub fn advance_to(&self, now_ms: u64) {
        self.now_ms.fetch_max(now_ms, Ordering::AcqRel);
    }
}
