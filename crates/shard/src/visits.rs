use std::sync::atomic::{AtomicU64, Ordering};

/// Request counter sampled by the rebalancer
#[derive(Debug, Default)]
pub struct VisitCounter {
    count: AtomicU64,
}

impl VisitCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Reset to zero, returning the previous count
    pub fn clear(&self) -> u64 {
        self.count.swap(0, Ordering::Relaxed)
    }
}
