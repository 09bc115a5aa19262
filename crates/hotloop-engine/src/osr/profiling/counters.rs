//! Back-edge counters for hot loop detection
//!
//! Atomic counters that the interpreter bumps on every taken back-edge of
//! an OSR-capable unit. Counts accumulate across calls until the profile
//! is reset.

use std::sync::atomic::{AtomicU64, Ordering};

/// Back-edge counter for a single OSR-capable unit
#[derive(Debug, Default)]
pub struct BackEdgeCounter {
    /// Number of back-edges taken since the last reset
    back_edges: AtomicU64,
}

impl BackEdgeCounter {
    /// Create a counter at zero
    pub fn new() -> Self {
        BackEdgeCounter {
            back_edges: AtomicU64::new(0),
        }
    }

    /// Record `n` back-edges, return `(previous, new)` counts
    pub fn increment(&self, n: u64) -> (u64, u64) {
        let previous = self.back_edges.fetch_add(n, Ordering::Relaxed);
        (previous, previous.saturating_add(n))
    }

    /// Current count
    pub fn count(&self) -> u64 {
        self.back_edges.load(Ordering::Relaxed)
    }

    /// Zero the counter
    pub fn reset(&self) {
        self.back_edges.store(0, Ordering::Relaxed);
    }
}
