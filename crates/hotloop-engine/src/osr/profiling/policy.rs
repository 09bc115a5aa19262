//! Poll policy: decides when a back-edge checks OSR eligibility
//!
//! Eligibility is only checked on poll points, i.e. when the running count
//! reaches a multiple of the poll interval, and only once the count is at
//! or above the compilation threshold. A threshold that is not itself a
//! multiple of the interval therefore fires at the next poll point, less
//! than one interval later.

use super::counters::BackEdgeCounter;
use crate::osr::config::OsrConfig;

/// Threshold and interval for back-edge polling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Back-edges before a loop is eligible
    pub threshold: u64,
    /// Back-edges between two checks
    pub interval: u64,
}

impl PollPolicy {
    /// Create a policy; a zero interval is treated as one
    pub fn new(threshold: u64, interval: u64) -> Self {
        PollPolicy {
            threshold,
            interval: interval.max(1),
        }
    }

    /// Policy for the given configuration
    pub fn from_config(config: &OsrConfig) -> Self {
        Self::new(config.compilation_threshold, config.poll_interval)
    }

    /// Whether a move of the count from `previous` to `current` passes a poll point
    pub fn crosses(&self, previous: u64, current: u64) -> bool {
        current >= self.threshold && current / self.interval > previous / self.interval
    }

    /// Record `n` back-edges on `counter` and report whether to poll
    pub fn poll(&self, counter: &BackEdgeCounter, n: u64) -> bool {
        let (previous, current) = counter.increment(n);
        self.crosses(previous, current)
    }

    /// Upper bound on back-edges past the threshold before the first poll fires
    pub fn max_slack(&self) -> u64 {
        self.interval - 1
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from_config(&OsrConfig::default())
    }
}
