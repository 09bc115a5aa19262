//! Back-edge profiling for OSR eligibility

pub mod counters;
pub mod policy;

pub use counters::BackEdgeCounter;
pub use policy::PollPolicy;
