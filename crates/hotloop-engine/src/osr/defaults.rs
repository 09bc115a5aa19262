//! Default constants for OSR configuration.
//!
//! Shared by `OsrConfig::default()`, the option table printed by the CLI,
//! and the tests that reason about poll points.

/// Back-edges polled between two OSR eligibility checks.
pub const DEFAULT_POLL_INTERVAL: u64 = 1024;

/// Back-edge count at which a loop becomes eligible for OSR (98 poll intervals).
pub const DEFAULT_COMPILATION_THRESHOLD: u64 = 98 * DEFAULT_POLL_INTERVAL;

/// Compile bailouts and invalidated recompiles tolerated per unit.
pub const DEFAULT_MAX_REATTEMPTS: u32 = 30;

/// Calls before a root call target compiles itself.
pub const DEFAULT_ROOT_COMPILATION_THRESHOLD: u32 = 1000;

/// Pending requests the background compiler queue holds before rejecting.
pub const DEFAULT_COMPILE_QUEUE_CAPACITY: usize = 256;

/// Name of the background compilation thread.
pub const COMPILER_THREAD_NAME: &str = "hotloop-osr-compiler";
