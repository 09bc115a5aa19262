//! On-stack replacement of hot loops
//!
//! A loop-bearing unit polls its back-edges through the execution context.
//! Once the back-edge count crosses the configured threshold, `try_osr`
//! compiles the loop for the current target (synchronously or on the
//! background compiler), copies the live interpreter frame into a fresh OSR
//! frame and runs the compiled entry. On exit the OSR frame is written back
//! so that interpretation can continue on consistent state.
//!
//! Per-unit state lives in `OsrMetadata`, created lazily in the unit's
//! `OsrSlot`. Node replacement and deoptimization invalidate artifacts
//! through the `InvalidationTracker`; stack walks hide OSR activations.

pub mod artifact;
pub mod compiler;
pub mod config;
pub mod coordinator;
pub mod defaults;
pub mod invalidation;
pub mod metadata;
pub mod profiling;
pub mod stack;
pub mod unit;

pub use artifact::{ArtifactKind, CompiledArtifact};
pub use compiler::{
    BackgroundCompiler, CompilationKind, CompilationRequest, CompilationUnit, CompileBailout, CompiledCode,
    DirectCompiler, OsrCompiler,
};
pub use config::{ConfigError, OsrConfig, OPTIONS};
pub use coordinator::OsrRuntime;
pub use invalidation::{InvalidationTracker, NodeId, NodeReplacement};
pub use metadata::{OsrMetadata, OsrStats, TargetState};
pub use profiling::{BackEdgeCounter, PollPolicy};
pub use stack::{FrameInstance, Tier};
pub use unit::{validate_unit, InterpreterState, OsrOperation, OsrSlot, OsrTarget, OsrUnit, TargetWidth, UnitId};

use crate::frame::FrameSlotTypeError;
use thiserror::Error;

/// OSR errors that terminate the call
///
/// Compile bailouts and frame tag mismatches never appear here; they are
/// recovered inside `try_osr`.
#[derive(Debug, Error)]
pub enum OsrError {
    /// A wide-target unit is missing the wide form of an operation
    #[error("wide target used without implementing wide overload of {operation}")]
    OverloadContractViolation { operation: OsrOperation },

    /// Bailouts and recompiles exhausted the configured budget
    #[error("Max OSR compilation re-attempts reached for {unit} after {attempts} attempts")]
    MaxReattemptsReached { unit: String, attempts: u32 },

    /// Typed frame read on a slot holding another kind
    #[error(transparent)]
    SlotType(#[from] FrameSlotTypeError),

    /// Guest execution failed
    #[error("Execution error: {0}")]
    Execution(String),

    /// Invalid runtime configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The background compiler thread could not be started
    #[error("Failed to start background compiler: {0}")]
    CompilerThread(#[source] std::io::Error),
}

/// Result type for OSR operations
pub type OsrResult<T> = Result<T, OsrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overload_violation_names_operation() {
        let err = OsrError::OverloadContractViolation {
            operation: OsrOperation::CopyIntoOsrFrame,
        };
        assert_eq!(
            err.to_string(),
            "wide target used without implementing wide overload of copy_into_osr_frame"
        );
    }

    #[test]
    fn test_max_reattempts_message() {
        let err = OsrError::MaxReattemptsReached {
            unit: "loop".to_string(),
            attempts: 1,
        };
        assert!(err.to_string().contains("Max OSR compilation re-attempts reached"));
    }
}
