//! Hotloop Engine
//!
//! On-stack replacement for interpreters. A long-running loop that is still
//! being interpreted can move into compiled code mid-iteration:
//! - **Frames**: typed slot frames and the copy between interpreter and OSR frames (`frame` module)
//! - **OSR**: back-edge polling, per-unit metadata, compilation, invalidation and stack filtering (`osr` module)
//! - **Call targets**: compiled roots and the per-thread execution context (`call_target` module)
//! - **Bytecode**: a small register interpreter wired for OSR (`bytecode` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use hotloop_engine::{bytecode, OsrConfig, OsrRuntime, Value};
//!
//! let runtime = OsrRuntime::new(OsrConfig::default())?;
//! let (target, _) = bytecode::load(&runtime, bytecode::Sample::Triple);
//! let mut ctx = runtime.context();
//! let result = target.call(&mut ctx, vec![Value::Int(1_000_000)])?;
//! ```

#![warn(rust_2018_idioms)]

// ============================================================================
// Core Modules
// ============================================================================

/// Frames, slot tags and frame transfer
pub mod frame;

/// On-stack replacement
pub mod osr;

/// Call targets and execution contexts
pub mod call_target;

/// Register bytecode interpreter
pub mod bytecode;

// ============================================================================
// Re-exports
// ============================================================================

pub use call_target::{CallTarget, CallTargetId, ExecutionContext, RootBody};
pub use frame::{
    Frame, FrameDescriptor, FrameDescriptorBuilder, FrameId, FrameSlotKind, FrameSlotTypeError, FrameTagMismatch,
    FrameTransferEngine, ObjectRef, TransferPlan, TransferReport, Value,
};
pub use osr::{
    ArtifactKind, BackEdgeCounter, CompileBailout, CompiledArtifact, DirectCompiler, FrameInstance, InterpreterState,
    InvalidationTracker, NodeId, OsrCompiler, OsrConfig, OsrError, OsrMetadata, OsrOperation, OsrResult, OsrRuntime,
    OsrSlot, OsrStats, OsrTarget, OsrUnit, PollPolicy, TargetState, TargetWidth, Tier,
};
