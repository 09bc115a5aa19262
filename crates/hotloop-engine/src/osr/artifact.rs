//! Compiled artifacts
//!
//! An artifact is the handle to code produced for one root call target or
//! one OSR target. Invalidation flips a flag but keeps the artifact in its
//! owner's map; a later recompile revalidates the same artifact in place and
//! bumps its generation.
//!
//! The handle itself is not callable. An OSR artifact is run through its
//! unit's `OsrUnit::execute_osr` (or `execute_osr_wide`) while the artifact
//! sits on the execution stack, and a root artifact through its call target.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::compiler::CompiledCode;
use super::invalidation::NodeId;
use super::unit::UnitId;
use crate::call_target::CallTargetId;

/// What an artifact was compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Whole root call target
    Root { root: NodeId },
    /// OSR entry of a unit
    Osr { unit: UnitId, target: i64 },
}

/// Handle to generated code
pub struct CompiledArtifact {
    id: CallTargetId,
    kind: ArtifactKind,
    name: String,
    code: RwLock<CompiledCode>,
    valid: AtomicBool,
    generation: AtomicU32,
}

impl CompiledArtifact {
    /// Create a valid artifact with a fresh call target id
    pub fn new(kind: ArtifactKind, name: impl Into<String>, code: CompiledCode) -> Arc<Self> {
        Arc::new(CompiledArtifact {
            id: CallTargetId::next(),
            kind,
            name: name.into(),
            code: RwLock::new(code),
            valid: AtomicBool::new(true),
            generation: AtomicU32::new(1),
        })
    }

    /// Call target identity of this artifact
    pub fn id(&self) -> CallTargetId {
        self.id
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_osr(&self) -> bool {
        matches!(self.kind, ArtifactKind::Osr { .. })
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Mark the artifact invalid; returns true if it was valid
    pub fn invalidate(&self) -> bool {
        self.valid.swap(false, Ordering::AcqRel)
    }

    /// Install freshly compiled code and mark the artifact valid again
    pub fn revalidate(&self, code: CompiledCode) {
        *self.code.write() = code;
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.valid.store(true, Ordering::Release);
    }

    /// Number of times code has been installed into this artifact
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    /// Snapshot of the installed code
    pub fn code(&self) -> CompiledCode {
        self.code.read().clone()
    }
}

impl fmt::Debug for CompiledArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledArtifact")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("valid", &self.is_valid())
            .field("generation", &self.generation())
            .finish()
    }
}
