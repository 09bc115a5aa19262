//! Stack introspection that hides OSR activations
//!
//! The execution context records one entry per activation: ordinary calls
//! of call targets and OSR activations running an artifact on a fresh OSR
//! frame. Diagnostic walks only ever see the calls. An OSR activation is
//! folded into the call it belongs to (the nearest call below it), which
//! then reports the frame of its newest OSR activation, since that frame
//! holds the up-to-date state.

use std::sync::Arc;

use super::artifact::CompiledArtifact;
use crate::call_target::CallTargetId;
use crate::frame::FrameId;

/// Execution tier of an activation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Interpreted,
    Compiled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryKind {
    Call,
    Osr,
}

/// One activation on the execution context's stack
#[derive(Debug, Clone)]
pub(crate) struct StackEntry {
    pub(crate) kind: EntryKind,
    pub(crate) call_target: CallTargetId,
    pub(crate) frame: FrameId,
    pub(crate) tier: Tier,
    pub(crate) artifact: Option<Arc<CompiledArtifact>>,
}

impl StackEntry {
    pub(crate) fn call(call_target: CallTargetId, frame: FrameId, artifact: Option<Arc<CompiledArtifact>>) -> Self {
        let tier = match &artifact {
            Some(a) if a.is_valid() => Tier::Compiled,
            _ => Tier::Interpreted,
        };
        StackEntry { kind: EntryKind::Call, call_target, frame, tier, artifact }
    }

    pub(crate) fn osr(artifact: Arc<CompiledArtifact>, frame: FrameId, tier: Tier) -> Self {
        StackEntry {
            kind: EntryKind::Osr,
            call_target: artifact.id(),
            frame,
            tier,
            artifact: Some(artifact),
        }
    }
}

/// A logical activation as seen by stack walks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInstance {
    call_target: CallTargetId,
    frame: FrameId,
    tier: Tier,
    depth: usize,
}

impl FrameInstance {
    pub fn call_target(&self) -> CallTargetId {
        self.call_target
    }

    /// Frame holding this activation's current state
    pub fn frame_id(&self) -> FrameId {
        self.frame
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn is_compiled(&self) -> bool {
        self.tier == Tier::Compiled
    }

    /// Position from the innermost activation, starting at 0
    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Iterator over visible activations, innermost first
pub struct FrameIter<'a> {
    entries: std::iter::Rev<std::slice::Iter<'a, StackEntry>>,
    depth: usize,
}

impl<'a> FrameIter<'a> {
    pub(crate) fn new(entries: &'a [StackEntry]) -> Self {
        FrameIter { entries: entries.iter().rev(), depth: 0 }
    }
}

impl Iterator for FrameIter<'_> {
    type Item = FrameInstance;

    fn next(&mut self) -> Option<FrameInstance> {
        let mut newest_osr: Option<&StackEntry> = None;
        for entry in self.entries.by_ref() {
            match entry.kind {
                EntryKind::Osr => {
                    // Older OSR activations of the same call are suppressed
                    if newest_osr.is_none() {
                        newest_osr = Some(entry);
                    }
                }
                EntryKind::Call => {
                    let state = newest_osr.unwrap_or(entry);
                    let instance = FrameInstance {
                        call_target: entry.call_target,
                        frame: state.frame,
                        tier: state.tier,
                        depth: self.depth,
                    };
                    self.depth += 1;
                    return Some(instance);
                }
            }
        }
        None
    }
}
