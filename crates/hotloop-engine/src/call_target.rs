//! Root call targets and the per-thread execution context
//!
//! A `CallTarget` wraps a root body with its frame descriptor. It counts
//! calls and compiles itself once the single-tier threshold is reached;
//! while its artifact is valid, calls run in the compiled tier.
//!
//! The `ExecutionContext` is the interpreter's view of one thread: the stack
//! of activations with their tiers, the deoptimization primitives and stack
//! introspection. OSR polling and entry live in `osr::coordinator`.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::frame::{Frame, FrameDescriptor, Value};
use crate::osr::artifact::{ArtifactKind, CompiledArtifact};
use crate::osr::compiler::CompilationUnit;
use crate::osr::coordinator::OsrRuntime;
use crate::osr::invalidation::NodeId;
use crate::osr::stack::{EntryKind, FrameInstance, FrameIter, StackEntry, Tier};
use crate::osr::OsrResult;

/// Identity shared by call targets and compiled OSR artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallTargetId(u64);

impl CallTargetId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        CallTargetId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for CallTargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target#{}", self.0)
    }
}

/// Body of a root
pub trait RootBody: Send + Sync {
    fn execute(&self, frame: &mut Frame, ctx: &mut ExecutionContext<'_>) -> OsrResult<Value>;
}

/// A callable root
pub struct CallTarget {
    id: CallTargetId,
    root: NodeId,
    name: String,
    descriptor: Arc<FrameDescriptor>,
    body: Arc<dyn RootBody>,
    artifact: RwLock<Option<Arc<CompiledArtifact>>>,
    call_count: AtomicU32,
    uncompilable: AtomicBool,
}

impl CallTarget {
    pub fn new(root: NodeId, name: &str, descriptor: Arc<FrameDescriptor>, body: Arc<dyn RootBody>) -> Arc<Self> {
        Arc::new(CallTarget {
            id: CallTargetId::next(),
            root,
            name: name.to_string(),
            descriptor,
            body,
            artifact: RwLock::new(None),
            call_count: AtomicU32::new(0),
            uncompilable: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> CallTargetId {
        self.id
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &Arc<FrameDescriptor> {
        &self.descriptor
    }

    /// Calls since creation or the last profile reset
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Zero the call count so the root is not compiled right away
    pub fn reset_compilation_profile(&self) {
        self.call_count.store(0, Ordering::Relaxed);
    }

    /// Compiled artifact of the root, valid or not
    pub fn artifact(&self) -> Option<Arc<CompiledArtifact>> {
        self.artifact.read().clone()
    }

    /// Whether the root currently has valid compiled code
    pub fn is_valid(&self) -> bool {
        self.artifact.read().as_ref().is_some_and(|a| a.is_valid())
    }

    /// Invoke the root with a fresh frame
    pub fn call(&self, ctx: &mut ExecutionContext<'_>, arguments: Vec<Value>) -> OsrResult<Value> {
        let calls = self.call_count.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        let artifact = self.compiled_for_call(ctx.runtime(), calls);

        let mut frame = Frame::new(Arc::clone(&self.descriptor), arguments);
        ctx.push(StackEntry::call(self.id, frame.id(), artifact));
        let result = self.body.execute(&mut frame, ctx);
        ctx.pop();
        result
    }

    fn compiled_for_call(&self, runtime: &OsrRuntime, calls: u32) -> Option<Arc<CompiledArtifact>> {
        let current = self.artifact();
        if current.as_ref().is_some_and(|a| a.is_valid()) {
            return current;
        }
        if calls < runtime.config().root_compilation_threshold || self.uncompilable.load(Ordering::Relaxed) {
            return None;
        }

        let unit = CompilationUnit::root(&self.name, self.descriptor.slot_count());
        match runtime.compiler().compile(&unit) {
            Ok(code) => {
                let mut slot = self.artifact.write();
                let artifact = match slot.as_ref() {
                    Some(existing) => {
                        existing.revalidate(code);
                        Arc::clone(existing)
                    }
                    None => {
                        let created = CompiledArtifact::new(ArtifactKind::Root { root: self.root }, &self.name, code);
                        runtime.tracker().register_root_artifact(self.root, &created);
                        *slot = Some(Arc::clone(&created));
                        created
                    }
                };
                debug!(target_name = %self.name, calls, "root compiled");
                Some(artifact)
            }
            Err(bailout) => {
                warn!(target_name = %self.name, "{}", bailout);
                self.uncompilable.store(true, Ordering::Relaxed);
                None
            }
        }
    }
}

impl fmt::Debug for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallTarget")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("calls", &self.call_count())
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// One thread's execution state
pub struct ExecutionContext<'rt> {
    runtime: &'rt OsrRuntime,
    stack: Vec<StackEntry>,
}

impl<'rt> ExecutionContext<'rt> {
    pub fn new(runtime: &'rt OsrRuntime) -> Self {
        ExecutionContext { runtime, stack: Vec::new() }
    }

    pub fn runtime(&self) -> &'rt OsrRuntime {
        self.runtime
    }

    /// Call another target from the current activation
    pub fn call(&mut self, target: &CallTarget, arguments: Vec<Value>) -> OsrResult<Value> {
        target.call(self, arguments)
    }

    /// Activations on the stack, OSR activations included
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Tier of the innermost activation
    pub fn tier(&self) -> Tier {
        self.stack.last().map_or(Tier::Interpreted, |e| e.tier)
    }

    pub fn in_compiled_code(&self) -> bool {
        self.tier() == Tier::Compiled
    }

    pub fn in_interpreter(&self) -> bool {
        self.tier() == Tier::Interpreted
    }

    /// Deoptimize the innermost activation
    pub fn transfer_to_interpreter(&mut self) {
        if let Some(entry) = self.stack.last_mut() {
            entry.tier = Tier::Interpreted;
        }
    }

    /// Deoptimize the innermost activation and invalidate its code
    pub fn transfer_to_interpreter_and_invalidate(&mut self) {
        if let Some(entry) = self.stack.last_mut() {
            if entry.tier == Tier::Compiled {
                if let Some(artifact) = &entry.artifact {
                    if artifact.invalidate() {
                        debug!(artifact = artifact.name(), "deoptimized and invalidated");
                    }
                }
            }
            entry.tier = Tier::Interpreted;
        }
    }

    /// Visible activations, innermost first
    pub fn iterate_frames(&self) -> FrameIter<'_> {
        FrameIter::new(&self.stack)
    }

    /// Call target of the visible activation `skip` levels out
    pub fn caller_target(&self, skip: usize) -> Option<CallTargetId> {
        self.iterate_frames().nth(skip).map(|f| f.call_target())
    }

    /// Innermost visible activation
    pub fn current_frame(&self) -> Option<FrameInstance> {
        self.iterate_frames().next()
    }

    /// Number of OSR activations on the stack
    pub fn osr_depth(&self) -> usize {
        self.stack.iter().filter(|e| e.kind == EntryKind::Osr).count()
    }

    pub(crate) fn push(&mut self, entry: StackEntry) {
        self.stack.push(entry);
    }

    pub(crate) fn pop(&mut self) -> Option<StackEntry> {
        self.stack.pop()
    }
}
