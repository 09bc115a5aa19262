//! OSR compilation coordinator
//!
//! `OsrRuntime` owns the configuration, the compiler backend, the optional
//! background compiler and the invalidation tracker. The interpreter talks
//! to it through its `ExecutionContext`:
//!
//! - `poll_back_edge` records back-edges and says when to try OSR
//! - `try_osr` compiles the target if needed and, once code is installed,
//!   runs the loop on a fresh OSR frame and writes the result back
//!
//! `try_osr` returning `Ok(None)` means "keep interpreting"; compile
//! bailouts, a busy target and background compiles in flight all end up
//! there.

use std::sync::Arc;

use tracing::{debug, warn};

use super::artifact::CompiledArtifact;
use super::compiler::{BackgroundCompiler, CompilationRequest, CompilationUnit, DirectCompiler, OsrCompiler};
use super::config::OsrConfig;
use super::invalidation::InvalidationTracker;
use super::metadata::{OsrMetadata, TargetEntry};
use super::profiling::PollPolicy;
use super::stack::{StackEntry, Tier};
use super::unit::{EntryPoint, InterpreterState, OsrTarget, OsrUnit};
use super::{OsrError, OsrResult};
use crate::call_target::ExecutionContext;
use crate::frame::{Frame, Value};

/// Process-wide OSR state
pub struct OsrRuntime {
    config: OsrConfig,
    policy: PollPolicy,
    compiler: Arc<dyn OsrCompiler>,
    background: Option<BackgroundCompiler>,
    tracker: InvalidationTracker,
}

impl OsrRuntime {
    /// Create a runtime with the reference backend
    pub fn new(config: OsrConfig) -> OsrResult<Self> {
        Self::with_compiler(config, Arc::new(DirectCompiler::new()))
    }

    /// Create a runtime with a custom backend
    pub fn with_compiler(config: OsrConfig, compiler: Arc<dyn OsrCompiler>) -> OsrResult<Self> {
        config.validate()?;
        let background = if config.enabled && config.background_compilation {
            let worker = BackgroundCompiler::spawn(Arc::clone(&compiler), config.compile_queue_capacity)
                .map_err(OsrError::CompilerThread)?;
            Some(worker)
        } else {
            None
        };
        debug!(
            backend = compiler.name(),
            threshold = config.compilation_threshold,
            interval = config.poll_interval,
            background = background.is_some(),
            "OSR runtime initialized"
        );
        Ok(OsrRuntime {
            policy: PollPolicy::from_config(&config),
            config,
            compiler,
            background,
            tracker: InvalidationTracker::new(),
        })
    }

    pub fn config(&self) -> &OsrConfig {
        &self.config
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    pub fn compiler(&self) -> &dyn OsrCompiler {
        self.compiler.as_ref()
    }

    pub fn background(&self) -> Option<&BackgroundCompiler> {
        self.background.as_ref()
    }

    pub fn tracker(&self) -> &InvalidationTracker {
        &self.tracker
    }

    /// Fresh execution context for the current thread
    pub fn context(&self) -> ExecutionContext<'_> {
        ExecutionContext::new(self)
    }

    /// Metadata of a unit, created and registered on first use
    pub fn metadata_for(&self, unit: &dyn OsrUnit) -> OsrResult<Arc<OsrMetadata>> {
        unit.osr_slot()
            .metadata_or_try_init(|| {
                let metadata = Arc::new(OsrMetadata::new(unit, &self.config)?);
                if !self.tracker.register_metadata(&metadata) {
                    debug!(unit = metadata.name(), "unit is not part of a tree");
                }
                Ok(metadata)
            })
            .map(Arc::clone)
    }

    /// Forget the unit's back-edge count
    pub fn reset_compilation_profile(&self, unit: &dyn OsrUnit) {
        unit.osr_slot().reset_compilation_profile();
    }
}

impl ExecutionContext<'_> {
    /// Record `n` back-edges of `unit`; true if the caller should `try_osr`
    ///
    /// Always false while the current activation runs compiled code, when
    /// OSR is turned off and once the unit has been disabled.
    pub fn poll_back_edge(&self, unit: &dyn OsrUnit, n: u64) -> bool {
        let runtime = self.runtime();
        if !runtime.config().enabled || self.in_compiled_code() {
            return false;
        }
        let slot = unit.osr_slot();
        if slot.osr_metadata().is_some_and(|m| m.is_disabled()) {
            return false;
        }
        runtime.policy().poll(slot.counter(), n)
    }

    /// Try to continue the loop at `target` in compiled code
    ///
    /// Returns the loop's result if it ran through OSR, `None` if the
    /// interpreter should keep going.
    pub fn try_osr(
        &mut self,
        unit: &dyn OsrUnit,
        target: impl Into<OsrTarget>,
        state: Option<&InterpreterState>,
        parent: &mut Frame,
    ) -> OsrResult<Option<Value>> {
        self.try_osr_inner(unit, target.into(), state, None::<fn()>, parent)
    }

    /// Like `try_osr`, running `before_transfer` once right before the OSR frame executes
    pub fn try_osr_with_callback<F: FnOnce()>(
        &mut self,
        unit: &dyn OsrUnit,
        target: impl Into<OsrTarget>,
        state: Option<&InterpreterState>,
        before_transfer: F,
        parent: &mut Frame,
    ) -> OsrResult<Option<Value>> {
        self.try_osr_inner(unit, target.into(), state, Some(before_transfer), parent)
    }

    fn try_osr_inner<F: FnOnce()>(
        &mut self,
        unit: &dyn OsrUnit,
        target: OsrTarget,
        state: Option<&InterpreterState>,
        before_transfer: Option<F>,
        parent: &mut Frame,
    ) -> OsrResult<Option<Value>> {
        let runtime = self.runtime();
        if !runtime.config().enabled {
            return Ok(None);
        }
        let metadata = runtime.metadata_for(unit)?;
        if metadata.is_disabled() {
            return Ok(None);
        }
        let entry_point = EntryPoint::resolve(unit, target)?;
        let key = target.key();
        let entry = metadata.entry(key);

        if let Some(artifact) = entry.valid_artifact() {
            return self
                .enter(unit, entry_point, &metadata, &entry, artifact, state, before_transfer, parent)
                .map(Some);
        }
        if !entry.try_claim() {
            // compile in flight
            return Ok(None);
        }
        let recompiling = entry.artifact().is_some();
        if recompiling && !metadata.consume_reattempt() {
            entry.release();
            metadata.exhausted()?;
            return Ok(None);
        }
        if !entry.is_prepared() {
            if let Err(err) = entry_point.prepare(unit) {
                entry.release();
                return Err(err);
            }
            entry.mark_prepared();
        }

        entry.refresh_plan(parent, unit.live_slots(key));
        let request = CompilationUnit::osr(
            metadata.name(),
            key,
            parent.descriptor().slot_count(),
            unit.compilation_barrier(key),
        );

        if let Some(background) = runtime.background() {
            debug!(unit = metadata.name(), key, "OSR compilation queued");
            let submitted = background.try_submit(CompilationRequest {
                metadata: Arc::clone(&metadata),
                key,
                unit: request,
            });
            if !submitted {
                debug!(unit = metadata.name(), key, "compile queue full");
                if recompiling {
                    metadata.refund_reattempt();
                }
                entry.release();
            }
            return Ok(None);
        }

        debug!(unit = metadata.name(), key, "OSR compilation requested");
        match runtime.compiler().compile(&request) {
            Ok(code) => {
                let artifact = metadata.install(&entry, key, code);
                self.enter(unit, entry_point, &metadata, &entry, artifact, state, before_transfer, parent)
                    .map(Some)
            }
            Err(bailout) => {
                metadata.record_bailout(&entry, key, &bailout)?;
                Ok(None)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn enter<F: FnOnce()>(
        &mut self,
        unit: &dyn OsrUnit,
        entry_point: EntryPoint,
        metadata: &OsrMetadata,
        entry: &TargetEntry,
        artifact: Arc<CompiledArtifact>,
        state: Option<&InterpreterState>,
        before_transfer: Option<F>,
        parent: &mut Frame,
    ) -> OsrResult<Value> {
        let arguments = unit.store_parent_frame_in_arguments(parent);
        let mut osr = Frame::new(Arc::clone(parent.descriptor()), arguments);
        let plan = entry.plan();

        let copied = entry_point.copy_in(unit, &mut osr, parent, &plan)?;
        let tier = if copied.is_clean() {
            Tier::Compiled
        } else {
            warn!(
                unit = metadata.name(),
                artifact = artifact.name(),
                mismatches = copied.mismatches.len(),
                "frame tags changed before OSR entry, deoptimizing"
            );
            metadata.note_tag_mismatches(copied.mismatches.len());
            metadata.note_deoptimization();
            artifact.invalidate();
            Tier::Interpreted
        };

        if let Some(callback) = before_transfer {
            callback();
        }
        metadata.note_entry();
        debug!(unit = metadata.name(), artifact = artifact.name(), ?tier, "entering OSR frame");

        self.push(StackEntry::osr(Arc::clone(&artifact), osr.id(), tier));
        let result = entry_point.execute(unit, &mut osr, state, self);
        self.pop();

        if tier == Tier::Compiled && !artifact.is_valid() {
            metadata.note_deoptimization();
        }
        let value = result?;

        let arguments = osr.arguments().to_vec();
        unit.restore_parent_frame_from_arguments(&arguments, parent);
        let restored = unit.restore_parent_frame(&osr, parent, &plan);
        if !restored.is_clean() {
            warn!(
                unit = metadata.name(),
                artifact = artifact.name(),
                mismatches = restored.mismatches.len(),
                "frame tags changed inside OSR frame"
            );
            metadata.note_tag_mismatches(restored.mismatches.len());
            metadata.note_deoptimization();
            artifact.invalidate();
            entry.update_exit_tags(&osr);
        }
        debug!(unit = metadata.name(), copied = restored.copied, "parent frame restored");
        Ok(value)
    }
}
