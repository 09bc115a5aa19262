//! OSR-capable units
//!
//! A unit is the loop-bearing part of a guest program that can be entered
//! mid-execution. It implements `OsrUnit`: hooks for frame transfer and
//! for running the compiled entry, plus an `OsrSlot` holding its back-edge
//! counter and lazily created metadata.
//!
//! Target ids come in two widths. A unit declares its width up front; a
//! wide unit must list every required wide operation, which is checked when
//! its metadata is created rather than discovered mid-transfer.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;

use super::invalidation::NodeId;
use super::metadata::OsrMetadata;
use super::profiling::BackEdgeCounter;
use super::{OsrError, OsrResult};
use crate::call_target::ExecutionContext;
use crate::frame::{Frame, TransferPlan, TransferReport, Value};

/// Opaque loop-invariant state handed from the interpreter to the OSR entry
pub type InterpreterState = dyn Any + Send + Sync;

/// Identity of a unit's OSR metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct UnitId(u64);

impl UnitId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        UnitId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit#{}", self.0)
    }
}

/// An OSR entry point within a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsrTarget {
    Narrow(i32),
    Wide(i64),
}

impl OsrTarget {
    /// Metadata key for this target
    pub fn key(self) -> i64 {
        match self {
            OsrTarget::Narrow(t) => t as i64,
            OsrTarget::Wide(t) => t,
        }
    }
}

impl From<i32> for OsrTarget {
    fn from(target: i32) -> Self {
        OsrTarget::Narrow(target)
    }
}

impl From<i64> for OsrTarget {
    fn from(target: i64) -> Self {
        OsrTarget::Wide(target)
    }
}

/// Width of the target ids a unit handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetWidth {
    #[default]
    Narrow,
    Wide,
}

/// Unit operations that exist in a narrow and a wide form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsrOperation {
    PrepareOsr,
    CopyIntoOsrFrame,
    ExecuteOsr,
}

impl OsrOperation {
    /// Operations a wide unit must implement in wide form
    pub const REQUIRED: [OsrOperation; 3] =
        [OsrOperation::PrepareOsr, OsrOperation::CopyIntoOsrFrame, OsrOperation::ExecuteOsr];

    pub fn name(self) -> &'static str {
        match self {
            OsrOperation::PrepareOsr => "prepare_osr",
            OsrOperation::CopyIntoOsrFrame => "copy_into_osr_frame",
            OsrOperation::ExecuteOsr => "execute_osr",
        }
    }

    fn missing(self) -> OsrError {
        OsrError::OverloadContractViolation { operation: self }
    }
}

impl fmt::Display for OsrOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-unit OSR storage: back-edge counter and lazily created metadata
#[derive(Debug, Default)]
pub struct OsrSlot {
    counter: BackEdgeCounter,
    metadata: OnceCell<Arc<OsrMetadata>>,
}

impl OsrSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self) -> &BackEdgeCounter {
        &self.counter
    }

    /// Metadata, if it has been created
    pub fn osr_metadata(&self) -> Option<&Arc<OsrMetadata>> {
        self.metadata.get()
    }

    /// Install metadata; fails with the rejected value if already set
    pub fn set_osr_metadata(&self, metadata: Arc<OsrMetadata>) -> Result<(), Arc<OsrMetadata>> {
        self.metadata.set(metadata)
    }

    /// Zero the back-edge count
    pub fn reset_compilation_profile(&self) {
        self.counter.reset();
    }

    pub(crate) fn metadata_or_try_init<F>(&self, init: F) -> OsrResult<&Arc<OsrMetadata>>
    where
        F: FnOnce() -> OsrResult<Arc<OsrMetadata>>,
    {
        self.metadata.get_or_try_init(init)
    }
}

/// A loop-bearing unit that can be entered through OSR
///
/// Narrow hooks take `i32` targets, wide hooks `i64` targets. The default
/// transfer hooks copy the frame through the target's `TransferPlan`.
pub trait OsrUnit: Send + Sync {
    /// Storage for the back-edge counter and metadata
    fn osr_slot(&self) -> &OsrSlot;

    /// Node this unit occupies in its root's tree
    fn node(&self) -> NodeId;

    /// Name used in logs and errors
    fn name(&self) -> &str {
        "osr-unit"
    }

    fn target_width(&self) -> TargetWidth {
        TargetWidth::Narrow
    }

    /// Wide operations this unit implements
    fn wide_operations(&self) -> &'static [OsrOperation] {
        &[]
    }

    /// Reason the target can never be compiled, if any
    fn compilation_barrier(&self, _target: i64) -> Option<String> {
        None
    }

    /// Slots live at the target; `None` transfers every slot
    fn live_slots(&self, _target: i64) -> Option<Vec<usize>> {
        None
    }

    /// Called once per target before its first compilation
    fn prepare_osr(&self, _target: i32) {}

    fn copy_into_osr_frame(&self, osr: &mut Frame, parent: &Frame, _target: i32, plan: &TransferPlan) -> TransferReport {
        plan.copy_into(osr, parent)
    }

    /// Run the loop from `target` on the OSR frame
    fn execute_osr(
        &self,
        osr: &mut Frame,
        target: i32,
        state: Option<&InterpreterState>,
        ctx: &mut ExecutionContext<'_>,
    ) -> OsrResult<Value>;

    fn prepare_osr_wide(&self, _target: i64) -> OsrResult<()> {
        Err(OsrOperation::PrepareOsr.missing())
    }

    fn copy_into_osr_frame_wide(
        &self,
        _osr: &mut Frame,
        _parent: &Frame,
        _target: i64,
        _plan: &TransferPlan,
    ) -> OsrResult<TransferReport> {
        Err(OsrOperation::CopyIntoOsrFrame.missing())
    }

    fn execute_osr_wide(
        &self,
        _osr: &mut Frame,
        _target: i64,
        _state: Option<&InterpreterState>,
        _ctx: &mut ExecutionContext<'_>,
    ) -> OsrResult<Value> {
        Err(OsrOperation::ExecuteOsr.missing())
    }

    /// Write the OSR frame back into the parent on exit
    fn restore_parent_frame(&self, osr: &Frame, parent: &mut Frame, plan: &TransferPlan) -> TransferReport {
        plan.restore(osr, parent)
    }

    /// Arguments of the OSR frame
    fn store_parent_frame_in_arguments(&self, parent: &Frame) -> Vec<Value> {
        parent.arguments().to_vec()
    }

    /// Rebuild caller-visible parent state from the OSR frame's arguments
    fn restore_parent_frame_from_arguments(&self, _arguments: &[Value], _parent: &mut Frame) {}
}

/// Check that a wide unit implements every required wide operation
pub fn validate_unit(unit: &dyn OsrUnit) -> OsrResult<()> {
    if unit.target_width() == TargetWidth::Wide {
        let implemented = unit.wide_operations();
        if let Some(op) = OsrOperation::REQUIRED.iter().find(|op| !implemented.contains(op)) {
            return Err(op.missing());
        }
    }
    Ok(())
}

/// A target resolved against the unit's width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryPoint {
    Narrow(i32),
    Wide(i64),
}

impl EntryPoint {
    pub(crate) fn resolve(unit: &dyn OsrUnit, target: OsrTarget) -> OsrResult<Self> {
        match (unit.target_width(), target) {
            (TargetWidth::Narrow, OsrTarget::Narrow(t)) => Ok(EntryPoint::Narrow(t)),
            (TargetWidth::Narrow, OsrTarget::Wide(_)) => Err(OsrOperation::PrepareOsr.missing()),
            (TargetWidth::Wide, t) => Ok(EntryPoint::Wide(t.key())),
        }
    }

    pub(crate) fn prepare(self, unit: &dyn OsrUnit) -> OsrResult<()> {
        match self {
            EntryPoint::Narrow(t) => {
                unit.prepare_osr(t);
                Ok(())
            }
            EntryPoint::Wide(t) => unit.prepare_osr_wide(t),
        }
    }

    pub(crate) fn copy_in(
        self,
        unit: &dyn OsrUnit,
        osr: &mut Frame,
        parent: &Frame,
        plan: &TransferPlan,
    ) -> OsrResult<TransferReport> {
        match self {
            EntryPoint::Narrow(t) => Ok(unit.copy_into_osr_frame(osr, parent, t, plan)),
            EntryPoint::Wide(t) => unit.copy_into_osr_frame_wide(osr, parent, t, plan),
        }
    }

    pub(crate) fn execute(
        self,
        unit: &dyn OsrUnit,
        osr: &mut Frame,
        state: Option<&InterpreterState>,
        ctx: &mut ExecutionContext<'_>,
    ) -> OsrResult<Value> {
        match self {
            EntryPoint::Narrow(t) => unit.execute_osr(osr, t, state, ctx),
            EntryPoint::Wide(t) => unit.execute_osr_wide(osr, t, state, ctx),
        }
    }
}
