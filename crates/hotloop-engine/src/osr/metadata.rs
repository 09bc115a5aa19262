//! Per-unit OSR metadata
//!
//! Owns the target → artifact map of one unit together with its re-attempt
//! counter, disabled flag and statistics. Each target moves through
//!
//! ```text
//! Uninitialized -> Compiling -> Valid -> Invalidated -> Compiling -> ...
//!                           \-> Uninitialized (bailout, retry later)
//! ```
//!
//! while `Disabled` is terminal for the whole unit. At most one compile per
//! target is in flight: the compile claim is an atomic flag on the target
//! entry, taken with a compare-exchange.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::{debug, error, warn};

use super::artifact::{ArtifactKind, CompiledArtifact};
use super::compiler::{CompileBailout, CompiledCode};
use super::config::OsrConfig;
use super::invalidation::NodeId;
use super::unit::{validate_unit, OsrUnit, TargetWidth, UnitId};
use super::{OsrError, OsrResult};
use crate::frame::{Frame, TransferPlan};

/// Compilation state of one target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TargetState {
    Uninitialized,
    Compiling,
    Valid,
    Invalidated,
    Disabled,
}

/// Snapshot of a unit's OSR statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OsrStats {
    pub compilations: u64,
    pub bailouts: u64,
    pub osr_entries: u64,
    pub deoptimizations: u64,
    pub tag_mismatches: u64,
    pub reattempts: u32,
    pub targets: usize,
    pub disabled: bool,
}

#[derive(Debug, Default)]
struct StatCounters {
    compilations: AtomicU64,
    bailouts: AtomicU64,
    osr_entries: AtomicU64,
    deoptimizations: AtomicU64,
    tag_mismatches: AtomicU64,
}

/// State of a single OSR target
#[derive(Default)]
pub(crate) struct TargetEntry {
    compiling: AtomicBool,
    prepared: AtomicBool,
    artifact: RwLock<Option<Arc<CompiledArtifact>>>,
    plan: RwLock<TransferPlan>,
}

impl TargetEntry {
    /// Claim the target for compilation
    pub(crate) fn try_claim(&self) -> bool {
        self.compiling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    pub(crate) fn release(&self) {
        self.compiling.store(false, Ordering::Release);
    }

    pub(crate) fn is_compiling(&self) -> bool {
        self.compiling.load(Ordering::Acquire)
    }

    /// Mark prepared; true only for the first caller
    pub(crate) fn mark_prepared(&self) -> bool {
        !self.prepared.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_prepared(&self) -> bool {
        self.prepared.load(Ordering::Acquire)
    }

    pub(crate) fn artifact(&self) -> Option<Arc<CompiledArtifact>> {
        self.artifact.read().clone()
    }

    pub(crate) fn valid_artifact(&self) -> Option<Arc<CompiledArtifact>> {
        self.artifact.read().as_ref().filter(|a| a.is_valid()).cloned()
    }

    pub(crate) fn plan(&self) -> TransferPlan {
        self.plan.read().clone()
    }

    /// Re-speculate on the parent's entry tags for a (re)compile
    pub(crate) fn refresh_plan(&self, parent: &Frame, live: Option<Vec<usize>>) {
        self.plan.write().recapture_entry(parent, live);
    }

    pub(crate) fn update_exit_tags(&self, osr: &Frame) {
        self.plan.write().update_exit_tags(osr);
    }

    fn state(&self) -> TargetState {
        if self.is_compiling() {
            return TargetState::Compiling;
        }
        match self.artifact.read().as_ref() {
            Some(artifact) if artifact.is_valid() => TargetState::Valid,
            Some(_) => TargetState::Invalidated,
            None => TargetState::Uninitialized,
        }
    }
}

/// OSR state of one unit
pub struct OsrMetadata {
    id: UnitId,
    name: String,
    node: NodeId,
    width: TargetWidth,
    targets: RwLock<FxHashMap<i64, Arc<TargetEntry>>>,
    disabled: AtomicBool,
    reattempts: AtomicU32,
    max_reattempts: u32,
    throw_on_max_reattempts: bool,
    stats: StatCounters,
}

impl OsrMetadata {
    /// Create metadata for a unit, validating its target width contract
    pub fn new(unit: &dyn OsrUnit, config: &OsrConfig) -> OsrResult<Self> {
        validate_unit(unit)?;
        Ok(OsrMetadata {
            id: UnitId::next(),
            name: unit.name().to_string(),
            node: unit.node(),
            width: unit.target_width(),
            targets: RwLock::new(FxHashMap::default()),
            disabled: AtomicBool::new(false),
            reattempts: AtomicU32::new(0),
            max_reattempts: config.max_reattempts,
            throw_on_max_reattempts: config.throw_on_max_reattempts,
            stats: StatCounters::default(),
        })
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn width(&self) -> TargetWidth {
        self.width
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    /// Disable OSR for the unit; safe while an OSR frame is running
    pub fn force_disable(&self) {
        self.disable("forced");
    }

    pub(crate) fn disable(&self, reason: &str) {
        if !self.disabled.swap(true, Ordering::AcqRel) {
            warn!(unit = %self.name, reason, "OSR disabled");
        }
    }

    /// Artifacts by target key, ordered by key
    pub fn compilations(&self) -> Vec<(i64, Arc<CompiledArtifact>)> {
        let targets = self.targets.read();
        let mut out: Vec<_> = targets
            .iter()
            .filter_map(|(key, entry)| entry.artifact().map(|a| (*key, a)))
            .collect();
        out.sort_by_key(|(key, _)| *key);
        out
    }

    /// Artifact for one target, valid or not
    pub fn compilation(&self, key: i64) -> Option<Arc<CompiledArtifact>> {
        self.targets.read().get(&key).and_then(|entry| entry.artifact())
    }

    pub fn target_state(&self, key: i64) -> TargetState {
        if self.is_disabled() {
            return TargetState::Disabled;
        }
        self.targets
            .read()
            .get(&key)
            .map_or(TargetState::Uninitialized, |entry| entry.state())
    }

    pub fn reattempts(&self) -> u32 {
        self.reattempts.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> OsrStats {
        OsrStats {
            compilations: self.stats.compilations.load(Ordering::Relaxed),
            bailouts: self.stats.bailouts.load(Ordering::Relaxed),
            osr_entries: self.stats.osr_entries.load(Ordering::Relaxed),
            deoptimizations: self.stats.deoptimizations.load(Ordering::Relaxed),
            tag_mismatches: self.stats.tag_mismatches.load(Ordering::Relaxed),
            reattempts: self.reattempts(),
            targets: self.targets.read().len(),
            disabled: self.is_disabled(),
        }
    }

    /// Invalidate every artifact of the unit, keeping the map entries
    pub fn invalidate_all(&self) -> usize {
        let targets = self.targets.read();
        targets
            .values()
            .filter_map(|entry| entry.artifact())
            .filter(|artifact| artifact.invalidate())
            .count()
    }

    /// Entry for a target, created on first use
    pub(crate) fn entry(&self, key: i64) -> Arc<TargetEntry> {
        if let Some(entry) = self.targets.read().get(&key) {
            return Arc::clone(entry);
        }
        let mut targets = self.targets.write();
        Arc::clone(targets.entry(key).or_default())
    }

    /// Take one re-attempt for recompiling an invalidated target
    ///
    /// Returns false once the counter has reached the maximum.
    pub(crate) fn consume_reattempt(&self) -> bool {
        self.reattempts
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                if n >= self.max_reattempts {
                    None
                } else {
                    Some(n + 1)
                }
            })
            .is_ok()
    }

    /// Give back a re-attempt whose compile never started
    pub(crate) fn refund_reattempt(&self) {
        let _ = self
            .reattempts
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Disable the unit after running out of re-attempts
    ///
    /// Fails with `MaxReattemptsReached` when configured to throw.
    pub(crate) fn exhausted(&self) -> OsrResult<()> {
        self.disable("max re-attempts reached");
        if self.throw_on_max_reattempts {
            return Err(OsrError::MaxReattemptsReached {
                unit: self.name.clone(),
                attempts: self.reattempts(),
            });
        }
        Ok(())
    }

    /// Store compiled code for a target, reusing an invalidated artifact
    pub(crate) fn install(&self, entry: &TargetEntry, key: i64, code: CompiledCode) -> Arc<CompiledArtifact> {
        let artifact = {
            let mut slot = entry.artifact.write();
            match slot.as_ref() {
                Some(existing) => {
                    existing.revalidate(code);
                    Arc::clone(existing)
                }
                None => {
                    let kind = ArtifactKind::Osr { unit: self.id, target: key };
                    let created = CompiledArtifact::new(kind, format!("{}@{}", self.name, key), code);
                    *slot = Some(Arc::clone(&created));
                    created
                }
            }
        };
        entry.release();
        self.stats.compilations.fetch_add(1, Ordering::Relaxed);
        debug!(unit = %self.name, key, generation = artifact.generation(), "OSR target installed");
        artifact
    }

    /// Account for a failed compile of a target
    ///
    /// A permanent bailout disables the unit. A transient one costs a
    /// re-attempt; the target goes back to `Uninitialized` while re-attempts
    /// remain.
    pub(crate) fn record_bailout(&self, entry: &TargetEntry, key: i64, bailout: &CompileBailout) -> OsrResult<()> {
        entry.release();
        self.stats.bailouts.fetch_add(1, Ordering::Relaxed);
        warn!(unit = %self.name, key, permanent = bailout.permanent, "{}", bailout);
        if bailout.permanent {
            self.disable("target cannot be compiled");
            return Ok(());
        }
        let attempts = self.reattempts.fetch_add(1, Ordering::AcqRel) + 1;
        if attempts >= self.max_reattempts {
            return self.exhausted();
        }
        Ok(())
    }

    /// Finish a background compile
    pub(crate) fn complete_compilation(&self, key: i64, result: Result<CompiledCode, CompileBailout>) {
        let entry = self.entry(key);
        match result {
            Ok(code) => {
                self.install(&entry, key, code);
            }
            Err(bailout) => {
                if let Err(err) = self.record_bailout(&entry, key, &bailout) {
                    error!(unit = %self.name, key, "background compilation failed: {}", err);
                }
            }
        }
    }

    pub(crate) fn note_entry(&self) {
        self.stats.osr_entries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_deoptimization(&self) {
        self.stats.deoptimizations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_tag_mismatches(&self, count: usize) {
        self.stats.tag_mismatches.fetch_add(count as u64, Ordering::Relaxed);
    }
}

impl fmt::Debug for OsrMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OsrMetadata")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("width", &self.width)
            .field("disabled", &self.is_disabled())
            .field("reattempts", &self.reattempts())
            .finish()
    }
}
