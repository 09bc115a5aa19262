//! Frame transfer between an interpreter frame and an OSR frame
//!
//! Every OSR target owns a `TransferPlan`: the concrete tags observed in the
//! parent frame when the target was compiled (entry speculation), the tags
//! the compiled code is expected to leave behind (exit speculation), and an
//! optional live-slot set. Copies are always exact; a tag that diverges from
//! the speculation is reported as a `FrameTagMismatch` so the caller can
//! deoptimize.

use super::{Frame, FrameSlotKind};

/// A slot whose concrete tag diverged from the speculated tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Frame slot {slot} changed tag across OSR boundary: expected {expected}, found {actual}")]
pub struct FrameTagMismatch {
    pub slot: usize,
    pub expected: FrameSlotKind,
    pub actual: FrameSlotKind,
}

/// Outcome of one copy between frames
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    /// Number of slots copied
    pub copied: usize,
    /// Slots whose tag diverged from the speculation
    pub mismatches: Vec<FrameTagMismatch>,
}

impl TransferReport {
    /// True if every copied slot matched its speculated tag
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }

    /// Merge another report into this one
    pub fn merge(&mut self, other: TransferReport) {
        self.copied += other.copied;
        self.mismatches.extend(other.mismatches);
    }
}

/// Per-target frame transfer speculation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferPlan {
    entry_tags: Vec<FrameSlotKind>,
    exit_tags: Vec<FrameSlotKind>,
    live: Option<Vec<usize>>,
}

impl TransferPlan {
    /// Speculate on the parent frame's current concrete tags
    ///
    /// Exit tags start out equal to the entry tags. With `live` set, only
    /// those slots are transferred.
    pub fn capture(parent: &Frame, live: Option<Vec<usize>>) -> Self {
        let tags = parent.tags().to_vec();
        TransferPlan {
            entry_tags: tags.clone(),
            exit_tags: tags,
            live,
        }
    }

    /// Speculate on new entry tags while keeping the learned exit tags
    ///
    /// Exit tags are only reset when the frame layout changed.
    pub fn recapture_entry(&mut self, parent: &Frame, live: Option<Vec<usize>>) {
        let tags = parent.tags();
        if self.exit_tags.len() != tags.len() {
            self.exit_tags = tags.to_vec();
        }
        self.entry_tags = tags.to_vec();
        self.live = live;
    }

    pub fn entry_tags(&self) -> &[FrameSlotKind] {
        &self.entry_tags
    }

    pub fn exit_tags(&self) -> &[FrameSlotKind] {
        &self.exit_tags
    }

    pub fn live_slots(&self) -> Option<&[usize]> {
        self.live.as_deref()
    }

    /// Whether this plan has been captured for a frame at all
    pub fn is_empty(&self) -> bool {
        self.entry_tags.is_empty() && self.live.is_none()
    }

    /// Adopt the tags an OSR frame actually exited with
    pub fn update_exit_tags(&mut self, osr: &Frame) {
        self.exit_tags = osr.tags().to_vec();
    }

    /// Copy parent state into a fresh OSR frame
    pub fn copy_into(&self, osr: &mut Frame, parent: &Frame) -> TransferReport {
        FrameTransferEngine::copy_into_osr_frame(osr, parent, self)
    }

    /// Copy OSR state back into the parent frame
    pub fn restore(&self, osr: &Frame, parent: &mut Frame) -> TransferReport {
        FrameTransferEngine::restore_parent_frame(osr, parent, self)
    }
}

/// Slot-by-slot copying between frames of the same descriptor
pub struct FrameTransferEngine;

impl FrameTransferEngine {
    /// Populate `osr` from `parent`, checking the entry speculation
    pub fn copy_into_osr_frame(osr: &mut Frame, parent: &Frame, plan: &TransferPlan) -> TransferReport {
        Self::transfer(parent, osr, &plan.entry_tags, plan.live.as_deref())
    }

    /// Write `osr` back into `parent`, checking the exit speculation
    pub fn restore_parent_frame(osr: &Frame, parent: &mut Frame, plan: &TransferPlan) -> TransferReport {
        Self::transfer(osr, parent, &plan.exit_tags, plan.live.as_deref())
    }

    fn transfer(from: &Frame, to: &mut Frame, speculated: &[FrameSlotKind], live: Option<&[usize]>) -> TransferReport {
        debug_assert_eq!(from.descriptor().slot_count(), to.descriptor().slot_count());
        let mut report = TransferReport::default();
        match live {
            Some(slots) => {
                for &slot in slots {
                    Self::transfer_slot(from, to, slot, speculated, &mut report);
                }
            }
            None => {
                for slot in 0..from.descriptor().slot_count() {
                    Self::transfer_slot(from, to, slot, speculated, &mut report);
                }
            }
        }
        report
    }

    fn transfer_slot(from: &Frame, to: &mut Frame, slot: usize, speculated: &[FrameSlotKind], report: &mut TransferReport) {
        let actual = from.tag(slot);
        if let Some(&expected) = speculated.get(slot) {
            if expected != actual {
                report.mismatches.push(FrameTagMismatch { slot, expected, actual });
            }
        }
        // Static slots carry both halves; regular slots only the half their tag selects.
        let (primitive, object) = match actual {
            FrameSlotKind::Static => (from.raw_primitive(slot), from.raw_object(slot).clone()),
            kind if kind.is_primitive() => (from.raw_primitive(slot), super::Value::Null),
            _ => (0, from.raw_object(slot).clone()),
        };
        to.write_raw(slot, actual, primitive, object);
        report.copied += 1;
    }
}
