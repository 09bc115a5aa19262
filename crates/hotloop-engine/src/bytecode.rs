//! A register bytecode interpreter with OSR at loop back-edges
//!
//! Instructions are byte sequences over integer registers:
//!
//! ```text
//! RETURN r         return register r
//! INC r            r += 1
//! DEC r            r -= 1
//! JMPNZ r off      if r != 0 jump by off (relative to this instruction)
//! COPY src dst     dst = src
//! ```
//!
//! A jump to a lower address is a loop back-edge; it is polled and may
//! continue the loop in an OSR frame at the jump's destination.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::call_target::{CallTarget, ExecutionContext, RootBody};
use crate::frame::{Frame, FrameDescriptorBuilder, FrameSlotKind, Value};
use crate::osr::{InterpreterState, NodeId, OsrError, OsrResult, OsrRuntime, OsrSlot, OsrUnit};

pub mod opcode {
    pub const RETURN: i8 = 0;
    pub const INC: i8 = 1;
    pub const DEC: i8 = 2;
    pub const JMPNZ: i8 = 3;
    pub const COPY: i8 = 4;
}

/// A bytecode loop body that can be entered through OSR
pub struct BytecodeUnit {
    name: String,
    code: Vec<i8>,
    regs: usize,
    regs_offset: usize,
    node: NodeId,
    slot: OsrSlot,
}

impl BytecodeUnit {
    /// Declare `regs` integer registers in `builder` and wrap `code`
    pub fn new(name: &str, code: Vec<i8>, regs: usize, builder: &mut FrameDescriptorBuilder, node: NodeId) -> Self {
        let regs_offset = builder.add_slots(regs, FrameSlotKind::Int);
        BytecodeUnit {
            name: name.to_string(),
            code,
            regs,
            regs_offset,
            node,
            slot: OsrSlot::new(),
        }
    }

    pub fn code(&self) -> &[i8] {
        &self.code
    }

    pub fn register_count(&self) -> usize {
        self.regs
    }

    /// Frame slot backing register `reg`
    pub fn register_slot(&self, reg: usize) -> usize {
        self.regs_offset + reg
    }

    fn byte(&self, bci: usize) -> OsrResult<i8> {
        self.code
            .get(bci)
            .copied()
            .ok_or_else(|| OsrError::Execution(format!("{}: bytecode index {} out of bounds", self.name, bci)))
    }

    fn register(&self, bci: usize) -> OsrResult<usize> {
        let reg = self.byte(bci)?;
        if reg < 0 || reg as usize >= self.regs {
            return Err(OsrError::Execution(format!("{}: invalid register {} at {}", self.name, reg, bci)));
        }
        Ok(self.regs_offset + reg as usize)
    }

    /// Interpret from `bci` until `RETURN`
    pub fn execute_from(&self, frame: &mut Frame, mut bci: usize, ctx: &mut ExecutionContext<'_>) -> OsrResult<Value> {
        loop {
            match self.byte(bci)? {
                opcode::RETURN => {
                    let reg = self.register(bci + 1)?;
                    return Ok(Value::Int(frame.get_int(reg)?));
                }
                opcode::INC => {
                    let reg = self.register(bci + 1)?;
                    frame.set_int(reg, frame.get_int(reg)?.wrapping_add(1));
                    bci += 2;
                }
                opcode::DEC => {
                    let reg = self.register(bci + 1)?;
                    frame.set_int(reg, frame.get_int(reg)?.wrapping_sub(1));
                    bci += 2;
                }
                opcode::COPY => {
                    let src = self.register(bci + 1)?;
                    let dst = self.register(bci + 2)?;
                    frame.set_int(dst, frame.get_int(src)?);
                    bci += 3;
                }
                opcode::JMPNZ => {
                    let reg = self.register(bci + 1)?;
                    if frame.get_int(reg)? == 0 {
                        bci += 3;
                        continue;
                    }
                    let offset = self.byte(bci + 2)? as isize;
                    let target = bci as isize + offset;
                    if target < 0 {
                        return Err(OsrError::Execution(format!("{}: jump before start at {}", self.name, bci)));
                    }
                    if (target as usize) < bci && ctx.poll_back_edge(self, 1) {
                        if let Some(result) = ctx.try_osr(self, target as i32, None, frame)? {
                            return Ok(result);
                        }
                    }
                    bci = target as usize;
                }
                op => {
                    return Err(OsrError::Execution(format!("{}: invalid opcode {} at {}", self.name, op, bci)));
                }
            }
        }
    }
}

impl OsrUnit for BytecodeUnit {
    fn osr_slot(&self) -> &OsrSlot {
        &self.slot
    }

    fn node(&self) -> NodeId {
        self.node
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn execute_osr(
        &self,
        osr: &mut Frame,
        target: i32,
        _state: Option<&InterpreterState>,
        ctx: &mut ExecutionContext<'_>,
    ) -> OsrResult<Value> {
        self.execute_from(osr, target as usize, ctx)
    }
}

impl RootBody for BytecodeUnit {
    fn execute(&self, frame: &mut Frame, ctx: &mut ExecutionContext<'_>) -> OsrResult<Value> {
        for reg in 0..self.regs {
            let value = frame.arguments().get(reg).and_then(Value::as_int).unwrap_or(0);
            frame.set_int(self.regs_offset + reg, value);
        }
        self.execute_from(frame, 0, ctx)
    }
}

impl fmt::Debug for BytecodeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BytecodeUnit")
            .field("name", &self.name)
            .field("len", &self.code.len())
            .field("regs", &self.regs)
            .finish()
    }
}

/// Programs shipped with the engine
pub mod programs {
    use super::opcode::*;

    /// `r2 = 3 * r0`, for `r0 >= 1`
    pub fn triple() -> Vec<i8> {
        vec![
            DEC, 0, //
            INC, 2, //
            INC, 2, //
            INC, 2, //
            JMPNZ, 0, -8, //
            RETURN, 2,
        ]
    }

    /// `r3 = r0 * r1`, for `r0, r1 >= 1`
    ///
    /// The inner loop's back-edge targets 5, the outer loop's 0.
    pub fn multiply() -> Vec<i8> {
        vec![
            DEC, 0, //
            COPY, 1, 2, //
            DEC, 2, //
            INC, 3, //
            JMPNZ, 2, -4, //
            JMPNZ, 0, -12, //
            RETURN, 3,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown program: {0}")]
pub struct UnknownProgram(String);

/// A shipped program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sample {
    Triple,
    Multiply,
}

impl Sample {
    pub const ALL: [Sample; 2] = [Sample::Triple, Sample::Multiply];

    pub fn name(self) -> &'static str {
        match self {
            Sample::Triple => "triple",
            Sample::Multiply => "multiply",
        }
    }

    /// Number of arguments the program reads
    pub fn arity(self) -> usize {
        match self {
            Sample::Triple => 1,
            Sample::Multiply => 2,
        }
    }

    fn layout(self) -> (Vec<i8>, usize) {
        match self {
            Sample::Triple => (programs::triple(), 3),
            Sample::Multiply => (programs::multiply(), 4),
        }
    }
}

impl FromStr for Sample {
    type Err = UnknownProgram;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Sample::ALL
            .into_iter()
            .find(|sample| sample.name() == s)
            .ok_or_else(|| UnknownProgram(s.to_string()))
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Build a call target running `sample`, rooted in a fresh tree
pub fn load(runtime: &OsrRuntime, sample: Sample) -> (Arc<CallTarget>, Arc<BytecodeUnit>) {
    let tracker = runtime.tracker();
    let root = tracker.new_root(sample.name());
    let node = tracker.adopt(root, "loop").unwrap_or_else(NodeId::detached);
    let (code, regs) = sample.layout();

    let mut builder = crate::frame::FrameDescriptor::builder();
    let unit = Arc::new(BytecodeUnit::new(sample.name(), code, regs, &mut builder, node));
    let target = CallTarget::new(root, sample.name(), builder.build(), unit.clone());
    (target, unit)
}
