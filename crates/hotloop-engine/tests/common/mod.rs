//! Shared fixtures for the OSR integration tests

#![allow(dead_code)]

use std::sync::Arc;

use hotloop_engine::{
    CallTarget, ExecutionContext, Frame, FrameDescriptor, FrameDescriptorBuilder, FrameSlotKind, InterpreterState,
    NodeId, OsrConfig, OsrResult, OsrRuntime, OsrSlot, OsrUnit, RootBody, Value,
};

pub const OSR_THRESHOLD: i32 = 100;
pub const POLL_INTERVAL: u64 = 10;
pub const ROOT_THRESHOLD: u32 = 10;
pub const DEFAULT_TARGET: i32 = -1;

pub const OSR_RESULT: &str = "osr result";
pub const NORMAL_RESULT: &str = "normal result";

/// Synchronous compilation, one re-attempt, throwing when it runs out
pub fn config() -> OsrConfig {
    OsrConfig {
        enabled: true,
        compilation_threshold: OSR_THRESHOLD as u64,
        poll_interval: POLL_INTERVAL,
        background_compilation: false,
        max_reattempts: 1,
        throw_on_max_reattempts: true,
        root_compilation_threshold: ROOT_THRESHOLD,
        ..OsrConfig::default()
    }
}

pub fn runtime() -> OsrRuntime {
    OsrRuntime::new(config()).expect("runtime")
}

/// A root with one child node for the unit
pub struct Tree {
    pub root: NodeId,
    pub unit: NodeId,
}

pub fn tree(rt: &OsrRuntime) -> Tree {
    let root = rt.tracker().new_root("program");
    let unit = rt.tracker().adopt(root, "loop").expect("root exists");
    Tree { root, unit }
}

/// Wrap a unit in a call target rooted at `root`
pub fn program<U>(root: NodeId, unit: Arc<U>, descriptor: Arc<FrameDescriptor>) -> Arc<CallTarget>
where
    U: RootBody + 'static,
{
    CallTarget::new(root, "program", descriptor, unit)
}

pub fn call(rt: &OsrRuntime, target: &CallTarget, args: Vec<Value>) -> OsrResult<Value> {
    let mut ctx = rt.context();
    target.call(&mut ctx, args)
}

pub fn result_str(value: &Value) -> &str {
    value.as_str().unwrap_or("<not a string>")
}

type Hook = Box<dyn Fn(&mut ExecutionContext<'_>, &Frame, i32) + Send + Sync>;

/// `for i in 0..n` with an OSR poll on every taken back-edge
///
/// Returns `OSR_RESULT` when the loop finishes in compiled code.
pub struct FixedIterationLoop {
    slot: OsrSlot,
    node: NodeId,
    pub index_slot: usize,
    pub iterations_slot: usize,
    barrier: Option<String>,
    before_loop: Option<Hook>,
    each_iteration: Option<Hook>,
}

impl FixedIterationLoop {
    pub fn new(builder: &mut FrameDescriptorBuilder, node: NodeId) -> Self {
        FixedIterationLoop {
            slot: OsrSlot::new(),
            node,
            index_slot: builder.add_slot(FrameSlotKind::Int, "i"),
            iterations_slot: builder.add_slot(FrameSlotKind::Int, "n"),
            barrier: None,
            before_loop: None,
            each_iteration: None,
        }
    }

    /// Make every compile of this loop fail permanently
    pub fn uncompilable(mut self) -> Self {
        self.barrier = Some("never part of compilation".to_string());
        self
    }

    pub fn before_loop(mut self, hook: impl Fn(&mut ExecutionContext<'_>, &Frame, i32) + Send + Sync + 'static) -> Self {
        self.before_loop = Some(Box::new(hook));
        self
    }

    pub fn each_iteration(
        mut self,
        hook: impl Fn(&mut ExecutionContext<'_>, &Frame, i32) + Send + Sync + 'static,
    ) -> Self {
        self.each_iteration = Some(Box::new(hook));
        self
    }

    fn execute_loop(&self, frame: &mut Frame, n: i32, ctx: &mut ExecutionContext<'_>) -> OsrResult<Value> {
        if let Some(hook) = &self.before_loop {
            hook(ctx, frame, -1);
        }
        let start = frame.get_int(self.index_slot)?;
        for i in start..n {
            frame.set_int(self.index_slot, i);
            if let Some(hook) = &self.each_iteration {
                hook(ctx, frame, i);
            }
            if i + 1 < n && ctx.poll_back_edge(self, 1) {
                if let Some(result) = ctx.try_osr(self, DEFAULT_TARGET, None, frame)? {
                    return Ok(result);
                }
            }
        }
        let result = if ctx.in_compiled_code() { OSR_RESULT } else { NORMAL_RESULT };
        Ok(Value::str(result))
    }
}

impl OsrUnit for FixedIterationLoop {
    fn osr_slot(&self) -> &OsrSlot {
        &self.slot
    }

    fn node(&self) -> NodeId {
        self.node
    }

    fn name(&self) -> &str {
        "fixed-iteration-loop"
    }

    fn compilation_barrier(&self, _target: i64) -> Option<String> {
        self.barrier.clone()
    }

    fn execute_osr(
        &self,
        osr: &mut Frame,
        _target: i32,
        _state: Option<&InterpreterState>,
        ctx: &mut ExecutionContext<'_>,
    ) -> OsrResult<Value> {
        let n = osr.get_int(self.iterations_slot)?;
        self.execute_loop(osr, n, ctx)
    }
}

impl RootBody for FixedIterationLoop {
    fn execute(&self, frame: &mut Frame, ctx: &mut ExecutionContext<'_>) -> OsrResult<Value> {
        let n = frame.arguments().first().and_then(Value::as_int).unwrap_or(0);
        frame.set_int(self.index_slot, 0);
        frame.set_int(self.iterations_slot, n);
        self.execute_loop(frame, n, ctx)
    }
}

/// Build a fixed-iteration loop program in a fresh tree
pub fn fixed_loop(
    rt: &OsrRuntime,
    configure: impl FnOnce(FixedIterationLoop) -> FixedIterationLoop,
) -> (Arc<CallTarget>, Arc<FixedIterationLoop>, Tree) {
    let tree = tree(rt);
    let mut builder = FrameDescriptor::builder();
    let unit = Arc::new(configure(FixedIterationLoop::new(&mut builder, tree.unit)));
    let target = program(tree.root, unit.clone(), builder.build());
    (target, unit, tree)
}
