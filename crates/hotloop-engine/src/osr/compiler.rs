//! Compiler backend contract and the background compilation worker
//!
//! Backends implement `OsrCompiler`. The engine ships `DirectCompiler`,
//! which produces an entry that runs the unit's own OSR hooks in the
//! compiled tier and bails out on targets that declare a compilation
//! barrier.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::defaults::COMPILER_THREAD_NAME;
use super::metadata::OsrMetadata;

/// What is being compiled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilationKind {
    Root,
    Osr { target: i64 },
}

/// Input to a compiler backend
#[derive(Debug, Clone)]
pub struct CompilationUnit {
    /// Name of the root or unit, for diagnostics
    pub name: String,
    pub kind: CompilationKind,
    /// Slots in the frame the code will run on
    pub slot_count: usize,
    /// Reason the code may never be compiled
    pub barrier: Option<String>,
}

impl CompilationUnit {
    pub fn root(name: &str, slot_count: usize) -> Self {
        CompilationUnit {
            name: name.to_string(),
            kind: CompilationKind::Root,
            slot_count,
            barrier: None,
        }
    }

    pub fn osr(name: &str, target: i64, slot_count: usize, barrier: Option<String>) -> Self {
        CompilationUnit {
            name: name.to_string(),
            kind: CompilationKind::Osr { target },
            slot_count,
            barrier,
        }
    }
}

/// Output of a successful compile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledCode {
    /// Backend that produced the code
    pub backend: &'static str,
    pub kind: CompilationKind,
    pub slot_count: usize,
}

/// A compile attempt that did not produce code
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Compilation bailed out: {reason}")]
pub struct CompileBailout {
    pub reason: String,
    /// The code can never be compiled; retrying is pointless
    pub permanent: bool,
}

impl CompileBailout {
    pub fn transient(reason: impl Into<String>) -> Self {
        CompileBailout { reason: reason.into(), permanent: false }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        CompileBailout { reason: reason.into(), permanent: true }
    }
}

/// Compiler backend used for roots and OSR targets
pub trait OsrCompiler: Send + Sync {
    /// Get the backend name
    fn name(&self) -> &str;

    /// Compile one unit
    fn compile(&self, unit: &CompilationUnit) -> Result<CompiledCode, CompileBailout>;
}

/// Reference backend: every target without a barrier compiles
#[derive(Debug, Default)]
pub struct DirectCompiler;

impl DirectCompiler {
    pub fn new() -> Self {
        DirectCompiler
    }
}

impl OsrCompiler for DirectCompiler {
    fn name(&self) -> &str {
        "direct"
    }

    fn compile(&self, unit: &CompilationUnit) -> Result<CompiledCode, CompileBailout> {
        if let Some(reason) = &unit.barrier {
            return Err(CompileBailout::permanent(format!("{}: {}", unit.name, reason)));
        }
        Ok(CompiledCode {
            backend: "direct",
            kind: unit.kind,
            slot_count: unit.slot_count,
        })
    }
}

/// A request to compile an OSR target on the background thread.
pub struct CompilationRequest {
    /// Metadata to install the result into
    pub metadata: Arc<OsrMetadata>,
    /// Target key within the metadata
    pub key: i64,
    pub unit: CompilationUnit,
}

/// Handle to the background OSR compilation thread.
///
/// Dropping this handle closes the channel and joins the thread.
pub struct BackgroundCompiler {
    tx: Option<Sender<CompilationRequest>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundCompiler {
    /// Start the worker thread with a bounded queue
    pub fn spawn(compiler: Arc<dyn OsrCompiler>, capacity: usize) -> std::io::Result<Self> {
        let (tx, rx) = channel::bounded(capacity.max(1));
        let handle = thread::Builder::new()
            .name(COMPILER_THREAD_NAME.to_string())
            .spawn(move || run_worker(compiler, rx))?;
        Ok(BackgroundCompiler {
            tx: Some(tx),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Submit a compilation request. Returns false if the channel is full or closed.
    pub fn try_submit(&self, request: CompilationRequest) -> bool {
        match &self.tx {
            Some(tx) => tx.try_send(request).is_ok(),
            None => false,
        }
    }

    /// Requests waiting in the queue
    pub fn pending(&self) -> usize {
        self.tx.as_ref().map_or(0, |tx| tx.len())
    }
}

impl Drop for BackgroundCompiler {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

fn run_worker(compiler: Arc<dyn OsrCompiler>, rx: Receiver<CompilationRequest>) {
    debug!(backend = compiler.name(), "OSR compiler thread started");
    for request in rx {
        trace!(unit = %request.unit.name, key = request.key, "background compile");
        let result = compiler.compile(&request.unit);
        request.metadata.complete_compilation(request.key, result);
    }
    debug!("OSR compiler thread stopped");
}
