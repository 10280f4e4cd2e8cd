//! The kernel contract used by the evaluation worker

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Receives console output produced during one evaluation
pub trait LogSink: Send + Sync {
    /// Called once per captured line, as soon as it is written
    fn log(&self, line: &str);
}

impl<F> LogSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn log(&self, line: &str) {
        self(line);
    }
}

/// Everything a kernel may touch for the duration of one `evaluate` call
///
/// The sink and the termination flag are injected per call; a kernel must not
/// keep either once the call returns.
#[derive(Clone)]
pub struct EvalScope {
    sink: Arc<dyn LogSink>,
    terminated: Arc<AtomicBool>,
}

impl EvalScope {
    pub fn new(sink: Arc<dyn LogSink>, terminated: Arc<AtomicBool>) -> Self {
        Self { sink, terminated }
    }

    /// Scope with a sink and a flag nobody will ever raise
    pub fn detached(sink: Arc<dyn LogSink>) -> Self {
        Self::new(sink, Arc::new(AtomicBool::new(false)))
    }

    /// Emit one console line
    pub fn log(&self, line: &str) {
        self.sink.log(line);
    }

    /// Shared handle to the sink, for hooks that must own it
    pub fn sink(&self) -> Arc<dyn LogSink> {
        Arc::clone(&self.sink)
    }

    /// Whether the owning worker has been terminated
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Shared handle to the termination flag
    pub fn termination_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.terminated)
    }
}

/// A solid-modeling kernel
///
/// Implementations are created on the worker thread and never leave it, so
/// they need not be `Send`.
pub trait Kernel {
    /// Load and instantiate the kernel from its binary
    ///
    /// Called at most once per worker lifetime unless it fails.
    fn initialize(&mut self, binary_address: &str) -> Result<()>;

    /// Evaluate a script, returning the URL of the published model asset
    fn evaluate(&mut self, code: &str, scope: &EvalScope) -> Result<String>;

    /// Release transient resources allocated by the last evaluation
    fn cleanup(&mut self);
}

/// Builds a fresh kernel each time a worker starts
pub type KernelFactory = Arc<dyn Fn() -> Box<dyn Kernel> + Send + Sync>;

/// Execution limits applied to every script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KernelLimits {
    /// Abort scripts after this many operations (None = unlimited)
    pub max_operations: Option<u64>,
    /// Maximum expression nesting depth
    pub max_expr_depth: usize,
    /// Maximum function call nesting
    pub max_call_levels: usize,
}

impl Default for KernelLimits {
    fn default() -> Self {
        Self {
            max_operations: None,
            max_expr_depth: 64,
            max_call_levels: 64,
        }
    }
}

/// Map an asset address to a filesystem path
///
/// Accepts `file://` URLs and plain paths.
pub fn path_from_address(address: &str) -> PathBuf {
    PathBuf::from(address.strip_prefix("file://").unwrap_or(address))
}
