//! Deterministic kernel for exercising the pipeline without geometry
//!
//! [`ScriptedKernel`] reads its "script" one directive per line:
//!
//! | Directive       | Effect                                           |
//! |-----------------|--------------------------------------------------|
//! | `log <text>`    | emit a console line                              |
//! | `sleep <ms>`    | block, stopping early if the worker terminates   |
//! | `fail <msg>`    | raise a script fault                             |
//! | `panic <msg>`   | panic inside the kernel                          |
//! | `model <name>`  | produce a model; the last one wins               |
//!
//! [`ScriptedStats`] counts initializations, evaluations and cleanups, and
//! records the peak number of evaluations running at once.

use crate::error::{KernelError, Result};
use crate::kernel::{EvalScope, Kernel, KernelFactory};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Counters shared by every kernel a factory produces
#[derive(Debug, Default)]
pub struct ScriptedStats {
    initializations: AtomicUsize,
    evaluations: AtomicUsize,
    cleanups: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
    models: AtomicU64,
}

impl ScriptedStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn initializations(&self) -> usize {
        self.initializations.load(Ordering::SeqCst)
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }

    /// Highest number of evaluations observed running simultaneously
    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }
}

/// Decrements the active counter even if the evaluation panics
struct ActiveGuard<'a>(&'a ScriptedStats);

impl<'a> ActiveGuard<'a> {
    fn enter(stats: &'a ScriptedStats) -> Self {
        let now = stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        stats.peak_active.fetch_max(now, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Line-driven kernel; binary addresses containing "missing" fail to load
pub struct ScriptedKernel {
    stats: Arc<ScriptedStats>,
    initialized: bool,
}

impl ScriptedKernel {
    pub fn new(stats: Arc<ScriptedStats>) -> Self {
        Self {
            stats,
            initialized: false,
        }
    }

    /// Factory producing kernels that all report into `stats`
    pub fn factory(stats: Arc<ScriptedStats>) -> KernelFactory {
        Arc::new(move || Box::new(ScriptedKernel::new(Arc::clone(&stats))) as Box<dyn Kernel>)
    }

    fn sleep(scope: &EvalScope, millis: u64) -> Result<()> {
        let deadline = Instant::now() + Duration::from_millis(millis);
        while Instant::now() < deadline {
            if scope.is_terminated() {
                return Err(KernelError::Terminated);
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }
}

impl Kernel for ScriptedKernel {
    fn initialize(&mut self, binary_address: &str) -> Result<()> {
        if binary_address.contains("missing") {
            return Err(KernelError::Init(format!("no kernel at {binary_address}")));
        }
        self.stats.initializations.fetch_add(1, Ordering::SeqCst);
        self.initialized = true;
        Ok(())
    }

    fn evaluate(&mut self, code: &str, scope: &EvalScope) -> Result<String> {
        if !self.initialized {
            return Err(KernelError::NotInitialized);
        }
        self.stats.evaluations.fetch_add(1, Ordering::SeqCst);
        let _active = ActiveGuard::enter(&self.stats);

        let mut url = None;
        for line in code.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (directive, arg) = line.split_once(' ').unwrap_or((line, ""));
            match directive {
                "log" => scope.log(arg),
                "sleep" => Self::sleep(scope, arg.parse().unwrap_or(0))?,
                "fail" => return Err(KernelError::Script(arg.to_string())),
                "panic" => panic!("{arg}"),
                "model" => {
                    let id = self.stats.models.fetch_add(1, Ordering::SeqCst) + 1;
                    url = Some(format!("scripted://{arg}/{id}"));
                }
                other => {
                    return Err(KernelError::Script(format!("unknown directive '{other}'")));
                }
            }
        }

        url.ok_or_else(|| KernelError::NoModel("script produced no model".to_string()))
    }

    fn cleanup(&mut self) {
        self.stats.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_directives() {
        let stats = ScriptedStats::new();
        let mut kernel = ScriptedKernel::new(stats.clone());
        kernel.initialize("scripted://kernel").unwrap();

        let lines = Arc::new(Mutex::new(Vec::new()));
        let captured = lines.clone();
        let scope =
            EvalScope::detached(Arc::new(move |l: &str| captured.lock().push(l.to_string())));

        let url = kernel.evaluate("log hello\nmodel gear", &scope).unwrap();
        assert_eq!(url, "scripted://gear/1");
        assert_eq!(*lines.lock(), vec!["hello".to_string()]);

        assert!(kernel.evaluate("fail bad geometry", &scope).is_err());
        assert!(matches!(
            kernel.evaluate("log only", &scope),
            Err(KernelError::NoModel(_))
        ));
        assert_eq!(stats.evaluations(), 3);
        assert_eq!(stats.peak_active(), 1);
    }

    #[test]
    fn test_missing_binary() {
        let mut kernel = ScriptedKernel::new(ScriptedStats::new());
        assert!(kernel.initialize("file:///missing/kernel").is_err());
    }
}
