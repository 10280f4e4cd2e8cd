//! Rhai-backed modeling kernel

use crate::api::{Arena, register_solid_api};
use crate::error::{KernelError, Result};
use crate::kernel::{EvalScope, Kernel, KernelFactory, KernelLimits, path_from_address};
use crate::solid::{ShapeArena, Solid};
use crate::store::{Model, ModelStore};
use parking_lot::Mutex;
use rhai::{Dynamic, Engine, EvalAltResult, Module, Scope};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::{debug, info};

/// Kernel evaluating Rhai scripts into CSG models
pub struct RhaiKernel {
    /// None until `initialize` succeeds
    engine: Option<Engine>,
    arena: Arena,
    store: Arc<dyn ModelStore>,
    limits: KernelLimits,
    /// Model published by the previous evaluation
    published: Option<String>,
}

impl RhaiKernel {
    /// Create an uninitialized kernel publishing into `store`
    pub fn new(store: Arc<dyn ModelStore>) -> Self {
        Self {
            engine: None,
            arena: Arc::new(Mutex::new(ShapeArena::new())),
            store,
            limits: KernelLimits::default(),
            published: None,
        }
    }

    /// Apply execution limits
    pub fn with_limits(mut self, limits: KernelLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Factory producing one kernel per worker, all sharing `store`
    pub fn factory(store: Arc<dyn ModelStore>, limits: KernelLimits) -> KernelFactory {
        Arc::new(move || {
            let kernel = RhaiKernel::new(Arc::clone(&store)).with_limits(limits.clone());
            Box::new(kernel) as Box<dyn Kernel>
        })
    }

    /// Check if the kernel finished initialization
    pub fn is_initialized(&self) -> bool {
        self.engine.is_some()
    }

    /// Number of solids currently held by the arena
    pub fn live_solids(&self) -> usize {
        self.arena.lock().live()
    }

    fn build_engine(&self) -> Engine {
        let mut engine = Engine::new();

        register_solid_api(&mut engine, &self.arena);

        engine.set_max_expr_depths(self.limits.max_expr_depth, self.limits.max_expr_depth);
        engine.set_max_call_levels(self.limits.max_call_levels);
        if let Some(max) = self.limits.max_operations {
            engine.set_max_operations(max);
        }

        engine
    }
}

/// Install the per-call hooks: console output and termination
fn install_scope(engine: &mut Engine, scope: &EvalScope) {
    let sink = scope.sink();
    engine.on_print(move |text| sink.log(text));

    let sink = scope.sink();
    engine.on_debug(move |text, _source, pos| {
        if pos.is_none() {
            sink.log(text);
        } else {
            sink.log(&format!("{pos:?} {text}"));
        }
    });

    let terminated = scope.termination_flag();
    engine.on_progress(move |_ops| {
        if terminated.load(Ordering::Acquire) {
            Some(Dynamic::UNIT)
        } else {
            None
        }
    });
}

/// Remove the per-call hooks so nothing outlives the evaluation
fn clear_scope(engine: &mut Engine) {
    engine.on_print(|_| {});
    engine.on_debug(|_, _, _| {});
    engine.on_progress(|_| None);
}

fn script_error(err: Box<EvalAltResult>) -> KernelError {
    match *err {
        EvalAltResult::ErrorTerminated(..) => KernelError::Terminated,
        other => KernelError::Script(other.to_string()),
    }
}

fn no_model_error(code: &str) -> KernelError {
    if code.trim_end().ends_with(';') {
        KernelError::NoModel(
            "Script did not return a solid.\n\n\
            HINT: Your script ends with ';' which returns nothing.\n\
            Add the variable name at the end:\n\n\
              let part = cube(1.0);\n\
              part  // <- return it!"
                .to_string(),
        )
    } else {
        KernelError::NoModel(
            "Script did not return a solid. The last expression must be a shape.".to_string(),
        )
    }
}

impl Kernel for RhaiKernel {
    fn initialize(&mut self, binary_address: &str) -> Result<()> {
        let started = Instant::now();
        let path = path_from_address(binary_address);
        let source = std::fs::read_to_string(&path).map_err(|e| {
            KernelError::Init(format!("Failed to read kernel binary {}: {}", path.display(), e))
        })?;

        let mut engine = self.build_engine();

        let ast = engine
            .compile(&source)
            .map_err(|e| KernelError::Init(format!("Kernel library failed to compile: {}", e)))?;
        let module = Module::eval_ast_as_new(Scope::new(), &ast, &engine)
            .map_err(|e| KernelError::Init(format!("Kernel library failed to load: {}", e)))?;
        engine.register_global_module(module.into());

        // Solids created while loading the library are not part of any model
        self.arena.lock().release();
        self.engine = Some(engine);

        info!(
            "Kernel initialized from {} in {:?}",
            path.display(),
            started.elapsed()
        );
        Ok(())
    }

    fn evaluate(&mut self, code: &str, scope: &EvalScope) -> Result<String> {
        let engine = self.engine.as_mut().ok_or(KernelError::NotInitialized)?;

        if let Some(previous) = self.published.take() {
            self.store.revoke(&previous);
        }

        install_scope(engine, scope);
        let result = engine.eval::<Dynamic>(code);
        clear_scope(engine);

        let value = result.map_err(script_error)?;
        let solid = value
            .try_cast::<Solid>()
            .ok_or_else(|| no_model_error(code))?;

        let root = self.arena.lock().resolve(solid)?;
        let model = Model::new(root);
        let url = self.store.publish(&model)?;

        debug!("Published {} primitives as {}", model.primitive_count, url);
        self.published = Some(url.clone());
        Ok(url)
    }

    fn cleanup(&mut self) {
        let freed = self.arena.lock().release();
        debug!("Released {} solids", freed);
    }
}

impl Drop for RhaiKernel {
    fn drop(&mut self) {
        if let Some(url) = self.published.take() {
            debug!("Revoking {} with its kernel", url);
            self.store.revoke(&url);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::{DirectoryModelStore, MemoryModelStore};
    use std::path::PathBuf;

    fn kernel_file(name: &str, source: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "forma_kernel_{}_{}.rhai",
            name,
            std::process::id()
        ));
        std::fs::write(&path, source).unwrap();
        path
    }

    fn silent() -> EvalScope {
        EvalScope::detached(Arc::new(|_: &str| {}))
    }

    #[test]
    fn test_evaluate_before_initialize() {
        let mut kernel = RhaiKernel::new(Arc::new(MemoryModelStore::new()));
        let result = kernel.evaluate("cube(1.0)", &silent());
        assert!(matches!(result, Err(KernelError::NotInitialized)));
    }

    #[test]
    fn test_initialize_missing_binary() {
        let mut kernel = RhaiKernel::new(Arc::new(MemoryModelStore::new()));
        let result = kernel.initialize("file:///nonexistent/forma/kernel.rhai");
        assert!(matches!(result, Err(KernelError::Init(_))));
        assert!(!kernel.is_initialized());
    }

    #[test]
    fn test_library_functions_available() {
        let path = kernel_file("lib", "fn plate(w) { box3(w, 0.2, w) }");
        let store = Arc::new(MemoryModelStore::new());
        let mut kernel = RhaiKernel::new(store.clone());
        kernel.initialize(&path.display().to_string()).unwrap();

        let url = kernel.evaluate("plate(3.0)", &silent()).unwrap();
        let model = store.fetch(&url).unwrap();
        assert_eq!(model.primitive_count, 1);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_dropping_kernel_revokes_last_model() {
        let path = kernel_file("drop", "");
        let dir = std::env::temp_dir().join(format!("forma_kernel_drop_{}", std::process::id()));
        let store = Arc::new(DirectoryModelStore::new(&dir).unwrap());

        let mut kernel = RhaiKernel::new(store.clone());
        kernel.initialize(&path.display().to_string()).unwrap();
        let first = kernel.evaluate("cube(1.0)", &silent()).unwrap();
        let last = kernel.evaluate("sphere(1.0)", &silent()).unwrap();
        assert!(store.fetch(&first).is_none());
        assert!(store.fetch(&last).is_some());

        drop(kernel);
        assert!(store.fetch(&last).is_none());
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);

        std::fs::remove_file(&path).ok();
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_cleanup_releases_solids() {
        let path = kernel_file("cleanup", "");
        let mut kernel = RhaiKernel::new(Arc::new(MemoryModelStore::new()));
        kernel.initialize(&path.display().to_string()).unwrap();

        kernel
            .evaluate("cube(1.0).union(sphere(0.7))", &silent())
            .unwrap();
        assert!(kernel.live_solids() >= 3);

        kernel.cleanup();
        assert_eq!(kernel.live_solids(), 0);

        std::fs::remove_file(&path).ok();
    }
}
