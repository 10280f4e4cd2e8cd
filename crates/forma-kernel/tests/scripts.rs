//! Integration tests for script evaluation through the Rhai kernel

// Tests are allowed to use expect/unwrap for cleaner error messages
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use forma_kernel::{EvalScope, Kernel, KernelError, KernelLimits, MemoryModelStore, ModelStore, RhaiKernel, Shape};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

const LIBRARY: &str = r#"
    fn bolt(r) {
        cylinder(r, r * 4.0).union(cylinder(r * 1.6, r).translate(0.0, r * 2.0, 0.0))
    }
"#;

fn library_path(test: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("forma_it_{}_{}.rhai", test, std::process::id()));
    std::fs::write(&path, LIBRARY).expect("Should write kernel library");
    path
}

fn kernel(test: &str) -> (RhaiKernel, Arc<MemoryModelStore>) {
    let store = Arc::new(MemoryModelStore::new());
    let mut kernel = RhaiKernel::new(store.clone());
    let path = library_path(test);
    kernel
        .initialize(&format!("file://{}", path.display()))
        .expect("Kernel should initialize");
    std::fs::remove_file(&path).ok();
    (kernel, store)
}

fn capture() -> (EvalScope, Arc<Mutex<Vec<String>>>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = lines.clone();
    let scope = EvalScope::detached(Arc::new(move |line: &str| sink.lock().push(line.to_string())));
    (scope, lines)
}

#[test]
fn bracket_script_produces_model() {
    let (mut kernel, store) = kernel("bracket");
    let (scope, _) = capture();

    let script = r##"
        let plate = box3(4.0, 0.5, 2.0);
        let hole = cylinder(0.4, 1.0).translate(1.2, 0.0, 0.0);
        plate.subtract(hole).color("#8899aa")
    "##;

    let url = kernel.evaluate(script, &scope).expect("Script should evaluate");
    kernel.cleanup();

    let model = store.fetch(&url).expect("Model should be published");
    assert_eq!(model.primitive_count, 2);
    assert!(matches!(model.root, Shape::Color { .. }));
}

#[test]
fn print_output_reaches_sink_in_order() {
    let (mut kernel, _) = kernel("print");
    let (scope, lines) = capture();

    let script = r#"
        print("first");
        for i in 0..3 { print(`tooth ${i}`); }
        bolt(0.5)
    "#;
    kernel.evaluate(script, &scope).expect("Script should evaluate");
    kernel.cleanup();

    assert_eq!(
        *lines.lock(),
        vec!["first", "tooth 0", "tooth 1", "tooth 2"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>()
    );
}

#[test]
fn syntax_error_is_reported() {
    let (mut kernel, _) = kernel("syntax");
    let (scope, _) = capture();

    let err = kernel.evaluate("cube(", &scope).unwrap_err();
    kernel.cleanup();
    assert!(matches!(err, KernelError::Script(_)));
}

#[test]
fn geometry_error_is_reported() {
    let (mut kernel, _) = kernel("geometry");
    let (scope, _) = capture();

    let err = kernel.evaluate("sphere(-1.0)", &scope).unwrap_err();
    kernel.cleanup();
    assert!(err.to_string().contains("must be positive"), "got: {err}");
}

#[test]
fn missing_return_gives_hint() {
    let (mut kernel, _) = kernel("hint");
    let (scope, _) = capture();

    let err = kernel.evaluate("let part = cube(1.0);", &scope).unwrap_err();
    kernel.cleanup();
    assert!(matches!(err, KernelError::NoModel(_)));
    assert!(err.to_string().contains("HINT"));
}

#[test]
fn output_before_fault_is_kept() {
    let (mut kernel, _) = kernel("partial");
    let (scope, lines) = capture();

    let result = kernel.evaluate(r#"print("halfway"); torus(0.2, 1.0)"#, &scope);
    kernel.cleanup();

    assert!(result.is_err());
    assert_eq!(*lines.lock(), vec!["halfway".to_string()]);
}

#[test]
fn kernel_recovers_after_fault() {
    let (mut kernel, store) = kernel("recover");
    let (scope, _) = capture();

    let first = kernel.evaluate("cube(1.0)", &scope).unwrap();
    kernel.cleanup();
    assert!(kernel.evaluate("undefined_fn(1)", &scope).is_err());
    kernel.cleanup();
    let third = kernel.evaluate("sphere(2.0)", &scope).unwrap();
    kernel.cleanup();

    assert_ne!(first, third);
    // The previous model is released when a new evaluation starts
    assert!(store.fetch(&first).is_none());
    assert_eq!(store.fetch(&third).unwrap().root, Shape::Sphere { radius: 2.0 });
    assert_eq!(kernel.live_solids(), 0);
}

#[test]
fn terminated_flag_stops_script() {
    let (mut kernel, _) = kernel("terminate");
    let (sink_scope, _) = capture();
    let scope = EvalScope::new(sink_scope.sink(), Arc::new(AtomicBool::new(true)));

    let err = kernel
        .evaluate("let x = 0; loop { x += 1; }", &scope)
        .unwrap_err();
    kernel.cleanup();
    assert!(matches!(err, KernelError::Terminated));
}

#[test]
fn operation_limit_is_enforced() {
    let store = Arc::new(MemoryModelStore::new());
    let limits = KernelLimits {
        max_operations: Some(1_000),
        ..KernelLimits::default()
    };
    let mut kernel = RhaiKernel::new(store).with_limits(limits);
    let path = library_path("limits");
    kernel.initialize(&path.display().to_string()).unwrap();
    std::fs::remove_file(&path).ok();

    let (scope, _) = capture();
    let result = kernel.evaluate("let x = 0; loop { x += 1; }", &scope);
    kernel.cleanup();
    assert!(matches!(result, Err(KernelError::Script(_))));
}
