//! Forma Kernel - the modeling kernel the evaluation worker drives
//!
//! The worker only sees the [`Kernel`] trait: initialize once from a kernel
//! binary address, evaluate script text into a model asset URL, and release
//! transient resources after every evaluation.
//!
//! [`RhaiKernel`] is the default implementation. Scripts build solids with a
//! small constructive API and return the final solid as their last
//! expression:
//!
//! ```rhai
//! let plate = box3(4.0, 0.5, 2.0);
//! let hole = cylinder(0.4, 1.0).translate(1.2, 0.0, 0.0);
//!
//! print(`holes: 1`);
//! plate.subtract(hole).color("#8899aa")
//! ```
//!
//! The kernel binary is a Rhai library whose functions become available to
//! every script, for example `fn bolt(r) { cylinder(r, r * 4.0) }`.
//!
//! Console output (`print`, `debug`) goes to the [`LogSink`] carried by the
//! [`EvalScope`] of the current call, never to a process-wide console.

mod api;
mod error;
pub mod kernel;
pub mod rhai_kernel;
pub mod solid;
pub mod store;
pub mod testing;

pub use error::{KernelError, Result};
pub use kernel::{EvalScope, Kernel, KernelFactory, KernelLimits, LogSink, path_from_address};
pub use rhai_kernel::RhaiKernel;
pub use solid::{Shape, ShapeArena, Solid};
pub use store::{DirectoryModelStore, MemoryModelStore, Model, ModelStore};
