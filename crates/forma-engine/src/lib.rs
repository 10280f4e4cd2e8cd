//! Forma Engine - runtime for the live CAD preview
//!
//! Three contexts cooperate, connected only by mailboxes:
//!
//! - [`HostController`] lives with the editor. It opens the preview surface
//!   and relays saved CAD scripts to it.
//! - The UI bridge ([`bridge`]) runs inside the surface. It owns the worker,
//!   holds at most one pending submission, and publishes a [`RenderState`].
//! - The evaluation worker ([`worker`]) runs on its own thread, initializes
//!   the kernel lazily and evaluates one script at a time.
//!
//! ## Example
//!
//! ```ignore
//! use forma_engine::{DirectoryResolver, HostController, LocalSurfaceFactory};
//! use forma_kernel::{MemoryModelStore, RhaiKernel, KernelLimits};
//! use std::sync::Arc;
//!
//! let kernels = RhaiKernel::factory(Arc::new(MemoryModelStore::new()), KernelLimits::default());
//! let surfaces = Arc::new(LocalSurfaceFactory::new(kernels));
//! let mut host = HostController::new(editor, Box::new(DirectoryResolver::new("assets")), surfaces);
//!
//! host.open_preview()?;
//! host.run(editor_events).await;
//! ```

pub mod assets;
pub mod bridge;
pub mod config;
mod error;
pub mod host;
pub mod surface;
pub mod worker;

#[cfg(feature = "file-watcher")]
pub mod watch;

pub use assets::{
    AssetResolver, AssetRole, DirectoryResolver, MANIFEST_FILE, ManifestResolver, ResolvedAssets,
    write_manifest,
};
pub use bridge::{
    BridgeConfig, BridgeHandle, BridgeStatus, MAX_SILENT_RESTARTS, WorkerBootstrap, spawn_bridge,
};
pub use config::{DEFAULT_ASSETS_DIR, PreviewConfig, config_path, load_config, save_config};
pub use error::{EngineError, Result};
pub use host::{Document, EditorEnvironment, EditorEvent, HostController, Session};
pub use surface::{LocalSurfaceFactory, Surface, SurfaceContent, SurfaceFactory, SurfaceParts};
pub use worker::{EvaluationWorker, WorkerHandle, WorkerState, spawn_worker};

#[cfg(feature = "file-watcher")]
pub use watch::DocumentWatcher;

// Re-export the protocol types collaborators observe
pub use forma_protocol::{EvaluationOutcome, EvaluationResult, RenderState, ScriptSubmission};
