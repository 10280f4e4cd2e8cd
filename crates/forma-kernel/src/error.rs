//! Error types for kernel operations

use thiserror::Error;

/// Result type alias using the kernel error
pub type Result<T> = std::result::Result<T, KernelError>;

/// Errors raised by the modeling kernel
#[derive(Error, Debug)]
pub enum KernelError {
    /// Loading or instantiating the kernel failed
    #[error("Kernel initialization failed: {0}")]
    Init(String),

    /// Evaluation was requested before initialization
    #[error("Kernel is not initialized")]
    NotInitialized,

    /// The script failed to parse or raised a runtime fault
    #[error("{0}")]
    Script(String),

    /// The script ran but did not produce a solid
    #[error("{0}")]
    NoModel(String),

    /// Invalid geometry parameters
    #[error("Geometry error: {0}")]
    Geometry(String),

    /// A solid handle outlived the evaluation that allocated it
    #[error("Solid #{0} belongs to a previous evaluation")]
    StaleSolid(usize),

    /// The worker was terminated mid-evaluation
    #[error("Evaluation terminated")]
    Terminated,

    /// Publishing the model asset failed
    #[error("Model store error: {0}")]
    Store(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Model serialization error
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
