//! Error types for the preview runtime

use crate::assets::AssetRole;
use thiserror::Error;

/// Result type alias using the engine error
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the host, bridge and worker
#[derive(Error, Debug)]
pub enum EngineError {
    /// A required runtime asset could not be located
    #[error("Could not find the {role} asset")]
    AssetMissing { role: AssetRole },

    /// The UI bridge could not construct the evaluation worker
    #[error("Preview failed to start: {0}")]
    BridgeBootstrap(String),

    /// The worker thread could not be started
    #[error("Failed to spawn evaluation worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    /// File watching failed
    #[error("Watch error: {0}")]
    Watch(String),

    /// Configuration could not be loaded or saved
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
