//! Preview configuration
//!
//! Stored in `{config_dir}/forma/config.json`. Missing or unreadable files
//! fall back to defaults; command-line flags override individual fields.

use crate::error::{EngineError, Result};
use forma_kernel::KernelLimits;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Asset directory used when none is configured, relative to the working directory
pub const DEFAULT_ASSETS_DIR: &str = "assets";

/// Settings shared by every preview session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Title of the preview surface
    pub title: String,
    /// Directory holding the runtime assets (None = `assets` in the working directory)
    pub assets_dir: Option<PathBuf>,
    /// Debounce window for file save events, in milliseconds
    pub debounce_ms: u64,
    /// Abort evaluations running longer than this (None = never)
    pub evaluation_timeout_ms: Option<u64>,
    /// Where published models are written (None = cache directory)
    pub model_dir: Option<PathBuf>,
    /// Execution limits handed to the kernel
    pub kernel: KernelLimits,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            title: "Forma Preview".to_string(),
            assets_dir: None,
            debounce_ms: 100,
            evaluation_timeout_ms: None,
            model_dir: None,
            kernel: KernelLimits::default(),
        }
    }
}

impl PreviewConfig {
    /// Read a config file, failing on IO or parse errors
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Write the config as pretty JSON, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn evaluation_timeout(&self) -> Option<Duration> {
        self.evaluation_timeout_ms.map(Duration::from_millis)
    }

    /// Asset directory, defaulting to [`DEFAULT_ASSETS_DIR`]
    pub fn resolved_assets_dir(&self) -> PathBuf {
        self.assets_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ASSETS_DIR))
    }

    /// Model output directory, defaulting to `{cache_dir}/forma/models`
    pub fn resolved_model_dir(&self) -> PathBuf {
        self.model_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("forma")
                .join("models")
        })
    }
}

/// Get the path to the config file
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("forma").join("config.json"))
}

/// Load the user config, returning defaults if it doesn't exist or is invalid
pub fn load_config() -> PreviewConfig {
    let Some(path) = config_path() else {
        return PreviewConfig::default();
    };

    if !path.exists() {
        return PreviewConfig::default();
    }

    PreviewConfig::load_from(&path).unwrap_or_else(|e| {
        warn!("Ignoring config: {}", e);
        PreviewConfig::default()
    })
}

/// Save the user config
pub fn save_config(config: &PreviewConfig) -> Result<()> {
    let path = config_path()
        .ok_or_else(|| EngineError::Config("Could not determine config directory".to_string()))?;
    config.save_to(&path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let path = std::env::temp_dir().join(format!("forma_config_{}.json", std::process::id()));
        fs::write(&path, r#"{ "evaluation_timeout_ms": 2500 }"#).unwrap();

        let config = PreviewConfig::load_from(&path).unwrap();
        assert_eq!(config.evaluation_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.debounce_ms, 100);
        assert_eq!(config.kernel, KernelLimits::default());

        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_save_and_reload() {
        let dir = std::env::temp_dir().join(format!("forma_config_dir_{}", std::process::id()));
        let path = dir.join("nested").join("config.json");

        let config = PreviewConfig {
            title: "Bracket".to_string(),
            model_dir: Some(dir.join("models")),
            ..PreviewConfig::default()
        };
        config.save_to(&path).unwrap();

        assert_eq!(PreviewConfig::load_from(&path).unwrap(), config);
        assert_eq!(config.resolved_model_dir(), dir.join("models"));

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_assets_dir_defaults_to_working_directory() {
        let config = PreviewConfig::default();
        assert_eq!(config.resolved_assets_dir(), PathBuf::from(DEFAULT_ASSETS_DIR));
        assert!(config.resolved_assets_dir().is_relative());

        let config = PreviewConfig {
            assets_dir: Some(PathBuf::from("/opt/forma/assets")),
            ..PreviewConfig::default()
        };
        assert_eq!(config.resolved_assets_dir(), PathBuf::from("/opt/forma/assets"));
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let path =
            std::env::temp_dir().join(format!("forma_config_bad_{}.json", std::process::id()));
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            PreviewConfig::load_from(&path),
            Err(EngineError::Config(_))
        ));

        fs::remove_file(&path).ok();
    }
}
