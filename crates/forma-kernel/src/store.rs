//! Model assets and where they are published
//!
//! A published model is addressed by URL. Every publication gets a fresh URL,
//! so a presentation layer can tell two evaluations apart even when they
//! produce identical geometry.

use crate::error::{KernelError, Result};
use crate::kernel::path_from_address;
use crate::solid::Shape;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Model format identifier written into every asset
pub const MODEL_FORMAT: &str = "forma-csg/1";

/// A renderable model asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub format: String,
    pub primitive_count: usize,
    pub root: Shape,
}

impl Model {
    pub fn new(root: Shape) -> Self {
        Self {
            format: MODEL_FORMAT.to_string(),
            primitive_count: root.primitive_count(),
            root,
        }
    }
}

/// Publishes model assets under addressable URLs
pub trait ModelStore: Send + Sync {
    /// Store a model and return its URL
    fn publish(&self, model: &Model) -> Result<String>;

    /// Look up a published model
    fn fetch(&self, url: &str) -> Option<Model>;

    /// Release a published model; unknown URLs are ignored
    fn revoke(&self, url: &str);
}

/// In-memory store handing out `model://<n>` URLs
#[derive(Debug, Default)]
pub struct MemoryModelStore {
    models: RwLock<HashMap<String, Arc<Model>>>,
    next_id: AtomicU64,
}

impl MemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of models currently published
    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    /// Check if nothing is published
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ModelStore for MemoryModelStore {
    fn publish(&self, model: &Model) -> Result<String> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let url = format!("model://{id}");
        self.models.write().insert(url.clone(), Arc::new(model.clone()));
        Ok(url)
    }

    fn fetch(&self, url: &str) -> Option<Model> {
        self.models.read().get(url).map(|m| (**m).clone())
    }

    fn revoke(&self, url: &str) {
        self.models.write().remove(url);
    }
}

/// Store writing each model as a JSON file, addressed by `file://` URL
#[derive(Debug)]
pub struct DirectoryModelStore {
    dir: PathBuf,
    next_id: AtomicU64,
}

impl DirectoryModelStore {
    /// Create a store rooted at `dir`, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            next_id: AtomicU64::new(0),
        })
    }

    /// Output directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ModelStore for DirectoryModelStore {
    fn publish(&self, model: &Model) -> Result<String> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let path = self
            .dir
            .join(format!("model-{}-{id}.json", std::process::id()));

        let json = serde_json::to_string_pretty(model)?;
        std::fs::write(&path, json).map_err(|e| {
            KernelError::Store(format!("Failed to write {}: {}", path.display(), e))
        })?;

        Ok(format!("file://{}", path.display()))
    }

    fn fetch(&self, url: &str) -> Option<Model> {
        let content = std::fs::read_to_string(path_from_address(url)).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn revoke(&self, url: &str) {
        let path = path_from_address(url);
        if path.starts_with(&self.dir)
            && let Err(e) = std::fs::remove_file(&path)
        {
            tracing::debug!("Could not remove {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ball() -> Model {
        Model::new(Shape::Sphere { radius: 1.0 })
    }

    #[test]
    fn test_memory_store_unique_urls() {
        let store = MemoryModelStore::new();
        let first = store.publish(&ball()).unwrap();
        let second = store.publish(&ball()).unwrap();

        assert_ne!(first, second);
        assert_eq!(store.len(), 2);
        assert_eq!(store.fetch(&first).unwrap().primitive_count, 1);
    }

    #[test]
    fn test_memory_store_revoke() {
        let store = MemoryModelStore::new();
        let url = store.publish(&ball()).unwrap();
        store.revoke(&url);
        store.revoke("model://unknown");

        assert!(store.fetch(&url).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_directory_store_roundtrip() {
        let dir = std::env::temp_dir().join(format!("forma_store_test_{}", std::process::id()));
        let store = DirectoryModelStore::new(&dir).unwrap();

        let url = store.publish(&ball()).unwrap();
        assert!(url.starts_with("file://"));
        assert_eq!(store.fetch(&url).unwrap(), ball());

        store.revoke(&url);
        assert!(store.fetch(&url).is_none());

        std::fs::remove_dir_all(&dir).ok();
    }
}
