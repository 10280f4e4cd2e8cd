//! Runtime asset resolution
//!
//! The preview surface needs six runtime assets. Build pipelines emit them
//! with content hashes in their names (`kernel-3fa9c1.rhai`), so they are
//! located by role rather than by fixed filename.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File name of the generated manifest
pub const MANIFEST_FILE: &str = "assets-manifest.json";

/// Logical role of a runtime asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetRole {
    WorkerBootstrap,
    KernelBinary,
    UiScript,
    UiStylesheet,
    PlayIcon,
    PauseIcon,
}

impl AssetRole {
    /// Every role the preview surface requires
    pub const ALL: [AssetRole; 6] = [
        AssetRole::WorkerBootstrap,
        AssetRole::KernelBinary,
        AssetRole::UiScript,
        AssetRole::UiStylesheet,
        AssetRole::PlayIcon,
        AssetRole::PauseIcon,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::WorkerBootstrap => "worker-bootstrap",
            Self::KernelBinary => "kernel-binary",
            Self::UiScript => "ui-script",
            Self::UiStylesheet => "ui-stylesheet",
            Self::PlayIcon => "play-icon",
            Self::PauseIcon => "pause-icon",
        }
    }

    /// File name prefix and accepted extensions for a directory scan
    fn pattern(self) -> (&'static str, &'static [&'static str]) {
        match self {
            Self::WorkerBootstrap => ("worker-bootstrap", &[".json"]),
            Self::KernelBinary => ("kernel", &[".rhai"]),
            Self::UiScript => ("viewer", &[".js"]),
            Self::UiStylesheet => ("viewer", &[".css"]),
            Self::PlayIcon => ("play", &[".svg", ".png"]),
            Self::PauseIcon => ("pause", &[".svg", ".png"]),
        }
    }

    fn matches(self, file_name: &str) -> bool {
        let (prefix, extensions) = self.pattern();
        file_name.starts_with(prefix) && extensions.iter().any(|ext| file_name.ends_with(ext))
    }
}

impl fmt::Display for AssetRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concrete addresses for a set of roles
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedAssets {
    locations: BTreeMap<AssetRole, String>,
}

impl ResolvedAssets {
    pub fn insert(&mut self, role: AssetRole, address: impl Into<String>) {
        self.locations.insert(role, address.into());
    }

    /// Address of a role, if resolved
    pub fn get(&self, role: AssetRole) -> Option<&str> {
        self.locations.get(&role).map(String::as_str)
    }

    /// Address of a role, failing with `AssetMissing`
    pub fn require(&self, role: AssetRole) -> Result<&str> {
        self.get(role).ok_or(EngineError::AssetMissing { role })
    }

    pub fn iter(&self) -> impl Iterator<Item = (AssetRole, &str)> {
        self.locations.iter().map(|(role, addr)| (*role, addr.as_str()))
    }
}

/// Maps logical roles to addressable locations
pub trait AssetResolver: Send + Sync {
    /// Resolve every role or fail with `AssetMissing` for the first one missing
    fn resolve(&self, roles: &[AssetRole]) -> Result<ResolvedAssets>;
}

fn address_of(path: &Path) -> String {
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    format!("file://{}", path.display())
}

fn sorted_file_names(dir: &Path) -> Vec<String> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot read asset directory {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();
    names
}

/// Finds assets by scanning a directory for role prefixes and extensions
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    root: PathBuf,
}

impl DirectoryResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn find(&self, names: &[String], role: AssetRole) -> Option<String> {
        names.iter().find(|name| role.matches(name)).cloned()
    }
}

impl AssetResolver for DirectoryResolver {
    fn resolve(&self, roles: &[AssetRole]) -> Result<ResolvedAssets> {
        let names = sorted_file_names(&self.root);
        let mut assets = ResolvedAssets::default();

        for &role in roles {
            let name = self
                .find(&names, role)
                .ok_or(EngineError::AssetMissing { role })?;
            assets.insert(role, address_of(&self.root.join(name)));
        }

        Ok(assets)
    }
}

/// Reads role → file name pairs from an `assets-manifest.json`
#[derive(Debug, Clone)]
pub struct ManifestResolver {
    manifest: PathBuf,
}

impl ManifestResolver {
    pub fn new(manifest: impl Into<PathBuf>) -> Self {
        Self {
            manifest: manifest.into(),
        }
    }

    /// Resolver for the manifest inside `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(MANIFEST_FILE))
    }

    fn load(&self) -> Result<BTreeMap<AssetRole, String>> {
        let content = std::fs::read_to_string(&self.manifest)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl AssetResolver for ManifestResolver {
    fn resolve(&self, roles: &[AssetRole]) -> Result<ResolvedAssets> {
        let entries = match self.load() {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot load {}: {}", self.manifest.display(), e);
                BTreeMap::new()
            }
        };
        let base = self.manifest.parent().unwrap_or_else(|| Path::new("."));

        let mut assets = ResolvedAssets::default();
        for &role in roles {
            let path = entries
                .get(&role)
                .map(|name| base.join(name))
                .filter(|path| path.is_file())
                .ok_or(EngineError::AssetMissing { role })?;
            assets.insert(role, address_of(&path));
        }

        Ok(assets)
    }
}

/// Scan `dir` and write its `assets-manifest.json`
///
/// Fails without writing anything if a role has no matching file.
pub fn write_manifest(dir: impl AsRef<Path>) -> Result<PathBuf> {
    let dir = dir.as_ref();
    let names = sorted_file_names(dir);
    let scanner = DirectoryResolver::new(dir);

    let mut manifest = BTreeMap::new();
    for role in AssetRole::ALL {
        let name = scanner
            .find(&names, role)
            .ok_or(EngineError::AssetMissing { role })?;
        manifest.insert(role, name);
    }

    let path = dir.join(MANIFEST_FILE);
    std::fs::write(&path, serde_json::to_string_pretty(&manifest)?)?;
    info!("Generated {} with {} entries", path.display(), manifest.len());
    Ok(path)
}
