//! Filesystem-backed editor environment for terminal sessions

use anyhow::{Context, Result, bail};
use forma_engine::{Document, EditorEnvironment};
use forma_protocol::is_cad_script;
use std::path::{Path, PathBuf};
use tracing::error;

/// Treats a script file, or every script in a directory, as the open editor
pub struct FsWorkspace {
    root: PathBuf,
}

impl FsWorkspace {
    pub fn new(path: &Path) -> Result<Self> {
        let root = path
            .canonicalize()
            .with_context(|| format!("Cannot open {}", path.display()))?;
        if root.is_file() && !is_cad_script(&root) {
            bail!(
                "{} is not a CAD script (expected .fcad or .formacad)",
                root.display()
            );
        }
        Ok(Self { root })
    }

    fn read(path: &Path) -> Option<Document> {
        std::fs::read_to_string(path)
            .ok()
            .map(|text| Document::new(path, text))
    }
}

impl EditorEnvironment for FsWorkspace {
    fn active_document(&self) -> Option<Document> {
        if self.root.is_file() {
            Self::read(&self.root)
        } else {
            None
        }
    }

    fn visible_documents(&self) -> Vec<Document> {
        if self.root.is_file() {
            return self.active_document().into_iter().collect();
        }

        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_cad_script(path))
            .collect();
        paths.sort();
        paths.iter().filter_map(|path| Self::read(path)).collect()
    }

    fn show_error(&self, message: &str) {
        error!("{}", message);
        eprintln!("ERROR: {message}");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_lists_scripts_in_order() {
        let dir = std::env::temp_dir().join(format!("forma_cli_ws_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("b.fcad"), "cube(1.0)").unwrap();
        std::fs::write(dir.join("a.formacad"), "sphere(1.0)").unwrap();
        std::fs::write(dir.join("notes.md"), "# notes").unwrap();

        let workspace = FsWorkspace::new(&dir).unwrap();
        assert!(workspace.active_document().is_none());

        let names: Vec<_> = workspace
            .visible_documents()
            .iter()
            .map(|d| d.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.formacad", "b.fcad"]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_rejects_non_script_file() {
        let path = std::env::temp_dir().join(format!("forma_cli_ws_{}.txt", std::process::id()));
        std::fs::write(&path, "hello").unwrap();
        assert!(FsWorkspace::new(&path).is_err());
        std::fs::remove_file(&path).ok();
    }
}
