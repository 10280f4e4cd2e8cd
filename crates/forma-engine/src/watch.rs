//! Turns file saves into editor events
//!
//! Watches script files or directories and emits
//! [`EditorEvent::DocumentSaved`] with the new contents of every CAD script
//! that changes.

use crate::error::{EngineError, Result};
use crate::host::{Document, EditorEvent};
use forma_protocol::is_cad_script;
use notify::RecursiveMode;
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A watched location
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    /// A single script; its parent directory is watched so atomic saves
    /// (write to temp, rename over) are seen too
    File(PathBuf),
    /// Every CAD script directly inside a directory
    Dir(PathBuf),
}

impl Target {
    fn matches(&self, path: &Path) -> bool {
        match self {
            Self::File(file) => path == file,
            Self::Dir(dir) => path.parent() == Some(dir.as_path()) && is_cad_script(path),
        }
    }

    fn watch_root(&self) -> &Path {
        match self {
            Self::File(file) => file.parent().unwrap_or(file),
            Self::Dir(dir) => dir,
        }
    }
}

fn on_events(
    result: DebounceEventResult,
    targets: &Mutex<Vec<Target>>,
    sender: &mpsc::UnboundedSender<EditorEvent>,
) {
    let events = match result {
        Ok(events) => events,
        Err(e) => {
            warn!("Watch error: {:?}", e);
            return;
        }
    };

    for event in events {
        let path = event.path;
        if !targets.lock().iter().any(|t| t.matches(&path)) {
            continue;
        }

        // Deleted files and half-written renames are not saves
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                debug!("Saved: {}", path.display());
                let _ = sender.send(EditorEvent::DocumentSaved(Document::new(path, text)));
            }
            Err(e) => debug!("Skipping {}: {}", path.display(), e),
        }
    }
}

/// Watches CAD scripts on disk
pub struct DocumentWatcher {
    debouncer: Debouncer<notify::RecommendedWatcher>,
    targets: Arc<Mutex<Vec<Target>>>,
}

impl DocumentWatcher {
    /// Create a watcher sending saves to `sender`
    pub fn new(debounce: Duration, sender: mpsc::UnboundedSender<EditorEvent>) -> Result<Self> {
        let targets = Arc::new(Mutex::new(Vec::new()));
        let shared = Arc::clone(&targets);

        let debouncer = new_debouncer(debounce, move |result: DebounceEventResult| {
            on_events(result, &shared, &sender);
        })
        .map_err(|e| EngineError::Watch(format!("Failed to create file watcher: {e:?}")))?;

        Ok(Self { debouncer, targets })
    }

    /// Watch a script file or a directory of scripts
    pub fn watch(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let canonical = path
            .canonicalize()
            .map_err(|e| EngineError::Watch(format!("Cannot watch {}: {}", path.display(), e)))?;

        let target = if canonical.is_dir() {
            Target::Dir(canonical)
        } else {
            Target::File(canonical)
        };

        self.debouncer
            .watcher()
            .watch(target.watch_root(), RecursiveMode::NonRecursive)
            .map_err(|e| {
                EngineError::Watch(format!(
                    "Failed to watch {}: {}",
                    target.watch_root().display(),
                    e
                ))
            })?;

        info!("Watching: {}", target.watch_root().display());
        let mut targets = self.targets.lock();
        if !targets.contains(&target) {
            targets.push(target);
        }
        Ok(())
    }

    /// Number of watched locations
    pub fn len(&self) -> usize {
        self.targets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_target_matching() {
        let dir = Target::Dir(PathBuf::from("/work/parts"));
        assert!(dir.matches(Path::new("/work/parts/gear.fcad")));
        assert!(!dir.matches(Path::new("/work/parts/notes.txt")));
        assert!(!dir.matches(Path::new("/work/parts/sub/gear.fcad")));

        let file = Target::File(PathBuf::from("/work/parts/gear.fcad"));
        assert!(file.matches(Path::new("/work/parts/gear.fcad")));
        assert!(!file.matches(Path::new("/work/parts/other.fcad")));
        assert_eq!(file.watch_root(), Path::new("/work/parts"));
    }

    #[test]
    fn test_watch_nonexistent() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut watcher = DocumentWatcher::new(Duration::from_millis(50), tx).unwrap();
        assert!(watcher.watch("/nonexistent/path/part.fcad").is_err());
        assert!(watcher.is_empty());
    }

    #[test]
    fn test_watch_directory() {
        let dir = std::env::temp_dir().join(format!("forma_watch_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let mut watcher = DocumentWatcher::new(Duration::from_millis(50), tx).unwrap();
        watcher.watch(&dir).unwrap();
        watcher.watch(&dir).unwrap();
        assert_eq!(watcher.len(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }
}
