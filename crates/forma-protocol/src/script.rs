//! Script submissions and CAD-script recognition

use serde::{Deserialize, Serialize};
use std::path::Path;

/// File extensions reserved for CAD scripts
pub const SCRIPT_EXTENSIONS: [&str; 2] = ["fcad", "formacad"];

/// Check whether a document name refers to a CAD script
///
/// Only the two reserved extensions qualify; everything else is ignored by
/// the save/open watchers.
pub fn is_cad_script(path: impl AsRef<Path>) -> bool {
    path.as_ref()
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SCRIPT_EXTENSIONS.contains(&ext))
}

/// Normalize editor text into the form the kernel evaluates
///
/// Strips a leading byte-order mark and converts CRLF line endings so that
/// kernel error positions match what the user sees.
pub fn prepare_source(text: &str) -> String {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    text.replace("\r\n", "\n")
}

/// A script to evaluate, immutable once created
///
/// `source_id` identifies the originating document and is used for display
/// and diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptSubmission {
    code: String,
    source_id: String,
}

impl ScriptSubmission {
    /// Create a submission from already-prepared source
    pub fn new(code: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            source_id: source_id.into(),
        }
    }

    /// Create a submission from raw document text
    pub fn from_document(text: &str, path: &Path) -> Self {
        Self::new(prepare_source(text), path.display().to_string())
    }

    /// Script source
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Originating document identifier
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Short name of the originating document
    pub fn display_name(&self) -> &str {
        Path::new(&self.source_id)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.source_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recognizes_script_extensions() {
        assert!(is_cad_script("bracket.fcad"));
        assert!(is_cad_script("/work/parts/gear.formacad"));
        assert!(!is_cad_script("notes.txt"));
        assert!(!is_cad_script("bracket.fcad.bak"));
        assert!(!is_cad_script("fcad"));
    }

    #[test]
    fn test_prepare_source() {
        assert_eq!(prepare_source("\u{feff}cube(1.0)\r\n"), "cube(1.0)\n");
        assert_eq!(prepare_source("sphere(0.5)"), "sphere(0.5)");
    }

    #[test]
    fn test_submission_from_document() {
        let sub = ScriptSubmission::from_document("cube(1.0)\r\n", Path::new("/tmp/part.fcad"));
        assert_eq!(sub.code(), "cube(1.0)\n");
        assert_eq!(sub.source_id(), "/tmp/part.fcad");
        assert_eq!(sub.display_name(), "part.fcad");
    }
}
