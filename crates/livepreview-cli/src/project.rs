//! Loading a project directory from disk

use livepreview_core::{ConversationMessage, PreviewError, ProjectFile, Result};
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Directories never worth descending into
const SKIPPED_DIRS: &[&str] = &[".git", "node_modules"];

/// Read every UTF-8 text file under `root`. Paths are relative with
/// forward slashes; binary files are skipped.
pub fn load_project(root: &Path) -> Result<Vec<ProjectFile>> {
    if !root.is_dir() {
        return Err(PreviewError::Io(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !SKIPPED_DIRS.contains(&entry.file_name().to_string_lossy().as_ref())
        });

    for entry in walker {
        let entry = entry.map_err(|e| PreviewError::Io(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        match String::from_utf8(std::fs::read(entry.path())?) {
            Ok(content) => files.push(ProjectFile::new(path, content)),
            Err(_) => debug!("Skipping non-UTF-8 file {}", path),
        }
    }

    debug!("Loaded {} files from {}", files.len(), root.display());
    Ok(files)
}

/// Conversation context: a JSON array of `{role, content}` objects
pub fn load_conversation(path: &Path) -> Result<Vec<ConversationMessage>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}
