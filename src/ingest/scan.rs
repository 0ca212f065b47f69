use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// Normalise configured extensions to lowercase with a leading dot.
pub fn normalize_extensions(exts: &[String]) -> Vec<String> {
    exts.iter()
        .map(|e| e.trim().to_ascii_lowercase())
        .filter(|e| !e.is_empty() && e != ".")
        .map(|e| if e.starts_with('.') { e } else { format!(".{e}") })
        .collect()
}

/// Whether `path` has one of `exts` (lowercase, dotted), ignoring case.
pub fn has_image_extension(path: &Path, exts: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .is_some_and(|e| exts.iter().any(|allowed| *allowed == e))
}

/// Recursively list image files under `root`, sorted for a stable order.
/// Unreadable directory entries are logged and skipped.
pub fn scan_images(root: &Path, exts: &[String]) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("Skipping unreadable entry under {}: {err}", root.display());
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| has_image_extension(path, exts))
        .collect();
    files.sort();
    files
}

/// Logical path of `file` relative to `upload_root`, with `/` separators.
/// Files outside the root keep their full path.
pub fn logical_path(file: &Path, upload_root: &Path) -> String {
    match file.strip_prefix(upload_root) {
        Ok(relative) => relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => file.to_string_lossy().into_owned(),
    }
}
