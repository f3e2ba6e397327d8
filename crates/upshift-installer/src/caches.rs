use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

use crate::layout::{remove_file_if_exists, CacheKind, InstallationLayout};

/// Empties every configured cache directory and drops the generated index
/// file. Returns what could not be removed.
pub fn clear_caches(layout: &InstallationLayout) -> Vec<String> {
    let mut failures = Vec::new();
    for kind in CacheKind::ALL {
        for dir in layout.cache_dirs(kind) {
            debug!(cache = kind.as_str(), dir = %dir.display(), "clearing cache");
            failures.extend(empty_dir(&dir));
        }
    }
    if let Some(index_file) = layout.index_file_path() {
        if let Err(err) = remove_file_if_exists(&index_file) {
            failures.push(format!("{err:#}"));
        }
    }
    failures
}

/// Removes the contents of `dir` but keeps `dir` and its `index.php` guard.
fn empty_dir(dir: &Path) -> Vec<String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Vec::new(),
        Err(err) => return vec![format!("failed to read {}: {err}", dir.display())],
    };

    let mut failures = Vec::new();
    for entry in entries.flatten() {
        if entry.file_name() == "index.php" {
            continue;
        }
        let path = entry.path();
        let removed = match entry.file_type() {
            Ok(kind) if kind.is_dir() => fs::remove_dir_all(&path),
            _ => fs::remove_file(&path),
        };
        if let Err(err) = removed {
            failures.push(format!("failed to remove {}: {err}", path.display()));
        }
    }
    failures
}
