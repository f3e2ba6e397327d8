use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;
use upshift_core::{Manifest, PathFilterSet};

pub const ROOT_DIR: &str = ".";

/// Split one level deeper than the others, it is too large for one step.
const SPLIT_DEEPER_DIR: &str = "vendor";

/// Top-level directories holding the paths of `manifest`, root first. Files
/// sitting directly in the split directory keep it as an entry of its own.
pub fn split_top_level(manifest: &Manifest) -> Vec<String> {
    let mut dirs = vec![ROOT_DIR.to_string()];
    for path in manifest.paths() {
        let Some((first, rest)) = path.split_once('/') else {
            continue;
        };
        let dir = match rest.split_once('/') {
            Some((second, _)) if first == SPLIT_DEEPER_DIR => format!("{first}/{second}"),
            _ => first.to_string(),
        };
        if !dirs.contains(&dir) {
            dirs.push(dir);
        }
    }
    dirs
}

/// Whether `dir` from `split_top_level` is scanned with its subdirectories.
pub fn scans_recursively(dir: &str) -> bool {
    dir != ROOT_DIR && dir != SPLIT_DEEPER_DIR
}

/// Relative paths of the files below `dir` that `filter` keeps. Directories
/// are checked before they are entered, so filtered subtrees are never read.
/// A missing `dir` yields nothing.
pub fn scan_installation(
    root: &Path,
    dir: &str,
    recursive: bool,
    filter: &PathFilterSet,
) -> Result<Vec<String>> {
    let start = if dir == ROOT_DIR {
        String::new()
    } else {
        dir.trim_matches('/').to_string()
    };
    if !root.join(&start).is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let mut pending = vec![start];
    while let Some(current) = pending.pop() {
        let absolute = root.join(&current);
        let entries = fs::read_dir(&absolute)
            .with_context(|| format!("failed to read directory {}", absolute.display()))?;
        for entry in entries {
            let entry = entry
                .with_context(|| format!("failed to read entry in {}", absolute.display()))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                warn!(dir = %absolute.display(), "skipping non-UTF-8 file name");
                continue;
            };
            let path = if current.is_empty() {
                name.to_string()
            } else {
                format!("{current}/{name}")
            };

            let file_type = entry
                .file_type()
                .with_context(|| format!("failed to inspect {}", entry.path().display()))?;
            if file_type.is_dir() {
                if recursive && filter.may_descend(&path) {
                    pending.push(path);
                }
            } else if (file_type.is_file() || entry.path().is_file()) && filter.keep(&path) {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}
