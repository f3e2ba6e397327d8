use std::fs;
use std::path::{Component, Path};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use tracing::{debug, warn};

/// Unpacks a gzip tarball below `destination` and returns the relative
/// paths of the regular files it contained. Entries that would land outside
/// `destination` and anything other than files and directories are skipped.
pub fn unpack_archive(bytes: &[u8], destination: &Path) -> Result<Vec<String>> {
    fs::create_dir_all(destination)
        .with_context(|| format!("failed creating {}", destination.display()))?;

    let mut archive = tar::Archive::new(GzDecoder::new(bytes));
    let mut unpacked = Vec::new();
    for entry in archive
        .entries()
        .context("failed reading release archive")?
    {
        let mut entry = entry.context("failed reading release archive entry")?;
        let entry_type = entry.header().entry_type();
        let entry_path = entry
            .path()
            .context("invalid path in release archive")?
            .into_owned();

        let Some(relative) = normalize_entry_path(&entry_path) else {
            warn!(path = %entry_path.display(), "skipping unsafe archive entry");
            continue;
        };
        if !(entry_type.is_file() || entry_type.is_dir()) {
            debug!(path = %relative, "skipping special archive entry");
            continue;
        }

        let placed = entry
            .unpack_in(destination)
            .with_context(|| format!("failed unpacking {relative}"))?;
        if placed && entry_type.is_file() {
            unpacked.push(relative);
        }
    }

    Ok(unpacked)
}

fn normalize_entry_path(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}
