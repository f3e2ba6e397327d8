use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::filter::PathFilterSet;

/// Name of the back office directory inside a release.
pub const RELEASE_ADMIN_DIR: &str = "admin";

/// Relative path to content hash for one release. Paths are already filtered
/// and use the local admin directory name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a manifest from listing lines. Non-blob entries are skipped.
    pub fn from_listing<I, S>(lines: I, filter: &PathFilterSet, remap: &AdminDirRemap) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut manifest = Self::new();
        for line in lines {
            let line = line.as_ref();
            if line.trim().is_empty() {
                continue;
            }
            let entry = parse_listing_line(line)?;
            if entry.kind != "blob" {
                debug!(path = %entry.path, kind = %entry.kind, "skipping non-blob listing entry");
                continue;
            }
            if !filter.keep(&entry.path) {
                continue;
            }
            manifest.insert(remap.to_local(&entry.path), entry.hash);
        }
        Ok(manifest)
    }

    pub fn insert(&mut self, path: impl Into<String>, hash: impl Into<String>) {
        self.entries.insert(path.into(), hash.into());
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(path, hash)| (path.as_str(), hash.as_str()))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl FromIterator<(String, String)> for Manifest {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub mode: String,
    pub kind: String,
    pub hash: String,
    pub path: String,
}

/// Parses `<mode> <kind> <hash>\t<path>`. The path may contain spaces.
pub fn parse_listing_line(line: &str) -> Result<ListingEntry> {
    let mut fields = line.splitn(3, ' ');
    let (Some(mode), Some(kind), Some(rest)) = (fields.next(), fields.next(), fields.next()) else {
        return Err(anyhow!("malformed listing line '{line}'"));
    };
    let Some((hash, path)) = rest.split_once('\t') else {
        return Err(anyhow!("listing line without path '{line}'"));
    };
    if hash.is_empty() || !hash.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return Err(anyhow!("invalid content hash in listing line '{line}'"));
    }
    if path.is_empty() {
        return Err(anyhow!("listing line without path '{line}'"));
    }

    Ok(ListingEntry {
        mode: mode.to_string(),
        kind: kind.to_string(),
        hash: hash.to_ascii_lowercase(),
        path: path.to_string(),
    })
}

/// Maps the release `admin/` prefix to a renamed local back office directory
/// and back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminDirRemap {
    local: Option<String>,
}

impl AdminDirRemap {
    pub fn new(local_admin_dir: Option<&str>) -> Self {
        let local = local_admin_dir
            .map(|dir| dir.trim_matches('/').to_string())
            .filter(|dir| !dir.is_empty() && dir != RELEASE_ADMIN_DIR);
        Self { local }
    }

    pub fn local_dir(&self) -> Option<&str> {
        self.local.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.local.is_some()
    }

    pub fn to_local(&self, release_path: &str) -> String {
        match &self.local {
            Some(local) => swap_prefix(release_path, RELEASE_ADMIN_DIR, local),
            None => release_path.to_string(),
        }
    }

    pub fn to_release(&self, local_path: &str) -> String {
        match &self.local {
            Some(local) => swap_prefix(local_path, local, RELEASE_ADMIN_DIR),
            None => local_path.to_string(),
        }
    }
}

fn swap_prefix(path: &str, from: &str, to: &str) -> String {
    match path.strip_prefix(from) {
        Some(rest) if rest.starts_with('/') => format!("{to}{rest}"),
        _ => path.to_string(),
    }
}
