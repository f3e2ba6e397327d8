use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::filter::{allow_rules, deny_rules, FilterAction, PathFilterSet, KEEP_RULES};
use crate::manifest::Manifest;

/// Core code locations. A local file there that neither release knows is
/// removed without asking, since stale code in these places gets loaded.
pub const FORCED_REMOVAL_RULES: &[&str] = &[
    "^vendor/",
    r"^Adapter/.*\.php$",
    r"^Core/.*\.php$",
    r"^classes/.*\.php$",
    r"^controllers/.*\.php$",
];

/// Rules for local files neither release lists: keep files stay in place,
/// forced removal paths are denied, anything else is obsolete.
pub fn forced_removal_filter() -> Result<PathFilterSet> {
    let mut rules = allow_rules(KEEP_RULES)?;
    rules.extend(deny_rules(FORCED_REMOVAL_RULES)?);
    Ok(PathFilterSet::with_rules(rules))
}

/// What the local scan learned about one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalFile {
    Hashed(String),
    /// Hashing was skipped; the content is unknown and never matches.
    Unhashable,
    /// Neither release lists the path, only existence matters.
    Present,
}

impl LocalFile {
    pub fn matches(&self, hash: &str) -> bool {
        matches!(self, Self::Hashed(local) if local == hash)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstallationRecord {
    entries: BTreeMap<String, LocalFile>,
}

impl InstallationRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, file: LocalFile) {
        self.entries.insert(path.into(), file);
    }

    pub fn get(&self, path: &str) -> Option<&LocalFile> {
        self.entries.get(path)
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

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LocalFile)> {
        self.entries.iter().map(|(path, file)| (path.as_str(), file))
    }
}

/// Three-way difference between the target release, the installed release
/// and the files actually on disk. The flag on `change` and `remove` entries
/// marks files edited by hand since the installed release.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changeset {
    pub change: BTreeMap<String, bool>,
    pub add: BTreeMap<String, bool>,
    pub remove: BTreeMap<String, bool>,
    pub obsolete: BTreeMap<String, bool>,
    #[serde(default)]
    pub selected_obsolete: BTreeSet<String>,
}

impl Changeset {
    pub fn calculate(
        target: &Manifest,
        origin: &Manifest,
        installed: &InstallationRecord,
        forced_removal: &PathFilterSet,
    ) -> Self {
        let mut changeset = Self::default();

        for (path, target_hash) in target.iter() {
            match installed.get(path) {
                Some(local) if local.matches(target_hash) => {}
                Some(local) => {
                    let manual = origin
                        .get(path)
                        .map(|origin_hash| !local.matches(origin_hash))
                        .unwrap_or(false);
                    changeset.change.insert(path.to_string(), manual);
                }
                None => {
                    changeset.add.insert(path.to_string(), false);
                }
            }
        }

        for (path, local) in installed.iter() {
            if target.contains(path) {
                continue;
            }
            if let Some(origin_hash) = origin.get(path) {
                changeset
                    .remove
                    .insert(path.to_string(), !local.matches(origin_hash));
            } else {
                match forced_removal.decision(path) {
                    Some(FilterAction::Allow) => {}
                    Some(FilterAction::Deny) => {
                        changeset.remove.insert(path.to_string(), true);
                    }
                    None => {
                        changeset.obsolete.insert(path.to_string(), true);
                    }
                }
            }
        }

        changeset
    }

    /// Keeps the given paths that are obsolete; returns how many were kept.
    pub fn select_obsolete<I, S>(&mut self, paths: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.selected_obsolete = paths
            .into_iter()
            .filter(|path| self.obsolete.contains_key(path.as_ref()))
            .map(|path| path.as_ref().to_string())
            .collect();
        self.selected_obsolete.len()
    }

    /// Paths that get new content from the release.
    pub fn staged_paths(&self) -> impl Iterator<Item = &str> {
        self.change.keys().chain(self.add.keys()).map(String::as_str)
    }

    /// Locally edited files that get overwritten or removed.
    pub fn manual_edits(&self) -> impl Iterator<Item = &str> {
        self.change
            .iter()
            .chain(self.remove.iter())
            .filter(|(_, manual)| **manual)
            .map(|(path, _)| path.as_str())
    }

    pub fn removals(&self) -> impl Iterator<Item = &str> {
        self.remove
            .keys()
            .map(String::as_str)
            .chain(self.selected_obsolete.iter().map(String::as_str))
    }

    pub fn is_empty(&self) -> bool {
        self.change.is_empty()
            && self.add.is_empty()
            && self.remove.is_empty()
            && self.obsolete.is_empty()
    }
}
