use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{anyhow, Result};
use tracing::{debug, info, warn};
use upshift_core::{
    forced_removal_filter, is_stable_identifier, Changeset, InstallationRecord, LocalFile,
    Manifest, PathFilterSet, ReleaseRef,
};
use upshift_security::{BlobHash, ContentHasher};

use crate::context::EngineContext;
use crate::scan::{scan_installation, scans_recursively, split_top_level};
use crate::state::ManifestStore;
use crate::step::{ChangesetView, StepMachine, StepReport};

pub(crate) const STATE_MISSING: &str =
    "Crucial operation state is missing, reset the operation and start over.";

/// Builds the changeset between the installation and the target release,
/// one unit of work per step.
pub struct CompareEngine<'a> {
    store: &'a mut ManifestStore,
    context: EngineContext<'a>,
}

impl<'a> CompareEngine<'a> {
    pub fn new(store: &'a mut ManifestStore, context: EngineContext<'a>) -> Self {
        Self { store, context }
    }

    fn check_requirements(&mut self, target: &ReleaseRef, report: &mut StepReport) -> Result<()> {
        if !is_stable_identifier(&target.version) {
            self.store.state_mut().requirements_checked = true;
            report.progress("Target version is not a stable version, requirement checks skipped.");
            return Ok(());
        }

        let unmet = self.context.hooks.check_requirements(&target.version)?;
        if unmet.is_empty() {
            self.store.state_mut().requirements_checked = true;
            report.progress(format!(
                "Requirements for version {} checked.",
                target.version
            ));
        } else {
            report.fail(bulleted(
                &format!("Requirements for version {} are not met:", target.version),
                &unmet,
            ));
        }
        Ok(())
    }

    fn fetch_target(&mut self, target: &ReleaseRef, ignore_theme: bool, report: &mut StepReport) {
        let fetched = self
            .context
            .fetch_manifest(target, ignore_theme)
            .and_then(|manifest| {
                if manifest.is_empty() {
                    Err(anyhow!("the listing holds no files"))
                } else {
                    Ok(manifest)
                }
            });
        match fetched {
            Ok(manifest) => {
                info!(release = %target, paths = manifest.len(), "fetched target manifest");
                report.progress(format!(
                    "File list for version {} downloaded. Found {} paths to consider.",
                    target.version,
                    manifest.len()
                ));
                self.store.state_mut().manifests.insert(target.key(), manifest);
            }
            Err(err) => report.fail(format!(
                "Failed to download file list for version {} with error: {err:#}",
                target.version
            )),
        }
    }

    /// A missing origin listing only costs accuracy of the manual edit
    /// flags, so an empty manifest stands in for it.
    fn fetch_origin(&mut self, origin: &ReleaseRef, ignore_theme: bool, report: &mut StepReport) {
        match self.context.fetch_manifest(origin, ignore_theme) {
            Ok(manifest) => {
                info!(release = %origin, paths = manifest.len(), "fetched origin manifest");
                report.progress(format!("File list for version {} downloaded.", origin.version));
                self.store.state_mut().manifests.insert(origin.key(), manifest);
            }
            Err(err) => {
                warn!(release = %origin, error = %format!("{err:#}"), "origin manifest unavailable");
                report.progress(format!("File list for version {} not available.", origin.version));
                self.store
                    .state_mut()
                    .manifests
                    .insert(origin.key(), Manifest::new());
            }
        }
    }

    fn scan_next_dir(
        &mut self,
        origin: &ReleaseRef,
        target: &ReleaseRef,
        ignore_theme: bool,
        report: &mut StepReport,
    ) -> Result<()> {
        let Some(dir) = self
            .store
            .state()
            .top_level
            .as_ref()
            .and_then(|dirs| dirs.last().cloned())
        else {
            return Ok(());
        };

        let filter = PathFilterSet::installation(ignore_theme)?;
        let root = self.context.layout.root();
        let paths = scan_installation(root, &dir, scans_recursively(&dir), &filter)?;

        let state = self.store.state();
        let (Some(target_manifest), Some(origin_manifest)) =
            (state.manifest(target), state.manifest(origin))
        else {
            report.fail(STATE_MISSING);
            return Ok(());
        };
        let entries: Vec<(String, LocalFile)> = paths
            .into_iter()
            .map(|path| {
                let file = if target_manifest.contains(&path) || origin_manifest.contains(&path) {
                    hash_local(self.context.hasher, &root.join(&path))
                } else {
                    LocalFile::Present
                };
                (path, file)
            })
            .collect();
        debug!(dir = %dir, files = entries.len(), "scanned installation directory");

        let state = self.store.state_mut();
        if let Some(dirs) = state.top_level.as_mut() {
            dirs.pop();
        }
        let installation = state.installation.get_or_insert_with(InstallationRecord::new);
        for (path, file) in entries {
            installation.insert(path, file);
        }
        report.progress(format!("Searched installed files in {dir}/"));
        Ok(())
    }

    /// Manifest files the scan skipped because their directory is filtered.
    fn add_distribution_fileset(&mut self, origin: &ReleaseRef, target: &ReleaseRef) -> Result<()> {
        let state = self.store.state();
        let (Some(target_manifest), Some(origin_manifest), Some(installation)) = (
            state.manifest(target),
            state.manifest(origin),
            state.installation.as_ref(),
        ) else {
            return Err(anyhow!(STATE_MISSING));
        };

        let layout = self.context.layout;
        let missed: BTreeSet<String> = target_manifest
            .paths()
            .chain(origin_manifest.paths())
            .filter(|path| !installation.contains(path) && layout.path(path).is_file())
            .map(str::to_string)
            .collect();

        let entries: Vec<(String, LocalFile)> = missed
            .into_iter()
            .map(|path| {
                let file = hash_local(self.context.hasher, &layout.path(&path));
                (path, file)
            })
            .collect();
        let state = self.store.state_mut();
        if let Some(installation) = state.installation.as_mut() {
            for (path, file) in entries {
                installation.insert(path, file);
            }
        }
        state.distribution_fileset_added = true;
        Ok(())
    }

    fn calculate_changeset(
        &mut self,
        origin: &ReleaseRef,
        target: &ReleaseRef,
        report: &mut StepReport,
    ) -> Result<()> {
        let state = self.store.state();
        let (Some(target_manifest), Some(origin_manifest), Some(installation)) = (
            state.manifest(target),
            state.manifest(origin),
            state.installation.as_ref(),
        ) else {
            report.fail(STATE_MISSING);
            return Ok(());
        };

        let changeset = Changeset::calculate(
            target_manifest,
            origin_manifest,
            installation,
            &forced_removal_filter()?,
        );
        info!(
            change = changeset.change.len(),
            add = changeset.add.len(),
            remove = changeset.remove.len(),
            obsolete = changeset.obsolete.len(),
            "changeset calculated"
        );
        report.changeset = Some(ChangesetView::new(&changeset, None));
        report.progress("Changeset calculated.");
        self.store.state_mut().changeset = Some(changeset);
        Ok(())
    }

    fn detect_incompatible_modules(
        &mut self,
        target: &ReleaseRef,
        report: &mut StepReport,
    ) -> Result<()> {
        let modules = self.context.hooks.incompatible_modules(&target.version)?;
        let state = self.store.state_mut();
        if let Some(changeset) = state.changeset.as_ref() {
            report.changeset = Some(ChangesetView::new(changeset, Some(&modules)));
        }
        report.progress(format!(
            "Found {} installed modules incompatible with version {}.",
            modules.len(),
            target.version
        ));
        state.incompatible_modules = Some(modules);
        Ok(())
    }
}

impl StepMachine for CompareEngine<'_> {
    fn step(&mut self, report: &mut StepReport) -> Result<()> {
        let state = self.store.state();
        let (Some(origin), Some(target), Some(ignore_theme)) =
            (state.origin.clone(), state.target.clone(), state.ignore_theme)
        else {
            report.fail(STATE_MISSING);
            return Ok(());
        };

        if !state.requirements_checked {
            self.check_requirements(&target, report)
        } else if state.manifest(&target).is_none() {
            self.fetch_target(&target, ignore_theme, report);
            Ok(())
        } else if state.manifest(&origin).is_none() {
            self.fetch_origin(&origin, ignore_theme, report);
            Ok(())
        } else if state.top_level.is_none() {
            let dirs = state
                .manifest(&target)
                .map(split_top_level)
                .unwrap_or_default();
            let state = self.store.state_mut();
            state.top_level = Some(dirs);
            state.installation = Some(InstallationRecord::new());
            report.progress("Extracted top level directories.");
            Ok(())
        } else if state.top_level.as_ref().is_some_and(|dirs| !dirs.is_empty()) {
            self.scan_next_dir(&origin, &target, ignore_theme, report)
        } else if !state.distribution_fileset_added {
            self.add_distribution_fileset(&origin, &target)?;
            report.progress("Added distribution fileset.");
            Ok(())
        } else if state.changeset.is_none() {
            self.calculate_changeset(&origin, &target, report)
        } else if state.incompatible_modules.is_none() {
            self.detect_incompatible_modules(&target, report)
        } else {
            report.finish("Done.");
            Ok(())
        }
    }
}

/// Unhashable files never match a release hash, so they show up as changed.
pub(crate) fn hash_local(hasher: &ContentHasher, path: &Path) -> LocalFile {
    match hasher.hash_file(path) {
        Ok(BlobHash::Digest(hash)) => LocalFile::Hashed(hash),
        Ok(BlobHash::Skipped) => {
            warn!(path = %path.display(), "file too large to hash within the memory ceiling");
            LocalFile::Unhashable
        }
        Err(err) => {
            warn!(path = %path.display(), error = %format!("{err:#}"), "failed to hash file");
            LocalFile::Unhashable
        }
    }
}

pub(crate) fn bulleted(headline: &str, items: &[String]) -> String {
    let mut text = headline.to_string();
    for item in items {
        text.push_str("\n - ");
        text.push_str(item);
    }
    text
}
