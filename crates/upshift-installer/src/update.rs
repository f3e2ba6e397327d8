use std::collections::BTreeSet;
use std::fs;

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{debug, info, warn};
use upshift_core::{floating_version_stamp, ReleaseRef, RELEASE_ADMIN_DIR};
use upshift_registry::{unpack_archive, ArchiveResponse};
use upshift_security::BlobHash;

use crate::caches::clear_caches;
use crate::compare::{bulleted, STATE_MISSING};
use crate::context::EngineContext;
use crate::layout::remove_dir_if_exists;
use crate::migrate::describe_migration;
use crate::release::{write_channel_stamp, write_settings_version};
use crate::script::build_mutation_plan;
use crate::state::ManifestStore;
use crate::step::{StepMachine, StepReport};

/// Files requested per archive download.
pub const DOWNLOAD_BATCH: usize = 100;

const BACKUP_DATE_SUFFIX: &str = "-%Y-%m-%d--%H-%M-%S";

/// Applies a completed comparison to the installation, one unit of work per
/// step.
pub struct UpdateEngine<'a> {
    store: &'a mut ManifestStore,
    context: EngineContext<'a>,
}

impl<'a> UpdateEngine<'a> {
    pub fn new(store: &'a mut ManifestStore, context: EngineContext<'a>) -> Self {
        Self { store, context }
    }

    /// Module failures are reported and the next module is tried anyway.
    fn remove_incompatible_module(&mut self, report: &mut StepReport) {
        let Some(module) = self
            .store
            .state_mut()
            .incompatible_modules
            .as_mut()
            .and_then(Vec::pop)
        else {
            return;
        };

        let errors = self.context.hooks.remove_module(&module);
        if errors.is_empty() {
            info!(module = %module, "removed incompatible module");
            report.progress(format!("Uninstalled and deleted module {module} successfully."));
        } else {
            warn!(module = %module, failures = errors.len(), "module removal failed");
            report.progress(bulleted(
                &format!("Removal of module {module} failed, please fix this manually:"),
                &errors,
            ));
        }
    }

    fn plan_downloads(&mut self, report: &mut StepReport) -> Result<()> {
        let layout = self.context.layout;
        let Some(changeset) = self.store.state().changeset.as_ref() else {
            report.fail(STATE_MISSING);
            return Ok(());
        };
        let mut downloads: BTreeSet<String> =
            changeset.staged_paths().map(str::to_string).collect();
        downloads.insert(layout.bootstrap().path().to_string());

        let staging = layout.downloads_dir();
        remove_dir_if_exists(&staging)?;
        fs::create_dir_all(&staging)
            .with_context(|| format!("failed to create {}", staging.display()))?;

        report.progress(format!(
            "Downloads calculated, {} files to download.",
            downloads.len()
        ));
        self.store.state_mut().downloads = Some(downloads);
        Ok(())
    }

    /// Downloads one batch and keeps the files whose hash matches the target
    /// manifest. Rejected files stay pending for the next attempt.
    fn download_batch(&mut self, target: &ReleaseRef, report: &mut StepReport) -> Result<()> {
        let layout = self.context.layout;
        let remap = layout.remap();
        let state = self.store.state();
        let (Some(downloads), Some(manifest)) = (state.downloads.as_ref(), state.manifest(target))
        else {
            report.fail(STATE_MISSING);
            return Ok(());
        };

        let requested: Vec<String> = downloads
            .iter()
            .take(DOWNLOAD_BATCH)
            .map(|path| remap.to_release(path))
            .collect();
        let channel = self.context.channel(&target.channel)?;
        let response = self
            .context
            .fetcher
            .fetch_archive(channel, &target.version, &requested);
        let archive = match response {
            Ok(ArchiveResponse::Archive(archive)) => archive,
            Ok(ArchiveResponse::Message(message)) => {
                report.fail(format!("Failed to download files with error: {message}"));
                return Ok(());
            }
            Err(err) => {
                report.fail(format!("Failed to download files with error: {err:#}"));
                return Ok(());
            }
        };

        let staging = layout.downloads_dir();
        let unpacked = match unpack_archive(&archive, &staging) {
            Ok(unpacked) => unpacked,
            Err(err) => {
                report.fail(format!("Failed to unpack downloaded files: {err:#}"));
                return Ok(());
            }
        };

        let bootstrap = layout.bootstrap().path();
        let mut verified = Vec::new();
        for release_path in unpacked {
            let local = remap.to_local(&release_path);
            let staged = staging.join(&release_path);
            let valid = local == bootstrap
                || manifest.get(&local).is_some_and(|expected| {
                    matches!(
                        self.context.hasher.hash_file(&staged),
                        Ok(BlobHash::Digest(hash)) if hash == expected
                    )
                });
            if valid {
                verified.push(local);
            } else {
                warn!(path = %local, "discarding downloaded file with unexpected content");
                if let Err(err) = fs::remove_file(&staged) {
                    warn!(path = %local, error = %err, "failed to remove discarded download");
                }
            }
        }

        let state = self.store.state_mut();
        let Some(downloads) = state.downloads.as_mut() else {
            report.fail(STATE_MISSING);
            return Ok(());
        };
        let before = downloads.len();
        for path in &verified {
            downloads.remove(path);
        }
        let accepted = before - downloads.len();
        let remaining = downloads.len();
        debug!(accepted, remaining, "download batch verified");

        if remaining == 0 {
            if let Some(local_admin) = remap.local_dir() {
                let from = staging.join(RELEASE_ADMIN_DIR);
                if from.is_dir() {
                    let to = staging.join(local_admin);
                    if let Err(err) = fs::rename(&from, &to) {
                        report.fail(format!(
                            "Could not rename {} to {}: {err}",
                            from.display(),
                            to.display()
                        ));
                        return Ok(());
                    }
                }
            }
        }

        if accepted == 0 {
            report.fail("Downloaded files successfully, but found no valid files in there.");
        } else {
            report.progress(format!(
                "Downloaded a couple of files, {remaining} files remaining."
            ));
        }
        Ok(())
    }

    fn write_mutation_plan(&mut self, report: &mut StepReport) -> Result<()> {
        let layout = self.context.layout;
        let Some(changeset) = self.store.state().changeset.as_ref() else {
            report.fail(STATE_MISSING);
            return Ok(());
        };

        let suffix = Local::now().format(BACKUP_DATE_SUFFIX).to_string();
        let backup_dir = layout.backup_dir(&suffix);
        let plan = build_mutation_plan(layout, changeset, &backup_dir);
        let has_manual_edits = changeset.manual_edits().next().is_some();

        layout.ensure_state_dir()?;
        let plan_path = layout.plan_path();
        if let Err(err) = plan.write_to(&plan_path) {
            report.fail(format!(
                "Could not create update script {}, error: {err}",
                plan_path.display()
            ));
            return Ok(());
        }
        info!(operations = plan.len(), plan = %plan_path.display(), "wrote mutation plan");

        let shown_backup_dir = backup_dir
            .strip_prefix(layout.root())
            .unwrap_or(&backup_dir)
            .display()
            .to_string();
        report.update_script = true;
        report.progress("Created update script.");
        if has_manual_edits {
            report.progress(format!(
                "Manually modified files get backed up to {shown_backup_dir}/."
            ));
        }
        report.progress("Now running the update script...");

        let state = self.store.state_mut();
        state.backup_dir = Some(format!("{shown_backup_dir}/"));
        state.update_script_written = true;
        Ok(())
    }

    /// A plan file that no longer exists already ran.
    fn run_mutation_plan(&mut self, target: &ReleaseRef, report: &mut StepReport) -> Result<()> {
        let plan_path = self.context.layout.plan_path();
        if plan_path.exists() {
            let outcome = self.context.runner.run(&plan_path)?;
            if !outcome.failures.is_empty() {
                warn!(failures = outcome.failures.len(), "mutation plan had failures");
                report.progress(bulleted(
                    "Some operations of the update script failed:",
                    &outcome.failures,
                ));
            }
        }

        self.store.state_mut().update_script_done = true;
        report.progress(format!(
            "Update script was executed. Welcome to version {}!",
            target.version
        ));
        Ok(())
    }

    /// Collects every failure instead of stopping at the first one.
    fn aftermath(&mut self, target: &ReleaseRef, report: &mut StepReport) {
        let layout = self.context.layout;
        let mut errors = Vec::new();

        if let Err(err) = write_channel_stamp(layout, &target.channel) {
            errors.push(format!("{err:#}"));
        }

        let bootstrap_path = layout.staged_bootstrap_path();
        match layout.bootstrap().read_version(&bootstrap_path) {
            Ok(Some(install_version)) => {
                let stamp = floating_version_stamp(&install_version, &target.version);
                if let Err(err) = write_settings_version(layout, &stamp) {
                    errors.push(format!("{err:#}"));
                }
            }
            Ok(None) => errors.push(format!(
                "No version declaration found in {}.",
                bootstrap_path.display()
            )),
            Err(err) => errors.push(format!("{err:#}")),
        }

        if let Err(err) = remove_dir_if_exists(&layout.downloads_dir()) {
            warn!(error = %format!("{err:#}"), "failed to remove staging area");
        }

        errors.extend(self.context.hooks.database_upgrades());

        if errors.is_empty() {
            self.store.state_mut().aftermath_done = true;
            report.progress("Aftermath done.");
        } else {
            report.fail(bulleted("Aftermath failed, please fix this manually:", &errors));
        }
    }

    fn clear_caches(&mut self, report: &mut StepReport) {
        let failures = clear_caches(self.context.layout);
        self.store.state_mut().caches_cleared = true;
        if failures.is_empty() {
            report.progress("All caches cleared.");
        } else {
            report.progress(bulleted("Some caches could not be cleared:", &failures));
        }
    }

    /// The update already happened, so migration failures are reported
    /// without failing the step.
    fn migrate_database(&mut self, report: &mut StepReport) {
        self.store.state_mut().database_migrated = true;
        let Some(migrator) = self.context.migrator else {
            report.progress("Skipping database migration: no object model configured.");
            return;
        };
        match migrator.migrate() {
            Ok(summary) => {
                info!(applied = summary.applied.len(), remaining = summary.remaining, "database migrated");
                report.progress(describe_migration(&summary));
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "database migration failed");
                report.progress("Failed to migrate database.");
                report.progress(format!("Error: {err:#}"));
            }
        }
    }
}

impl StepMachine for UpdateEngine<'_> {
    fn step(&mut self, report: &mut StepReport) -> Result<()> {
        let state = self.store.state();
        let (Some(target), true, true) = (
            state.target.clone(),
            state.changeset.is_some(),
            state.incompatible_modules.is_some(),
        ) else {
            report.fail(STATE_MISSING);
            return Ok(());
        };

        let markers = self.context.layout.dev_checkout_markers();
        if !markers.is_empty() {
            report.fail(format!(
                "Refusing to update a development checkout ({} exists).",
                markers[0].display()
            ));
            return Ok(());
        }

        if state
            .incompatible_modules
            .as_ref()
            .is_some_and(|modules| !modules.is_empty())
        {
            self.remove_incompatible_module(report);
            Ok(())
        } else if state.downloads.is_none() {
            self.plan_downloads(report)
        } else if state.downloads.as_ref().is_some_and(|pending| !pending.is_empty()) {
            self.download_batch(&target, report)
        } else if !state.update_script_written {
            self.write_mutation_plan(report)
        } else if !state.update_script_done {
            self.run_mutation_plan(&target, report)
        } else if !state.aftermath_done {
            self.aftermath(&target, report);
            Ok(())
        } else if !state.caches_cleared {
            self.clear_caches(report);
            Ok(())
        } else if !state.database_migrated {
            self.migrate_database(report);
            Ok(())
        } else {
            report.finish("...completed.");
            Ok(())
        }
    }
}
