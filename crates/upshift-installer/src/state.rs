use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use upshift_core::{Changeset, InstallationRecord, Manifest, ReleaseRef};
use upshift_security::{sha256_hex, verify_sha256};

/// State older than this is discarded when opened.
pub const STATE_TTL_SECS: u64 = 24 * 60 * 60;

const CHECKSUM_PREFIX: &str = "sha256:";

/// Everything a compare or update needs to carry from one invocation to the
/// next. Progress markers only ever go from unset to set until a reset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationState {
    pub origin: Option<ReleaseRef>,
    pub target: Option<ReleaseRef>,
    pub ignore_theme: Option<bool>,
    #[serde(default)]
    pub manifests: BTreeMap<String, Manifest>,
    pub top_level: Option<Vec<String>>,
    #[serde(default)]
    pub requirements_checked: bool,
    pub installation: Option<InstallationRecord>,
    #[serde(default)]
    pub distribution_fileset_added: bool,
    pub changeset: Option<Changeset>,
    pub incompatible_modules: Option<Vec<String>>,
    pub downloads: Option<BTreeSet<String>>,
    pub backup_dir: Option<String>,
    #[serde(default)]
    pub update_script_written: bool,
    #[serde(default)]
    pub update_script_done: bool,
    #[serde(default)]
    pub aftermath_done: bool,
    #[serde(default)]
    pub caches_cleared: bool,
    #[serde(default)]
    pub database_migrated: bool,
    #[serde(default)]
    pub saved_at_unix: u64,
}

impl OperationState {
    pub fn manifest(&self, release: &ReleaseRef) -> Option<&Manifest> {
        self.manifests.get(&release.key())
    }

    pub fn is_stale(&self, now_unix: u64) -> bool {
        self.saved_at_unix != 0 && now_unix.saturating_sub(self.saved_at_unix) > STATE_TTL_SECS
    }

    fn reset_compare_progress(&mut self) {
        self.top_level = None;
        self.requirements_checked = false;
        self.installation = None;
        self.distribution_fileset_added = false;
        self.changeset = None;
        self.incompatible_modules = None;
    }

    fn reset_update_progress(&mut self) {
        self.downloads = None;
        self.backup_dir = None;
        self.update_script_written = false;
        self.update_script_done = false;
        self.aftermath_done = false;
        self.caches_cleared = false;
        self.database_migrated = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetScope {
    /// Drops fetched manifests and all progress.
    NewSession,
    /// Keeps fetched manifests, drops all progress.
    NewCompare,
    All,
}

/// Storage for the serialized state record.
pub trait StateBackend {
    fn read(&self) -> Result<Option<String>>;

    fn write(&self, contents: &str) -> Result<()>;

    fn clear(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileStateBackend {
    path: PathBuf,
}

impl FileStateBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StateBackend for FileStateBackend {
    fn read(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err)
                .with_context(|| format!("failed to read operation state {}", self.path.display())),
        }
    }

    fn write(&self, contents: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp)
            .with_context(|| format!("failed to create {}", tmp.display()))?;
        file.write_all(contents.as_bytes())
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        file.flush()
            .with_context(|| format!("failed to flush {}", tmp.display()))?;
        fs::rename(&tmp, &self.path).with_context(|| {
            format!(
                "failed to move {} into place at {}",
                tmp.display(),
                self.path.display()
            )
        })
    }

    fn clear(&self) -> Result<()> {
        crate::layout::remove_file_if_exists(&self.path)
    }
}

/// Keeps the record in memory. Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateBackend {
    contents: Rc<RefCell<Option<String>>>,
}

impl MemoryStateBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Option<String> {
        self.contents.borrow().clone()
    }

    pub fn replace(&self, contents: Option<String>) {
        *self.contents.borrow_mut() = contents;
    }
}

impl StateBackend for MemoryStateBackend {
    fn read(&self) -> Result<Option<String>> {
        Ok(self.contents())
    }

    fn write(&self, contents: &str) -> Result<()> {
        self.replace(Some(contents.to_string()));
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.replace(None);
        Ok(())
    }
}

/// A checksum line followed by the JSON record.
pub fn encode_state(state: &OperationState) -> Result<String> {
    let body = serde_json::to_string(state).context("failed to serialize operation state")?;
    Ok(format!("{CHECKSUM_PREFIX}{}\n{body}", sha256_hex(body.as_bytes())))
}

pub fn decode_state(raw: &str) -> Result<OperationState> {
    let (header, body) = raw
        .split_once('\n')
        .ok_or_else(|| anyhow!("operation state lacks its checksum line"))?;
    let checksum = header
        .strip_prefix(CHECKSUM_PREFIX)
        .ok_or_else(|| anyhow!("operation state has an unknown header '{header}'"))?;
    if !verify_sha256(body.as_bytes(), checksum) {
        return Err(anyhow!(
            "operation state is corrupted (checksum mismatch); reset the operation to start over"
        ));
    }
    serde_json::from_str(body).context("failed to parse operation state")
}

/// The persisted operation state, loaded in full when opened and written
/// back in full by `save`.
pub struct ManifestStore {
    backend: Box<dyn StateBackend>,
    state: OperationState,
}

impl ManifestStore {
    pub fn open(backend: Box<dyn StateBackend>, now_unix: u64) -> Result<Self> {
        let state = match backend.read()? {
            None => OperationState::default(),
            Some(raw) => {
                let state = decode_state(&raw)?;
                if state.is_stale(now_unix) {
                    info!(saved_at = state.saved_at_unix, "discarding stale operation state");
                    OperationState::default()
                } else {
                    state
                }
            }
        };
        Ok(Self { backend, state })
    }

    pub fn state(&self) -> &OperationState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut OperationState {
        &mut self.state
    }

    pub fn save(&mut self, now_unix: u64) -> Result<()> {
        self.state.saved_at_unix = now_unix;
        self.backend.write(&encode_state(&self.state)?)
    }

    pub fn reset(&mut self, scope: ResetScope) {
        debug!(?scope, "resetting operation state");
        match scope {
            ResetScope::NewSession => {
                self.state.manifests.clear();
                self.state.reset_compare_progress();
                self.state.reset_update_progress();
            }
            ResetScope::NewCompare => {
                self.state.reset_compare_progress();
                self.state.reset_update_progress();
            }
            ResetScope::All => self.state = OperationState::default(),
        }
    }

    /// Empties the state and removes the persisted record.
    pub fn clear(&mut self) -> Result<()> {
        self.state = OperationState::default();
        self.backend.clear()
    }

    /// Records the releases to compare. When anything differs from the
    /// stored selection, comparison progress starts over; returns whether
    /// that happened.
    pub fn set_compare_versions(
        &mut self,
        origin: ReleaseRef,
        target: ReleaseRef,
        ignore_theme: bool,
    ) -> bool {
        let mut changed = false;
        if self.state.origin.as_ref() != Some(&origin) {
            self.state.manifests.remove(&origin.key());
            changed = true;
        }
        if self.state.target.as_ref() != Some(&target) {
            self.state.manifests.remove(&target.key());
            changed = true;
        }
        if self.state.ignore_theme != Some(ignore_theme) {
            // manifests were filtered with the other theme mode
            self.state.manifests.clear();
            changed = true;
        }

        if changed {
            info!(%origin, %target, ignore_theme, "new comparison selected");
            self.reset(ResetScope::NewCompare);
            self.state.origin = Some(origin);
            self.state.target = Some(target);
            self.state.ignore_theme = Some(ignore_theme);
        }
        changed
    }

    /// Chooses which obsolete files the update removes; returns how many of
    /// `paths` are obsolete.
    pub fn select_obsolete<I, S>(&mut self, paths: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let changeset = self
            .state
            .changeset
            .as_mut()
            .ok_or_else(|| anyhow!("no comparison has been completed yet"))?;
        Ok(changeset.select_obsolete(paths))
    }
}
