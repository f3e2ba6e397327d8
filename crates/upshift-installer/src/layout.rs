use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use upshift_core::{AdminDirRemap, VersionDeclaration};

const STATE_DIR: &str = "cache/upshift";
const BACKUP_DIR_NAME: &str = "UpshiftBackup";
const ROOT_BACKUP_DIR: &str = "upshift-backup";
const DEV_CHECKOUT_MARKERS: &[&str] = &["admin-dev", "install-dev"];

/// A source file carrying a version declaration, relative to the root.
#[derive(Debug, Clone)]
pub struct VersionFile {
    path: String,
    declaration: VersionDeclaration,
}

impl VersionFile {
    pub fn new(path: impl Into<String>, declaration: VersionDeclaration) -> Self {
        Self {
            path: path.into(),
            declaration,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn declaration(&self) -> &VersionDeclaration {
        &self.declaration
    }

    /// Version declared in the file at `location`.
    pub fn read_version(&self, location: &Path) -> Result<Option<String>> {
        let text = fs::read_to_string(location)
            .with_context(|| format!("failed to read {}", location.display()))?;
        Ok(self.declaration.parse(&text))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheKind {
    Template,
    Xml,
    Media,
    Page,
    Bytecode,
}

impl CacheKind {
    pub const ALL: [CacheKind; 5] = [
        Self::Template,
        Self::Xml,
        Self::Media,
        Self::Page,
        Self::Bytecode,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Template => "template",
            Self::Xml => "xml",
            Self::Media => "media",
            Self::Page => "page",
            Self::Bytecode => "bytecode",
        }
    }
}

/// Where things live inside one installation.
#[derive(Debug, Clone)]
pub struct InstallationLayout {
    root: PathBuf,
    admin_dir: Option<String>,
    settings: VersionFile,
    bootstrap: VersionFile,
    caches: BTreeMap<CacheKind, Vec<String>>,
    index_file: Option<String>,
}

impl InstallationLayout {
    pub fn new(root: impl Into<PathBuf>, settings: VersionFile, bootstrap: VersionFile) -> Self {
        Self {
            root: root.into(),
            admin_dir: None,
            settings,
            bootstrap,
            caches: BTreeMap::new(),
            index_file: None,
        }
    }

    pub fn with_admin_dir(mut self, admin_dir: Option<&str>) -> Self {
        self.admin_dir = admin_dir
            .map(|dir| dir.trim_matches('/'))
            .filter(|dir| !dir.is_empty())
            .map(str::to_string);
        self
    }

    pub fn with_cache_dirs(mut self, kind: CacheKind, dirs: Vec<String>) -> Self {
        self.caches.insert(kind, dirs);
        self
    }

    pub fn with_index_file(mut self, index_file: Option<String>) -> Self {
        self.index_file = index_file;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn admin_dir(&self) -> Option<&str> {
        self.admin_dir.as_deref()
    }

    pub fn remap(&self) -> AdminDirRemap {
        AdminDirRemap::new(self.admin_dir.as_deref())
    }

    /// Absolute location of a manifest path.
    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_dir().join("state.json")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.state_dir().join("downloads")
    }

    pub fn staged_path(&self, relative: &str) -> PathBuf {
        self.downloads_dir().join(relative)
    }

    pub fn plan_path(&self) -> PathBuf {
        self.state_dir().join("swap.plan")
    }

    pub fn channel_stamp_path(&self) -> PathBuf {
        self.state_dir().join("install-channel")
    }

    /// Backup directory for one update, `suffix` being its timestamp.
    pub fn backup_dir(&self, suffix: &str) -> PathBuf {
        match &self.admin_dir {
            Some(admin_dir) => self
                .root
                .join(admin_dir)
                .join(format!("{BACKUP_DIR_NAME}{suffix}")),
            None => self.root.join(format!("{ROOT_BACKUP_DIR}{suffix}")),
        }
    }

    pub fn settings(&self) -> &VersionFile {
        &self.settings
    }

    pub fn settings_path(&self) -> PathBuf {
        self.path(self.settings.path())
    }

    pub fn settings_backup_path(&self) -> PathBuf {
        self.path(&format!("{}.old", self.settings.path()))
    }

    pub fn bootstrap(&self) -> &VersionFile {
        &self.bootstrap
    }

    /// The bootstrap file as staged by the download step.
    pub fn staged_bootstrap_path(&self) -> PathBuf {
        self.staged_path(self.bootstrap.path())
    }

    pub fn cache_dirs(&self, kind: CacheKind) -> Vec<PathBuf> {
        self.caches
            .get(&kind)
            .map(|dirs| dirs.iter().map(|dir| self.path(dir)).collect())
            .unwrap_or_default()
    }

    pub fn index_file_path(&self) -> Option<PathBuf> {
        self.index_file.as_deref().map(|file| self.path(file))
    }

    /// Marker directories of a development checkout that exist under the root.
    pub fn dev_checkout_markers(&self) -> Vec<PathBuf> {
        DEV_CHECKOUT_MARKERS
            .iter()
            .map(|marker| self.root.join(marker))
            .filter(|path| path.exists())
            .collect()
    }

    pub fn ensure_state_dir(&self) -> Result<()> {
        let dir = self.state_dir();
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))
    }
}

pub(crate) fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
    }
}

pub(crate) fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
    }
}
