use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use upshift_core::{find_channel, Channel, VersionDeclaration};
use upshift_installer::{CacheKind, InstallationLayout, VersionFile, DEFAULT_STEP_BUDGET};
use upshift_schema::{DatabaseServer, ObjectModel, Schema};

pub const DEFAULT_CONFIG_FILE: &str = "upshift.toml";
const SWAP_EXECUTABLE: &str = "upshift-swap";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdaterConfig {
    pub root: PathBuf,
    #[serde(default)]
    pub admin_dir: Option<String>,
    #[serde(default)]
    pub ignore_theme: bool,
    #[serde(default)]
    pub memory_limit_bytes: Option<u64>,
    #[serde(default)]
    pub step_budget_ms: Option<u64>,
    #[serde(default)]
    pub swap_executable: Option<PathBuf>,
    #[serde(default)]
    pub object_model: Option<String>,
    #[serde(default)]
    pub table_prefix: String,
    pub default_channel: String,
    #[serde(default = "default_mysql_binary")]
    pub mysql_binary: String,
    pub version: VersionSettings,
    #[serde(default)]
    pub caches: CacheSettings,
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub databases: Vec<DatabaseServer>,
    /// Modules known to break, keyed by target version.
    #[serde(default)]
    pub incompatible_modules: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VersionSettings {
    pub settings_file: String,
    pub declaration: String,
    pub bootstrap_file: String,
    pub bootstrap_declaration: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    #[serde(default)]
    pub template: Vec<String>,
    #[serde(default)]
    pub xml: Vec<String>,
    #[serde(default)]
    pub media: Vec<String>,
    #[serde(default)]
    pub page: Vec<String>,
    #[serde(default)]
    pub bytecode: Vec<String>,
    #[serde(default)]
    pub index_file: Option<String>,
}

fn default_mysql_binary() -> String {
    "mysql".to_string()
}

impl UpdaterConfig {
    /// Reads the configuration at `path`. A relative `root` is taken relative
    /// to the directory holding the file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed reading configuration {}", path.display()))?;
        let mut config = Self::parse(&raw)
            .with_context(|| format!("invalid configuration {}", path.display()))?;
        if config.root.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            config.root = base.join(&config.root);
        }
        Ok(config)
    }

    pub fn parse(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).context("failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(anyhow!("at least one [[channels]] entry is required"));
        }
        find_channel(&self.channels, &self.default_channel)
            .with_context(|| "default_channel must name a configured channel")?;
        Ok(())
    }

    pub fn layout(&self) -> Result<InstallationLayout> {
        let settings = VersionFile::new(
            &self.version.settings_file,
            VersionDeclaration::new(&self.version.declaration)?,
        );
        let bootstrap = VersionFile::new(
            &self.version.bootstrap_file,
            VersionDeclaration::new(&self.version.bootstrap_declaration)?,
        );
        let caches = &self.caches;
        Ok(InstallationLayout::new(&self.root, settings, bootstrap)
            .with_admin_dir(self.admin_dir.as_deref())
            .with_cache_dirs(CacheKind::Template, caches.template.clone())
            .with_cache_dirs(CacheKind::Xml, caches.xml.clone())
            .with_cache_dirs(CacheKind::Media, caches.media.clone())
            .with_cache_dirs(CacheKind::Page, caches.page.clone())
            .with_cache_dirs(CacheKind::Bytecode, caches.bytecode.clone())
            .with_index_file(caches.index_file.clone()))
    }

    pub fn step_budget(&self) -> Duration {
        self.step_budget_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_STEP_BUDGET)
    }

    /// The configured executor, or `upshift-swap` next to this executable.
    pub fn swap_executable(&self) -> Result<PathBuf> {
        if let Some(path) = &self.swap_executable {
            return Ok(path.clone());
        }
        let current = env::current_exe().context("failed to locate the running executable")?;
        let dir = current
            .parent()
            .ok_or_else(|| anyhow!("executable {} has no parent", current.display()))?;
        Ok(dir.join(format!("{SWAP_EXECUTABLE}{}", env::consts::EXE_SUFFIX)))
    }

    /// Expected schema with the table prefix applied, when an object model
    /// is configured.
    pub fn expected_schema(&self) -> Result<Option<Schema>> {
        let Some(model) = &self.object_model else {
            return Ok(None);
        };
        let model = ObjectModel::from_path(&self.root.join(model))?;
        Ok(Some(model.schema(&self.table_prefix)))
    }
}

/// `explicit`, or the default file in the working directory.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}
