use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};

mod caches;
mod compare;
mod context;
mod hooks;
mod layout;
mod migrate;
mod release;
mod scan;
mod script;
mod state;
mod step;
mod update;

pub use caches::clear_caches;
pub use compare::CompareEngine;
pub use context::EngineContext;
pub use hooks::HostHooks;
pub use layout::{CacheKind, InstallationLayout, VersionFile};
pub use migrate::{DatabaseSchemaMigrator, SchemaMigrator};
pub use release::{
    installed_release, installed_version_stamp, read_channel_stamp, write_channel_stamp,
    write_settings_version,
};
pub use scan::{scan_installation, scans_recursively, split_top_level, ROOT_DIR};
pub use script::{build_mutation_plan, InProcessScriptRunner, ProcessScriptRunner, ScriptRunner};
pub use state::{
    decode_state, encode_state, FileStateBackend, ManifestStore, MemoryStateBackend,
    OperationState, ResetScope, StateBackend, STATE_TTL_SECS,
};
pub use step::{run_steps, ChangesetView, StepMachine, StepReport, DEFAULT_STEP_BUDGET};
pub use update::{UpdateEngine, DOWNLOAD_BATCH};

pub fn current_unix_timestamp() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system time is before unix epoch")?
        .as_secs())
}
