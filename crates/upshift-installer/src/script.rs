use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info};
use upshift_core::Changeset;
use upshift_swap::{execute_plan_file, MutationOp, MutationPlan, SwapOutcome};

use crate::layout::{CacheKind, InstallationLayout};

/// How many now possibly empty parent directories a removal cleans up.
const MAX_PARENT_LEVELS: usize = 5;

/// Operations swapping the staged files into the installation. Manual
/// edits are moved into `backup_dir` before anything else is touched.
pub fn build_mutation_plan(
    layout: &InstallationLayout,
    changeset: &Changeset,
    backup_dir: &Path,
) -> MutationPlan {
    let mut plan = MutationPlan::new();

    for path in changeset.manual_edits() {
        let backup = backup_dir.join(path);
        push_parent_dir(&mut plan, &backup);
        plan.push(MutationOp::Rename {
            from: layout.path(path),
            to: backup,
        });
    }

    for path in changeset.staged_paths() {
        let live = layout.path(path);
        push_parent_dir(&mut plan, &live);
        plan.push(MutationOp::Rename {
            from: layout.staged_path(path),
            to: live,
        });
    }

    for path in changeset.removals() {
        plan.push(MutationOp::Unlink(layout.path(path)));
        let mut parent = Path::new(path).parent();
        for _ in 0..MAX_PARENT_LEVELS {
            let Some(dir) = parent.filter(|dir| !dir.as_os_str().is_empty()) else {
                break;
            };
            plan.push(MutationOp::RemoveDirIfEmpty(layout.root().join(dir)));
            parent = dir.parent();
        }
    }

    for dir in layout.cache_dirs(CacheKind::Bytecode) {
        plan.push(MutationOp::PurgeDir(dir));
    }
    if let Some(index_file) = layout.index_file_path() {
        plan.push(MutationOp::Unlink(index_file));
    }
    plan.push(MutationOp::Unlink(layout.plan_path()));
    plan
}

fn push_parent_dir(plan: &mut MutationPlan, path: &Path) {
    if let Some(parent) = path.parent() {
        plan.push(MutationOp::MakeDir(parent.to_path_buf()));
    }
}

/// Executes a written plan file; the plan file is gone afterwards.
pub trait ScriptRunner {
    fn run(&self, plan_path: &Path) -> Result<SwapOutcome>;
}

/// Runs the plan in a separate `upshift-swap` process, so nothing of this
/// process has to survive the swap.
#[derive(Debug, Clone)]
pub struct ProcessScriptRunner {
    executable: PathBuf,
}

impl ProcessScriptRunner {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

impl ScriptRunner for ProcessScriptRunner {
    fn run(&self, plan_path: &Path) -> Result<SwapOutcome> {
        info!(executable = %self.executable.display(), plan = %plan_path.display(), "running mutation plan");
        let output = Command::new(&self.executable)
            .arg(plan_path)
            .output()
            .with_context(|| format!("failed to launch {}", self.executable.display()))?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(anyhow!(
                "{} failed: {}",
                self.executable.display(),
                stderr.trim()
            ));
        }
        debug!(stdout = %String::from_utf8_lossy(&output.stdout).trim(), "mutation plan finished");
        Ok(SwapOutcome {
            applied: 0,
            failures: stderr
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }
}

/// Runs the plan inside this process.
#[derive(Debug, Clone, Copy, Default)]
pub struct InProcessScriptRunner;

impl ScriptRunner for InProcessScriptRunner {
    fn run(&self, plan_path: &Path) -> Result<SwapOutcome> {
        execute_plan_file(plan_path).map_err(|err| anyhow!("{err}"))
    }
}
