//! Second phase of an update: a flat list of filesystem operations that runs
//! in its own process after the staged files are complete.
//!
//! The plan is plain text, one operation per line, so it can be inspected
//! before it runs. Every operation is attempted even when an earlier one
//! failed; the executor reports failures instead of stopping.

use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const PLAN_HEADER: &str = "upshift-swap-plan 1";

/// Response printed once the plan ran. The caller keeps polling for the
/// remaining steps, so `done` stays false.
pub const FINAL_RESPONSE: &str = r#"{"informations":[],"error":false,"done":false}"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOp {
    MakeDir(PathBuf),
    Rename { from: PathBuf, to: PathBuf },
    Unlink(PathBuf),
    RemoveDirIfEmpty(PathBuf),
    PurgeDir(PathBuf),
}

impl MutationOp {
    fn keyword(&self) -> &'static str {
        match self {
            Self::MakeDir(_) => "mkdir",
            Self::Rename { .. } => "rename",
            Self::Unlink(_) => "unlink",
            Self::RemoveDirIfEmpty(_) => "rmdir",
            Self::PurgeDir(_) => "purge",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationPlan {
    ops: Vec<MutationOp>,
}

impl MutationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: MutationOp) {
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[MutationOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn encode(&self) -> String {
        let mut out = String::from(PLAN_HEADER);
        out.push('\n');
        for op in &self.ops {
            out.push_str(op.keyword());
            match op {
                MutationOp::Rename { from, to } => {
                    out.push('\t');
                    out.push_str(&escape_field(from));
                    out.push('\t');
                    out.push_str(&escape_field(to));
                }
                MutationOp::MakeDir(path)
                | MutationOp::Unlink(path)
                | MutationOp::RemoveDirIfEmpty(path)
                | MutationOp::PurgeDir(path) => {
                    out.push('\t');
                    out.push_str(&escape_field(path));
                }
            }
            out.push('\n');
        }
        out
    }

    pub fn decode(input: &str) -> Result<Self, PlanError> {
        let mut lines = input.lines();
        match lines.next() {
            Some(header) if header.trim_end() == PLAN_HEADER => {}
            _ => return Err(PlanError::new("missing mutation plan header")),
        }

        let mut plan = Self::new();
        for (index, line) in lines.enumerate() {
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            let line_no = index + 2;
            let op = match (fields[0], fields.len()) {
                ("mkdir", 2) => MutationOp::MakeDir(unescape_field(fields[1], line_no)?),
                ("unlink", 2) => MutationOp::Unlink(unescape_field(fields[1], line_no)?),
                ("rmdir", 2) => MutationOp::RemoveDirIfEmpty(unescape_field(fields[1], line_no)?),
                ("purge", 2) => MutationOp::PurgeDir(unescape_field(fields[1], line_no)?),
                ("rename", 3) => MutationOp::Rename {
                    from: unescape_field(fields[1], line_no)?,
                    to: unescape_field(fields[2], line_no)?,
                },
                (keyword, _) => {
                    return Err(PlanError::new(format!(
                        "invalid mutation plan line {line_no}: '{keyword}'"
                    )))
                }
            };
            plan.push(op);
        }
        Ok(plan)
    }

    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.encode())
    }

    pub fn read_from(path: &Path) -> Result<Self, PlanError> {
        let raw = fs::read_to_string(path).map_err(|err| {
            PlanError::new(format!(
                "failed reading mutation plan {}: {err}",
                path.display()
            ))
        })?;
        Self::decode(&raw)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwapOutcome {
    pub applied: usize,
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanError {
    message: String,
}

impl PlanError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for PlanError {}

pub fn execute(plan: &MutationPlan) -> SwapOutcome {
    let mut outcome = SwapOutcome::default();
    for op in plan.ops() {
        match apply_op(op) {
            Ok(()) => outcome.applied += 1,
            Err(err) => outcome.failures.push(err),
        }
    }
    outcome
}

/// Reads, runs and then deletes the plan. The plan file is removed even
/// when the plan itself does not list it.
pub fn execute_plan_file(path: &Path) -> Result<SwapOutcome, PlanError> {
    let plan = MutationPlan::read_from(path)?;
    let outcome = execute(&plan);
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(PlanError::new(format!(
                "failed removing mutation plan {}: {err}",
                path.display()
            )))
        }
    }
    Ok(outcome)
}

fn apply_op(op: &MutationOp) -> Result<(), String> {
    match op {
        MutationOp::MakeDir(path) => fs::create_dir_all(path)
            .map_err(|err| format!("failed creating directory {}: {err}", path.display())),
        MutationOp::Rename { from, to } => fs::rename(from, to).map_err(|err| {
            format!(
                "failed moving {} to {}: {err}",
                from.display(),
                to.display()
            )
        }),
        MutationOp::Unlink(path) => match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(format!("failed removing {}: {err}", path.display())),
        },
        MutationOp::RemoveDirIfEmpty(path) => {
            // non-empty or missing directories are left alone
            let _ = fs::remove_dir(path);
            Ok(())
        }
        MutationOp::PurgeDir(path) => purge_dir(path),
    }
}

fn purge_dir(path: &Path) -> Result<(), String> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(format!("failed reading {}: {err}", path.display())),
    };

    let mut failures = Vec::new();
    for entry in entries.flatten() {
        let entry_path = entry.path();
        let removed = match entry.file_type() {
            Ok(kind) if kind.is_dir() => fs::remove_dir_all(&entry_path),
            _ => fs::remove_file(&entry_path),
        };
        if let Err(err) = removed {
            failures.push(format!("{}: {err}", entry_path.display()));
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(format!("failed purging {}", failures.join(", ")))
    }
}

fn escape_field(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_field(field: &str, line_no: usize) -> Result<PathBuf, PlanError> {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            _ => {
                return Err(PlanError::new(format!(
                    "invalid escape sequence on mutation plan line {line_no}"
                )))
            }
        }
    }
    if out.is_empty() {
        return Err(PlanError::new(format!(
            "empty path on mutation plan line {line_no}"
        )));
    }
    Ok(PathBuf::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn encode_escapes_tabs_and_backslashes_in_paths() {
        let mut plan = MutationPlan::new();
        plan.push(MutationOp::Rename {
            from: PathBuf::from("stage/odd\tname"),
            to: PathBuf::from("root\\odd\tname"),
        });

        let encoded = plan.encode();
        assert_eq!(
            encoded,
            "upshift-swap-plan 1\nrename\tstage/odd\\tname\troot\\\\odd\\tname\n"
        );
        assert_eq!(
            MutationPlan::decode(&encoded).expect("must decode plan"),
            plan
        );
    }

    #[test]
    fn decode_rejects_missing_header() {
        let err = MutationPlan::decode("unlink\ta.txt\n").expect_err("must reject plan");
        assert!(err.to_string().contains("header"));
    }

    #[test]
    fn decode_rejects_unknown_operation() {
        let err = MutationPlan::decode("upshift-swap-plan 1\nchmod\ta.txt\n")
            .expect_err("must reject plan");
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn execute_plan_file_moves_files_and_deletes_plan() {
        let root = test_root();
        let staged = root.join("stage/lib/new.txt");
        fs::create_dir_all(staged.parent().expect("must have parent")).expect("must create stage");
        fs::write(&staged, "new").expect("must write staged file");
        fs::create_dir_all(root.join("tree/old/deep")).expect("must create old tree");
        fs::write(root.join("tree/old/deep/gone.txt"), "gone").expect("must write old file");

        let mut plan = MutationPlan::new();
        plan.push(MutationOp::MakeDir(root.join("tree/lib")));
        plan.push(MutationOp::Rename {
            from: staged.clone(),
            to: root.join("tree/lib/new.txt"),
        });
        plan.push(MutationOp::Unlink(root.join("tree/old/deep/gone.txt")));
        plan.push(MutationOp::RemoveDirIfEmpty(root.join("tree/old/deep")));
        plan.push(MutationOp::RemoveDirIfEmpty(root.join("tree/old")));
        plan.push(MutationOp::Unlink(root.join("tree/never-existed.txt")));
        let plan_path = root.join("swap.plan");
        plan.write_to(&plan_path).expect("must write plan");

        let outcome = execute_plan_file(&plan_path).expect("must execute plan");

        assert!(outcome.failures.is_empty(), "{:?}", outcome.failures);
        assert_eq!(outcome.applied, 6);
        assert_eq!(
            fs::read_to_string(root.join("tree/lib/new.txt")).expect("must read moved file"),
            "new"
        );
        assert!(!root.join("tree/old").exists());
        assert!(!plan_path.exists());

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn execute_continues_after_failed_operation() {
        let root = test_root();
        fs::create_dir_all(root.join("cache/bytecode/nested")).expect("must create cache");
        fs::write(root.join("cache/bytecode/a.bin"), "x").expect("must write cache file");

        let mut plan = MutationPlan::new();
        plan.push(MutationOp::Rename {
            from: root.join("missing.txt"),
            to: root.join("target.txt"),
        });
        plan.push(MutationOp::PurgeDir(root.join("cache/bytecode")));

        let outcome = execute(&plan);

        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.failures.len(), 1);
        assert!(root.join("cache/bytecode").is_dir());
        assert_eq!(
            fs::read_dir(root.join("cache/bytecode"))
                .expect("must read purged dir")
                .count(),
            0
        );

        let _ = fs::remove_dir_all(&root);
    }

    fn test_root() -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_nanos())
            .unwrap_or(0);
        let sequence = COUNTER.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!(
            "upshift-swap-test-{}-{nanos}-{sequence}",
            std::process::id()
        ));
        fs::create_dir_all(&root).expect("must create test root");
        root
    }
}
