use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;
use tracing::debug;
use upshift_core::Changeset;

pub const DEFAULT_STEP_BUDGET: Duration = Duration::from_millis(3000);

/// Changeset as shown to the caller. Incompatible modules are listed like
/// paths so they can be rendered the same way.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangesetView {
    pub change: BTreeMap<String, bool>,
    pub add: BTreeMap<String, bool>,
    pub remove: BTreeMap<String, bool>,
    pub obsolete: BTreeMap<String, bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incompatible: Option<BTreeMap<String, bool>>,
}

impl ChangesetView {
    pub fn new(changeset: &Changeset, incompatible_modules: Option<&[String]>) -> Self {
        Self {
            change: changeset.change.clone(),
            add: changeset.add.clone(),
            remove: changeset.remove.clone(),
            obsolete: changeset.obsolete.clone(),
            incompatible: incompatible_modules.map(|modules| {
                modules
                    .iter()
                    .map(|module| (module.clone(), false))
                    .collect()
            }),
        }
    }
}

/// Response of one invocation. `error` implies `done`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub informations: Vec<String>,
    pub error: bool,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changeset: Option<ChangesetView>,
    /// Set by the step that wrote the mutation plan.
    #[serde(rename = "updateScript", skip_serializing_if = "is_false")]
    pub update_script: bool,
}

impl StepReport {
    pub fn progress(&mut self, message: impl Into<String>) {
        self.informations.push(message.into());
        self.done = false;
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.informations.push(message.into());
        self.error = true;
        self.done = true;
    }

    pub fn finish(&mut self, message: impl Into<String>) {
        self.informations.push(message.into());
        self.done = true;
    }

    fn append_timing(&mut self, elapsed: Duration) {
        let suffix = format!(" ({:.1} s)", elapsed.as_secs_f64());
        match self.informations.last_mut() {
            Some(last) => last.push_str(&suffix),
            None => self.informations.push(suffix.trim_start().to_string()),
        }
    }

    fn absorb(&mut self, step: StepReport) {
        self.informations.extend(step.informations);
        self.error |= step.error;
        self.done = step.done;
        if step.changeset.is_some() {
            self.changeset = step.changeset;
        }
        self.update_script |= step.update_script;
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// A resumable state machine advancing by one bounded unit of work per call.
pub trait StepMachine {
    fn step(&mut self, report: &mut StepReport) -> Result<()>;
}

/// Runs steps until one is done or failed, one wrote the mutation plan, or
/// `budget` is used up. An `Err` from a step becomes an error report.
pub fn run_steps(machine: &mut dyn StepMachine, budget: Duration) -> StepReport {
    let started = Instant::now();
    let mut report = StepReport::default();
    loop {
        let step_started = Instant::now();
        let mut step = StepReport::default();
        if let Err(err) = machine.step(&mut step) {
            step.fail(format!("{err:#}"));
        }
        if step.error {
            step.done = true;
        }
        step.append_timing(step_started.elapsed());
        debug!(done = step.done, error = step.error, "step finished");

        let stop = step.done || step.update_script || started.elapsed() >= budget;
        report.absorb(step);
        if stop {
            return report;
        }
    }
}
