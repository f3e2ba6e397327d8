use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::time::Duration;

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{ProgressBar, ProgressStyle};
use upshift_installer::{ChangesetView, OperationState, StepReport};
use upshift_schema::{DifferenceReport, Severity};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputStyle {
    Plain,
    Rich,
}

pub fn current_output_style(plain: bool) -> OutputStyle {
    if plain || !std::io::stdout().is_terminal() {
        OutputStyle::Plain
    } else {
        OutputStyle::Rich
    }
}

pub fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => {
            let badge = match status {
                "ok" => "[OK]",
                "step" => "[..]",
                "warn" => "[WARN]",
                "error" => "[ERR]",
                _ => "[..]",
            };
            format!("{badge} {message}")
        }
    }
}

/// Spinner shown while steps keep running; absent in plain output.
pub struct StepProgress {
    progress_bar: Option<ProgressBar>,
}

impl StepProgress {
    pub fn start(style: OutputStyle, label: &str) -> Self {
        let progress_bar = if style == OutputStyle::Rich {
            let progress_bar = ProgressBar::new_spinner();
            if let Ok(template) = ProgressStyle::with_template("{spinner:.cyan.bold} {msg}") {
                progress_bar.set_style(template.tick_chars(progress_tick_chars(label)));
            }
            progress_bar.set_message(label.to_string());
            progress_bar.enable_steady_tick(Duration::from_millis(80));
            Some(progress_bar)
        } else {
            None
        };
        Self { progress_bar }
    }

    pub fn println(&self, line: &str) {
        match &self.progress_bar {
            Some(progress_bar) => progress_bar.println(line),
            None => println!("{line}"),
        }
    }

    pub fn set_message(&self, message: &str) {
        if let Some(progress_bar) = &self.progress_bar {
            progress_bar.set_message(message.to_string());
        }
    }

    pub fn finish(mut self) {
        if let Some(progress_bar) = self.progress_bar.take() {
            progress_bar.finish_and_clear();
        }
    }
}

fn progress_tick_chars(label: &str) -> &'static str {
    match label {
        "compare" => ".oO@* ",
        "update" => "<^>v ",
        _ => "|/-\\ ",
    }
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn emphasis_style() -> Style {
    Style::new().effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

pub fn render_section_header(style: OutputStyle, title: &str) -> Option<String> {
    match style {
        OutputStyle::Plain => None,
        OutputStyle::Rich => Some(colorize(section_style(), &format!("== {title} =="))),
    }
}

/// Lines of one step report. The last message carries the outcome badge.
pub fn format_step_report_lines(report: &StepReport, style: OutputStyle) -> Vec<String> {
    let last = report.informations.len().saturating_sub(1);
    let mut lines = Vec::new();
    for (index, message) in report.informations.iter().enumerate() {
        let status = if index < last {
            "step"
        } else if report.error {
            "error"
        } else if report.done {
            "ok"
        } else {
            "step"
        };
        let mut message_lines = message.lines();
        if let Some(first) = message_lines.next() {
            lines.push(render_status_line(style, status, first));
        }
        lines.extend(message_lines.map(|line| format!("  {}", line.trim_start())));
    }
    if let Some(changeset) = &report.changeset {
        lines.extend(format_changeset_lines(changeset, style));
    }
    lines
}

pub fn format_changeset_lines(view: &ChangesetView, style: OutputStyle) -> Vec<String> {
    let mut lines = Vec::new();
    push_bucket(&mut lines, style, "change", &view.change, "manual edit discarded");
    push_bucket(&mut lines, style, "add", &view.add, "");
    push_bucket(&mut lines, style, "remove", &view.remove, "manual edit discarded");
    push_bucket(&mut lines, style, "obsolete", &view.obsolete, "");
    if let Some(incompatible) = &view.incompatible {
        push_bucket(&mut lines, style, "incompatible modules", incompatible, "");
    }
    lines
}

fn push_bucket(
    lines: &mut Vec<String>,
    style: OutputStyle,
    name: &str,
    entries: &BTreeMap<String, bool>,
    flag_note: &str,
) {
    if entries.is_empty() {
        return;
    }
    let header = format!("{name} ({})", entries.len());
    lines.push(render_section_header(style, &header).unwrap_or(header));
    for (path, flagged) in entries {
        if *flagged && !flag_note.is_empty() {
            lines.push(format!("  {path} [{flag_note}]"));
        } else {
            lines.push(format!("  {path}"));
        }
    }
}

pub fn format_difference_lines(report: &DifferenceReport, style: OutputStyle) -> Vec<String> {
    if let Some(error) = &report.error {
        return vec![render_status_line(style, "error", error)];
    }
    if report.differences.is_empty() {
        return vec![render_status_line(style, "ok", "No database difference found.")];
    }
    report
        .differences
        .iter()
        .map(|difference| {
            let status = if difference.severity >= Severity::Critical.level() {
                "error"
            } else {
                "warn"
            };
            let destructive = if difference.destructive {
                " (destructive)"
            } else {
                ""
            };
            render_status_line(
                style,
                status,
                &format!(
                    "{}: {}{destructive}",
                    difference.id,
                    render_emphasis(style, &difference.description)
                ),
            )
        })
        .collect()
}

/// Replaces `[n]...[/n]` markers with bold text, or drops them in plain
/// output.
pub fn render_emphasis(style: OutputStyle, text: &str) -> String {
    match style {
        OutputStyle::Plain => text.replace("[n]", "").replace("[/n]", ""),
        OutputStyle::Rich => {
            let emphasis = emphasis_style();
            text.replace("[n]", &emphasis.render().to_string())
                .replace("[/n]", &emphasis.render_reset().to_string())
        }
    }
}

pub fn format_status_lines(state: &OperationState) -> Vec<String> {
    let mut lines = Vec::new();
    match (&state.origin, &state.target) {
        (Some(origin), Some(target)) => {
            lines.push(format!("comparing: {origin} -> {target}"));
        }
        _ => {
            lines.push("comparing: nothing selected".to_string());
            return lines;
        }
    }

    let compare = if state.incompatible_modules.is_some() {
        "done"
    } else if state.changeset.is_some() {
        "checking modules"
    } else if state.top_level.is_some() {
        "scanning installation"
    } else {
        "pending"
    };
    lines.push(format!("compare: {compare}"));

    if let Some(changeset) = &state.changeset {
        lines.push(format!(
            "changeset: {} changed, {} added, {} removed, {} obsolete ({} selected)",
            changeset.change.len(),
            changeset.add.len(),
            changeset.remove.len(),
            changeset.obsolete.len(),
            changeset.selected_obsolete.len()
        ));
    }

    let update = if state.database_migrated {
        "done"
    } else if state.update_script_done {
        "finishing"
    } else if state.update_script_written {
        "swap pending"
    } else if let Some(pending) = &state.downloads {
        if pending.is_empty() {
            "downloaded"
        } else {
            "downloading"
        }
    } else {
        "not started"
    };
    lines.push(format!("update: {update}"));
    if let Some(backup_dir) = &state.backup_dir {
        lines.push(format!("backup: {backup_dir}"));
    }
    lines
}
