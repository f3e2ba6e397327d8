use std::io;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::debug;
use upshift_core::{find_channel, ReleaseRef};
use upshift_installer::{
    current_unix_timestamp, installed_release, run_steps, CompareEngine, DatabaseSchemaMigrator,
    EngineContext, FileStateBackend, InstallationLayout, ManifestStore, ProcessScriptRunner,
    ResetScope, SchemaMigrator, StepReport, UpdateEngine,
};
use upshift_registry::{HttpManifestFetcher, ManifestFetcher};
use upshift_schema::{
    apply_fixes, difference_report, ConnectionFactory, DifferenceReport, MysqlCliFactory, Schema,
};
use upshift_security::ContentHasher;

use crate::completion::write_completions_script;
use crate::config::{resolve_config_path, UpdaterConfig};
use crate::hooks::ConfiguredHostHooks;
use crate::render::{
    current_output_style, format_difference_lines, format_status_lines, format_step_report_lines,
    render_status_line, OutputStyle, StepProgress,
};
use crate::{Cli, Commands, ResetArg};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn run_cli(cli: Cli) -> Result<()> {
    let style = current_output_style(cli.plain);
    match cli.command {
        Commands::Versions { channel } => {
            let runtime = Runtime::load(cli.config.as_deref())?;
            let name = channel.unwrap_or_else(|| runtime.config.default_channel.clone());
            let channel = find_channel(&runtime.config.channels, &name)?;
            let versions = runtime.fetcher.list_versions(channel)?;
            if versions.is_empty() {
                println!("No versions published on channel {name}");
            }
            for version in versions {
                println!("{version}");
            }
        }
        Commands::Status => {
            let runtime = Runtime::load(cli.config.as_deref())?;
            match installed_release(
                &runtime.layout,
                &runtime.config.channels,
                &runtime.config.default_channel,
            ) {
                Ok(release) => println!("installed: {release}"),
                Err(err) => println!("installed: unknown ({err:#})"),
            }
            let store = runtime.open_store()?;
            for line in format_status_lines(store.state()) {
                println!("{line}");
            }
        }
        Commands::Compare {
            version,
            channel,
            ignore_theme,
            json,
            until_done,
        } => {
            let runtime = Runtime::load(cli.config.as_deref())?;
            let origin = installed_release(
                &runtime.layout,
                &runtime.config.channels,
                &runtime.config.default_channel,
            )?;
            let channel = channel.unwrap_or_else(|| runtime.config.default_channel.clone());
            find_channel(&runtime.config.channels, &channel)?;
            let target = ReleaseRef::new(channel, version);

            let mut store = runtime.open_store()?;
            let ignore_theme = ignore_theme || runtime.config.ignore_theme;
            if store.set_compare_versions(origin, target, ignore_theme) {
                debug!("starting a new comparison");
            }
            let options = StepOptions::new(style, json, until_done);
            let budget = runtime.config.step_budget();
            drive_steps(&mut store, &options, "compare", |store| {
                run_steps(&mut CompareEngine::new(store, runtime.context()), budget)
            })?;
        }
        Commands::Update { json, until_done } => {
            let runtime = Runtime::load(cli.config.as_deref())?;
            let mut store = runtime.open_store()?;
            let options = StepOptions::new(style, json, until_done);
            let budget = runtime.config.step_budget();
            drive_steps(&mut store, &options, "update", |store| {
                run_steps(&mut UpdateEngine::new(store, runtime.context()), budget)
            })?;
        }
        Commands::SelectObsolete { paths } => {
            let runtime = Runtime::load(cli.config.as_deref())?;
            let mut store = runtime.open_store()?;
            let selected = store.select_obsolete(&paths)?;
            store.save(current_unix_timestamp()?)?;
            let status = if selected == paths.len() { "ok" } else { "warn" };
            println!(
                "{}",
                render_status_line(
                    style,
                    status,
                    &format!("{selected} of {} paths selected for removal.", paths.len())
                )
            );
        }
        Commands::Reset { scope } => {
            let runtime = Runtime::load(cli.config.as_deref())?;
            let mut store = runtime.open_store()?;
            match scope {
                ResetArg::All => store.clear()?,
                ResetArg::Session => {
                    store.reset(ResetScope::NewSession);
                    store.save(current_unix_timestamp()?)?;
                }
                ResetArg::Compare => {
                    store.reset(ResetScope::NewCompare);
                    store.save(current_unix_timestamp()?)?;
                }
            }
            println!("{}", render_status_line(style, "ok", "Operation state reset."));
        }
        Commands::DbDiff { json } => {
            let config = load_config(cli.config.as_deref())?;
            let expected = require_expected_schema(&config)?;
            let report = first_server_report(&config, &expected)?;
            print_difference_report(&report, style, json)?;
        }
        Commands::DbFix { ids, json } => {
            let config = load_config(cli.config.as_deref())?;
            let expected = require_expected_schema(&config)?;
            let factory = MysqlCliFactory::new(&config.mysql_binary);
            let applied = apply_fixes(
                &expected,
                &config.databases,
                &factory,
                &config.table_prefix,
                &ids,
            )?;
            if !json {
                println!(
                    "{}",
                    render_status_line(style, "ok", &format!("Applied {applied} fixes."))
                );
            }
            let report = first_server_report(&config, &expected)?;
            print_difference_report(&report, style, json)?;
        }
        Commands::Completions { shell } => {
            let mut stdout = io::stdout().lock();
            write_completions_script(shell, &mut stdout)?;
        }
    }

    Ok(())
}

fn load_config(explicit: Option<&Path>) -> Result<UpdaterConfig> {
    let path = resolve_config_path(explicit);
    UpdaterConfig::load(&path)
}

/// Everything the step engines need, built from the configuration.
struct Runtime {
    config: UpdaterConfig,
    layout: InstallationLayout,
    fetcher: HttpManifestFetcher,
    hooks: ConfiguredHostHooks,
    hasher: ContentHasher,
    runner: ProcessScriptRunner,
    migrator: Option<DatabaseSchemaMigrator>,
}

impl Runtime {
    fn load(explicit: Option<&Path>) -> Result<Self> {
        let config = load_config(explicit)?;
        let layout = config.layout()?;
        let fetcher = HttpManifestFetcher::new(FETCH_TIMEOUT)?;
        let hooks = ConfiguredHostHooks::new(config.incompatible_modules.clone());
        let hasher = ContentHasher::new(config.memory_limit_bytes);
        let runner = ProcessScriptRunner::new(config.swap_executable()?);
        let migrator = match config.expected_schema()? {
            Some(expected) if !config.databases.is_empty() => Some(DatabaseSchemaMigrator::new(
                expected,
                config.databases.clone(),
                Box::new(MysqlCliFactory::new(&config.mysql_binary)),
                config.table_prefix.clone(),
            )),
            _ => None,
        };

        Ok(Self {
            config,
            layout,
            fetcher,
            hooks,
            hasher,
            runner,
            migrator,
        })
    }

    fn context(&self) -> EngineContext<'_> {
        EngineContext {
            layout: &self.layout,
            channels: &self.config.channels,
            fetcher: &self.fetcher,
            hooks: &self.hooks,
            hasher: &self.hasher,
            runner: &self.runner,
            migrator: self
                .migrator
                .as_ref()
                .map(|migrator| migrator as &dyn SchemaMigrator),
        }
    }

    fn open_store(&self) -> Result<ManifestStore> {
        let backend = FileStateBackend::new(self.layout.state_path());
        ManifestStore::open(Box::new(backend), current_unix_timestamp()?)
    }
}

struct StepOptions {
    style: OutputStyle,
    json: bool,
    until_done: bool,
}

impl StepOptions {
    fn new(style: OutputStyle, json: bool, until_done: bool) -> Self {
        let style = if json { OutputStyle::Plain } else { style };
        Self {
            style,
            json,
            until_done,
        }
    }
}

/// Invokes `invoke` once, or until done with `until_done`, saving the state
/// after every invocation.
fn drive_steps<F>(
    store: &mut ManifestStore,
    options: &StepOptions,
    label: &str,
    mut invoke: F,
) -> Result<()>
where
    F: FnMut(&mut ManifestStore) -> StepReport,
{
    let progress_style = if options.until_done {
        options.style
    } else {
        OutputStyle::Plain
    };
    let progress = StepProgress::start(progress_style, label);
    loop {
        let report = invoke(store);
        store
            .save(current_unix_timestamp()?)
            .with_context(|| format!("failed to save {label} progress"))?;

        if options.json {
            progress.println(&serde_json::to_string(&report)?);
        } else {
            for line in format_step_report_lines(&report, options.style) {
                progress.println(&line);
            }
        }
        if let Some(last) = report.informations.last() {
            progress.set_message(last);
        }

        if report.error {
            progress.finish();
            return Err(anyhow!("{label} failed"));
        }
        if report.done {
            break;
        }
        if !options.until_done {
            if !options.json {
                progress.println(&render_status_line(
                    options.style,
                    "step",
                    &format!("Run `upshift {label}` again to continue."),
                ));
            }
            break;
        }
    }
    progress.finish();
    Ok(())
}

fn require_expected_schema(config: &UpdaterConfig) -> Result<Schema> {
    config
        .expected_schema()?
        .ok_or_else(|| anyhow!("no object_model configured"))
}

/// Differences on the first configured server.
fn first_server_report(config: &UpdaterConfig, expected: &Schema) -> Result<DifferenceReport> {
    let server = config
        .databases
        .first()
        .ok_or_else(|| anyhow!("no [[databases]] configured"))?;
    let factory = MysqlCliFactory::new(&config.mysql_binary);
    let mut connection = factory
        .connect(server)
        .with_context(|| format!("failed connecting to {}", server.label()))?;
    Ok(difference_report(
        expected,
        connection.as_mut(),
        &config.table_prefix,
    ))
}

fn print_difference_report(report: &DifferenceReport, style: OutputStyle, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(report)?);
    } else {
        for line in format_difference_lines(report, style) {
            println!("{line}");
        }
    }
    if report.success {
        Ok(())
    } else {
        Err(anyhow!("database comparison failed"))
    }
}
