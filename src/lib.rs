//! `system-deploy`: a declarative, systemd-style task runner for host
//! configuration.
//!
//! A deploy directory holds `.task` files — unit-file-style documents with
//! a `[Task]` meta section (conditions, masking, environment files) plus
//! one or more action sections (`[Copy]`, `[Exec]`, `[Systemd]`, ...). This
//! crate wires together the stages that turn those files into a finished
//! deploy run:
//!
//! 1. [`task::decode_file`] parses a `.task` file.
//! 2. [`dropin`] resolves and merges any `.d/*.conf` overrides.
//! 3. [`env::apply_environment`] substitutes `${VAR}` references.
//! 4. [`actions::registry::setup`] builds one [`actions::Action`] per
//!    section.
//! 5. [`runner::Runner`] runs the two-phase prepare/execute deploy.
//!
//! [`run_deploy`], [`run_describe`], and [`run_run_action`] are the three
//! entry points `main.rs` drives from the CLI.

pub mod actions;
pub mod cli;
pub mod condition;
pub mod dropin;
pub mod env;
pub mod error;
pub mod executor;
pub mod graph;
pub mod logger;
pub mod runner;
pub mod task;
pub mod unit;
pub mod util;

use std::path::PathBuf;
use std::sync::{Arc, Once};

use anyhow::Context as _;
use tracing_subscriber::FmtSubscriber;

pub use error::SystemDeployError;

use actions::registry;
use dropin::SectionSpecs;
use graph::Context;
use logger::{Logger, TaskLogger};
use runner::{DeployReport, Runner};
use task::spec::Validation;
use task::Task;

static REGISTER_BUILTINS: Once = Once::new();

/// Registers the built-in action plugins exactly once per process.
fn ensure_builtins_registered() {
    REGISTER_BUILTINS.call_once(actions::builtin::register_all);
}

/// Installs a `tracing` subscriber at the requested verbosity.
///
/// Uses `tracing_subscriber`'s `FmtSubscriber::builder()` + `set_global_default`;
/// only the level filter comes from the CLI.
pub fn init_logging(log_level: cli::LogLevel) -> anyhow::Result<()> {
    let filter = match log_level {
        cli::LogLevel::Trace => tracing::level_filters::LevelFilter::TRACE,
        cli::LogLevel::Debug => tracing::level_filters::LevelFilter::DEBUG,
        cli::LogLevel::Info => tracing::level_filters::LevelFilter::INFO,
        cli::LogLevel::Warn => tracing::level_filters::LevelFilter::WARN,
        cli::LogLevel::Error => tracing::level_filters::LevelFilter::ERROR,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(filter).finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to install tracing subscriber")
}

/// Resolves registered plugins' option specs for [`dropin::apply_drop_ins`].
struct RegistrySpecs;

impl SectionSpecs for RegistrySpecs {
    fn validation_for(&self, section_name: &str) -> Option<Validation> {
        registry::option_specs(section_name).map(Validation::Specs)
    }
}

/// Recursively collects every `.task` file under `dirs`, sorted by path
/// within each directory so deploy order is stable across runs.
fn collect_task_files(dirs: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for dir in dirs {
        for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.with_context(|| format!("walking {}", dir.display()))?;
            if entry.file_type().is_file() && entry.path().extension().and_then(|e| e.to_str()) == Some("task") {
                files.push(entry.path().to_path_buf());
            }
        }
    }
    Ok(files)
}

/// Emits the resolved task as a debug-level JSON dump, if DEBUG logging is
/// enabled. `Task` itself doesn't derive `Serialize` (`conditions` holds a
/// boxed closure), so this projects just the serializable fields.
fn dump_task(task: &Task) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }

    #[derive(serde::Serialize)]
    struct TaskDump<'a> {
        file_name: &'a str,
        directory: &'a str,
        description: &'a str,
        start_masked: bool,
        disabled: bool,
        environment_files: &'a [String],
        sections: &'a [unit::Section],
    }

    let dump = TaskDump {
        file_name: &task.file_name,
        directory: &task.directory,
        description: &task.description,
        start_masked: task.start_masked,
        disabled: task.disabled,
        environment_files: &task.environment_files,
        sections: &task.sections,
    };

    match serde_json::to_string_pretty(&dump) {
        Ok(json) => tracing::debug!(task = %task.file_name, "resolved task:\n{json}"),
        Err(e) => tracing::debug!(task = %task.file_name, error = %e, "failed to serialize task for debug dump"),
    }
}

/// Loads, resolves, and registers every task found under `dirs`, then runs
/// the two-phase deploy.
///
/// `search_roots` are the drop-in search roots (normally `--path`'s value);
/// each task's own `.d` override directories are looked up under every
/// root in turn, root-first.
pub fn run_deploy(dirs: &[PathBuf], search_roots: &[PathBuf]) -> anyhow::Result<DeployReport> {
    ensure_builtins_registered();

    let task_files = collect_task_files(dirs)?;
    let mut runner = Runner::new();
    let specs = RegistrySpecs;

    for path in &task_files {
        let task = task::decode_file(path).with_context(|| format!("decoding {}", path.display()))?;

        let dropin_paths = dropin::search_dropin_files(search_roots, &task.file_name);
        let mut merged = dropin::apply_drop_ins(&task, &dropin_paths, &specs)
            .with_context(|| format!("applying drop-ins for {}", task.file_name))?;

        env::apply_environment(&mut merged).with_context(|| format!("resolving environment for {}", merged.file_name))?;

        if merged.disabled {
            tracing::info!(task = %merged.file_name, "task is disabled, skipping");
            continue;
        }

        dump_task(&merged);

        let mut actions = Vec::with_capacity(merged.sections.len());
        let shared_task = Arc::new(merged.clone());
        for section in &merged.sections {
            let logger: Arc<dyn Logger> = Arc::new(TaskLogger::new(&merged.file_name));
            let mut action = registry::setup(&section.name, logger, &merged, section)
                .with_context(|| format!("{}: [{}]", merged.file_name, section.name))?;
            action.set_task(shared_task.clone());
            actions.push(action);
        }

        runner.add_task(&merged.file_name, actions, merged.conditions.clone())?;
        if merged.start_masked {
            runner.mask_task(&merged.file_name)?;
        }
    }

    Ok(runner.deploy(&Context::new())?)
}

/// Builds a degenerate single-section task in memory and runs just that one
/// action's prepare/execute pass, for the `run <action> -o key=val` CLI
/// command. Returns whether the action reported a change.
pub fn run_run_action(name: &str, options: Vec<(String, String)>) -> anyhow::Result<bool> {
    ensure_builtins_registered();

    let cwd = std::env::current_dir().context("resolving current directory")?;
    let task = Task::new(format!("{name}.adhoc"), cwd.to_string_lossy().to_string());

    let mut section = unit::Section::new(name);
    for (key, value) in options {
        section.options.push(key, value);
    }

    let logger: Arc<dyn Logger> = Arc::new(TaskLogger::new(&task.file_name));
    let action = registry::setup(name, logger, &task, &section)?;

    let mut runner = Runner::new();
    runner.add_task(&task.file_name, vec![action], Vec::new())?;
    let report = runner.deploy(&Context::new())?;

    let outcome = report
        .tasks
        .first()
        .ok_or_else(|| anyhow::anyhow!("action {name:?} produced no report"))?;

    if let Some(error) = &outcome.error {
        anyhow::bail!("{error}");
    }

    Ok(outcome.changed)
}

/// Renders documentation for one plugin, or every registered plugin, for
/// the `describe` CLI command. `"task"` (case-insensitive) describes the
/// `[Task]` meta section instead of a plugin.
pub fn run_describe(action: Option<&str>, markdown: bool) -> anyhow::Result<String> {
    ensure_builtins_registered();

    match action {
        Some(name) if name.eq_ignore_ascii_case("task") => Ok(describe_task_meta(markdown)),
        Some(name) => describe_one(name, markdown).ok_or_else(|| anyhow::anyhow!("action {name:?} does not exist")),
        None => Ok(describe_all(markdown)),
    }
}

fn describe_all(markdown: bool) -> String {
    let mut out = describe_task_meta(markdown);
    for name in registry::list() {
        if let Some(rendered) = describe_one(&name, markdown) {
            out.push_str(&rendered);
        }
    }
    out
}

fn describe_one(name: &str, markdown: bool) -> Option<String> {
    registry::describe(name, |plugin| render_plugin(plugin, markdown))
}

fn render_plugin(plugin: &actions::Plugin, markdown: bool) -> String {
    let mut out = String::new();
    let visible_specs: Vec<_> = plugin.option_specs.iter().filter(|s| !s.internal).collect();

    if markdown {
        out.push_str(&format!("## {}\n\n{}\n\n", plugin.name, plugin.description));
        if !visible_specs.is_empty() {
            out.push_str("| Option | Type | Required | Default | Description |\n|---|---|---|---|---|\n");
            for spec in &visible_specs {
                out.push_str(&format!(
                    "| {} | {} | {} | {} | {} |\n",
                    spec.name,
                    spec.r#type,
                    spec.required,
                    spec.default.as_deref().unwrap_or(""),
                    spec.description,
                ));
            }
            out.push('\n');
        }
        for section in &plugin.help_sections {
            out.push_str(&format!("### {}\n\n{}\n\n", section.title, section.body));
        }
        if !plugin.example.is_empty() {
            out.push_str(&format!("```ini\n{}\n```\n\n", plugin.example));
        }
        if !plugin.author.is_empty() || !plugin.website.is_empty() {
            out.push_str(&format!("_{} — {}_\n\n", plugin.author, plugin.website));
        }
    } else {
        out.push_str(&format!("{}\n{}\n\n", plugin.name, plugin.description));
        for spec in &visible_specs {
            let required = if spec.required { " (required)" } else { "" };
            let default = spec
                .default
                .as_deref()
                .map(|d| format!(" [default: {d}]"))
                .unwrap_or_default();
            out.push_str(&format!(
                "  {} : {}{}{}\n    {}\n",
                spec.name, spec.r#type, required, default, spec.description
            ));
        }
        for section in &plugin.help_sections {
            out.push_str(&format!("\n{}\n  {}\n", section.title, section.body));
        }
        out.push('\n');
    }

    out
}

fn describe_task_meta(markdown: bool) -> String {
    let specs = task::meta::registry().specs();
    let visible: Vec<_> = specs.iter().filter(|s| !s.internal).collect();
    let mut out = String::new();

    if markdown {
        out.push_str("## Task\n\nOptions accepted in every task's `[Task]` meta section.\n\n");
        out.push_str("| Option | Type | Required | Default | Description |\n|---|---|---|---|---|\n");
        for spec in &visible {
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                spec.name,
                spec.r#type,
                spec.required,
                spec.default.as_deref().unwrap_or(""),
                spec.description,
            ));
        }
        out.push('\n');
    } else {
        out.push_str("Task\nOptions accepted in every task's [Task] meta section.\n\n");
        for spec in &visible {
            out.push_str(&format!("  {} : {}\n    {}\n", spec.name, spec.r#type, spec.description));
        }
        out.push('\n');
    }

    out
}
