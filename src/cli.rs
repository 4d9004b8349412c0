//! Command-line interface definitions for `system-deploy`.
//!
//! This module defines the CLI structure using the `clap` crate: the three
//! top-level commands (`deploy`, `describe`, `run`) and the arguments each
//! one accepts. It provides a type-safe representation of the user's
//! command-line input that the application can use to determine what
//! action to take.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint};

/// Top-level CLI structure that serves as the entry point for parsing
/// command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
pub struct Cli {
    /// Set the log level for controlling verbosity of output.
    ///
    /// This determines the amount of information logged during execution.
    /// Options range from `trace` (most verbose) to `error` (least verbose).
    #[arg(short, long, global = true, default_value = "info")]
    pub log: LogLevel,

    /// The subcommand to execute, defining the primary operation.
    #[command(subcommand)]
    pub command: Commands,
}

/// The available subcommands in the application.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploy one or more directories of `.task` files.
    ///
    /// Every `.task` file found (recursively) under the given directories
    /// is decoded, merged with any matching drop-in overrides, and run
    /// through a two-phase prepare/execute pass in file-name order.
    Deploy(DeployArgs),

    /// Print documentation for one or all registered actions.
    ///
    /// With no action name, every registered action plus the `[Task]` meta
    /// section is described. Pass `task` to describe just the meta section.
    Describe(DescribeArgs),

    /// Run a single action ad-hoc, outside of any task file.
    ///
    /// Useful for testing an action's options interactively before writing
    /// a task file around it.
    Run(RunArgs),
}

/// Arguments for the `deploy` command.
#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Directories to scan, recursively, for `.task` files.
    #[arg(required = true, value_hint = ValueHint::DirPath)]
    pub directories: Vec<PathBuf>,

    /// Drop-in search root. May be given more than once; roots are
    /// searched in the order given, and later occurrences of the same
    /// drop-in file name win.
    #[arg(short, long = "path", default_values = [".config", "/etc/system-deploy"])]
    pub search_paths: Vec<PathBuf>,
}

/// Arguments for the `describe` command.
#[derive(Args, Debug)]
pub struct DescribeArgs {
    /// Name of the action to describe. Omit to describe every registered
    /// action (and the `[Task]` meta section).
    pub action: Option<String>,

    /// Render the documentation as Markdown instead of plain text.
    #[arg(long)]
    pub markdown: bool,
}

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Name of the action to run (e.g. `Copy`, `Exec`).
    pub action: String,

    /// An option to pass to the action, as `key=value`. May be given more
    /// than once.
    #[arg(short = 'o', long = "option")]
    pub options: Vec<String>,
}

/// Represents log levels for controlling the verbosity of logging output.
///
/// This enum maps directly to the log levels used by the `tracing` crate:
/// - `Trace`: Designates very detailed application-level information.
/// - `Debug`: Designates information useful for debugging.
/// - `Info`: Designates general operational messages.
/// - `Warn`: Designates potentially harmful situations.
/// - `Error`: Designates error events that might still allow the
///   application to continue running.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Parses command-line arguments into a structured `Cli` instance.
pub fn parse_args() -> Cli {
    Cli::parse()
}
