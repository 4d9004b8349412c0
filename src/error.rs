//! Domain-specific error types for system-deploy.
//!
//! This module defines `SystemDeployError`, a `thiserror`-based enum that
//! provides typed error variants for every failure mode named in the
//! component design: lexer, option validator, task decode, drop-in merge,
//! condition evaluation, and execution graph. Public API functions return
//! `Result<T, SystemDeployError>`, while action implementations continue
//! to use `anyhow::Result` at their boundaries.
//!
//! `SystemDeployError` implements `std::error::Error`, so the `?` operator
//! converts it automatically wherever a function returns `anyhow::Result`.

use std::io;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SystemDeployError>;

/// The maximum byte length of a single physical line in a unit file.
pub const SYSTEMD_LINE_MAX: usize = 2048;

/// Formats an IO error kind into a human-readable message.
///
/// Provides consistent, user-friendly messages for common IO error kinds
/// (e.g., "I/O error: not found") instead of the OS-level messages
/// (e.g., "No such file or directory (os error 2)").
pub(crate) fn io_error_kind_message(err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::NotFound => "I/O error: not found".to_string(),
        io::ErrorKind::PermissionDenied => "I/O error: permission denied".to_string(),
        io::ErrorKind::AlreadyExists => "I/O error: already exists".to_string(),
        _ => format!("I/O error: {}", err),
    }
}

/// Domain-specific error type for system-deploy.
///
/// Provides typed variants for every failure mode named by the component
/// design, enabling callers (and tests) to match on error kinds
/// programmatically rather than parsing error message strings.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SystemDeployError {
    /// A physical line exceeded [`SYSTEMD_LINE_MAX`] bytes.
    #[error("line too long (max {max} bytes)")]
    LineTooLong { max: usize },

    /// An option name spanned a newline before an `=` was found.
    #[error("unexpected newline encountered while parsing option name")]
    UnexpectedNewlineInOption,

    /// Non-whitespace content followed the closing `]` of a section header.
    #[error("found garbage after section name [{section}]: {garbage}")]
    GarbageAfterSection { section: String, garbage: String },

    /// A `name = value` line was encountered before any `[Section]` header.
    #[error("found option outside of section")]
    OptionOutsideSection,

    /// A generic I/O failure with contextual information.
    #[error("{context}: {message}")]
    Io {
        /// What was being done when the error occurred.
        context: String,
        /// Human-readable description, derived from [`io_error_kind_message`].
        message: String,
        /// The underlying I/O error, preserved for programmatic inspection.
        #[source]
        source: io::Error,
    },

    /// A required option was missing or had an empty value.
    #[error("{name}: option is required")]
    OptionRequired { name: String },

    /// A non-slice option was specified more than once.
    #[error("{name}: option is only allowed once")]
    OptionAllowedOnce { name: String },

    /// An option was given that has no matching spec.
    #[error("{name}: option does not exist")]
    OptionNotExists { name: String },

    /// A value could not be parsed as a boolean.
    #[error("{name}: invalid boolean value {value:?}")]
    InvalidBoolean { name: String, value: String },

    /// A value could not be parsed as an integer.
    #[error("{name}: invalid number {value:?}")]
    InvalidNumber { name: String, value: String },

    /// A value could not be parsed as a floating point number.
    #[error("{name}: invalid floating point number {value:?}")]
    InvalidFloat { name: String, value: String },

    /// A task file contained no sections at all.
    #[error("task does not contain any sections")]
    NoSections,

    /// The `[Task]` meta section failed to decode.
    #[error("[Task] section is invalid: {0}")]
    InvalidTaskSection(String),

    /// A drop-in referenced a section absent from the base task.
    #[error("drop-in {file}: section [{section}] does not exist in the base task")]
    DropInSectionNotExists { file: String, section: String },

    /// A drop-in referenced a section that appears more than once in the base task.
    #[error("drop-in {file}: section [{section}] is ambiguous in the base task")]
    DropInSectionNotAllowed { file: String, section: String },

    /// A (non-assertion) condition evaluated to false; the task is disabled.
    #[error("{task}: condition {condition} failed for {value:?}")]
    ConditionFailed {
        task: String,
        condition: String,
        value: String,
    },

    /// An assertion evaluated to false; the deploy aborts.
    #[error("{task}: assertion {condition} failed for {value:?}")]
    AssertionFailed {
        task: String,
        condition: String,
        value: String,
    },

    /// A task with the given name was already registered with the graph.
    #[error("task {0} already exists")]
    TaskExists(String),

    /// A task with the given name is not known to the graph.
    #[error("task {0} does not exist")]
    TaskNotExists(String),

    /// An operation was invoked outside the execution phase that allows it.
    #[error("operation not allowed in the current execution phase")]
    ExecPhase,

    /// An action raised an error during prepare or execute.
    #[error("action {name} failed: {source}")]
    Action {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// `describe`/`run` referenced an action name that isn't registered.
    #[error("action {0} does not exist")]
    UnknownPlugin(String),

    /// A plugin's setup function returned no action.
    #[error("plugin returned an invalid (nil) action")]
    InvalidAction,

    /// A plugin was registered without a setup function.
    #[error("plugin has no setup function")]
    NoSetupFunc,

    /// A plugin name was already registered.
    #[error("action {0} is already registered")]
    PluginExists(String),

    /// A validation constraint that doesn't fit another variant.
    #[error("validation error: {0}")]
    Validation(String),
}

impl SystemDeployError {
    /// Creates an `Io` variant with the `message` field automatically derived
    /// from `source` via [`io_error_kind_message`].
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            message: io_error_kind_message(&source),
            source,
        }
    }
}
