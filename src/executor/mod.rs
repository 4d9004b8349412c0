//! Command execution abstraction used by the `Exec`, `OnChange` and `Systemd`
//! built-in actions.
//!
//! This module provides:
//! - [`CommandSpec`]: specification for a command to run
//! - [`ExecutionResult`]: captured exit status plus stdout/stderr
//! - [`CommandExecutor`]: trait for command execution strategies
//! - [`RealCommandExecutor`]: production implementation using `std::process::Command`

mod pipe;
mod real;

use std::path::PathBuf;
use std::process::ExitStatus;

use anyhow::Result;

pub use real::RealCommandExecutor;

/// Formats string arguments into a space-separated, debug-quoted string.
///
/// Used by error messages to consistently format command arguments
/// (e.g. `"enable" "--now" "foo.service"`).
pub(crate) fn format_command_args(args: &[String]) -> String {
    args.iter().map(|a| format!("{:?}", a)).collect::<Vec<_>>().join(" ")
}

/// Specification for a command to be executed.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// The command to execute (e.g. `"systemctl"`).
    pub command: String,
    /// Command arguments.
    pub args: Vec<String>,
    /// Working directory (defaults to the current directory).
    pub cwd: Option<PathBuf>,
    /// Environment variables to set in addition to the inherited environment.
    pub env: Vec<(String, String)>,
    /// Run as this uid instead of the current process's, via `setuid(2)`
    /// before `exec`.
    pub uid: Option<u32>,
    /// Run as this gid instead of the current process's, via `setgid(2)`
    /// before `exec`.
    pub gid: Option<u32>,
}

impl CommandSpec {
    /// Creates a new [`CommandSpec`] with a command and its arguments.
    #[must_use]
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            cwd: None,
            env: Vec::new(),
            uid: None,
            gid: None,
        }
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Runs the command as `uid` instead of the current process's user.
    #[must_use]
    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }

    /// Runs the command as `gid` instead of the current process's group.
    #[must_use]
    pub fn with_gid(mut self, gid: u32) -> Self {
        self.gid = Some(gid);
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Adds multiple environment variables.
    ///
    /// Accepts any iterator of key-value pairs that can be converted into
    /// strings, such as `Vec<(String, String)>` or `&[(&str, &str)]`.
    #[must_use]
    pub fn with_envs<I, K, V>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env.extend(envs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }
}

/// Result of running a command: exit status plus captured output.
#[derive(Debug, Default)]
pub struct ExecutionResult {
    /// Exit status of the command.
    pub status: Option<ExitStatus>,
    /// Captured standard output.
    pub stdout: Vec<u8>,
    /// Captured standard error.
    pub stderr: Vec<u8>,
}

impl ExecutionResult {
    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        self.status.is_some_and(|s| s.success())
    }

    /// Returns the exit code if available.
    pub fn code(&self) -> Option<i32> {
        self.status.and_then(|s| s.code())
    }
}

/// Trait for command execution.
///
/// Implementations must be `Send + Sync` so the executor can be shared
/// across threads (e.g. from after-hooks spawned during execute).
pub trait CommandExecutor: Send + Sync {
    /// Executes a command with the given specification.
    fn execute(&self, spec: &CommandSpec) -> Result<ExecutionResult>;
}
