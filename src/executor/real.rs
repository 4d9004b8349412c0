//! Real command executor implementation.
//!
//! Runs commands with `std::process::Command`, streaming stdout/stderr to
//! logs in real time while also capturing them into the returned
//! [`ExecutionResult`].

use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::thread::JoinHandle;

use anyhow::{Context as _, Result};
use which::which;

use super::pipe::{StreamType, panic_message, read_pipe_to_log};
use super::{CommandExecutor, CommandSpec, ExecutionResult};

fn cleanup_child_process<I>(child: &mut Child, handles: I)
where
    I: IntoIterator<Item = JoinHandle<Vec<u8>>>,
{
    let pid = child.id();
    if let Err(e) = child.kill() {
        tracing::debug!(pid = pid, "kill returned error (process may have already exited): {}", e);
    }
    if let Err(e) = child.wait() {
        tracing::warn!(pid = pid, "failed to wait for child process after kill: {}", e);
    }
    for handle in handles {
        if let Err(e) = handle.join() {
            tracing::warn!("reader thread panicked during cleanup: {}", panic_message(&*e));
        }
    }
}

fn spawn_reader_threads(child: &mut Child) -> Result<(JoinHandle<Vec<u8>>, JoinHandle<Vec<u8>>)> {
    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();

    let stdout_handle = match thread::Builder::new()
        .name("stdout-reader".to_string())
        .spawn(move || read_pipe_to_log(stdout_pipe, StreamType::Stdout))
    {
        Ok(handle) => handle,
        Err(e) => {
            cleanup_child_process(child, []);
            return Err(anyhow::anyhow!("failed to spawn stdout reader thread: {e}"));
        }
    };

    let stderr_handle = match thread::Builder::new()
        .name("stderr-reader".to_string())
        .spawn(move || read_pipe_to_log(stderr_pipe, StreamType::Stderr))
    {
        Ok(handle) => handle,
        Err(e) => {
            cleanup_child_process(child, [stdout_handle]);
            return Err(anyhow::anyhow!("failed to spawn stderr reader thread: {e}"));
        }
    };

    Ok((stdout_handle, stderr_handle))
}

/// Command executor that runs actual system commands via `PATH` lookup.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealCommandExecutor;

impl CommandExecutor for RealCommandExecutor {
    fn execute(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
        let program = which(&spec.command).with_context(|| format!("command {:?} not found in PATH", spec.command))?;
        tracing::trace!("command found: {}: {}", spec.command, program.display());

        let mut command = Command::new(&program);
        command.args(&spec.args);

        if let Some(ref cwd) = spec.cwd {
            command.current_dir(cwd);
        }

        for (key, value) in &spec.env {
            command.env(key, value);
        }

        // Order matters: setgid must run before setuid, since dropping uid
        // first (e.g. to a non-root account) can strip the privilege needed
        // to still change gid.
        if let Some(gid) = spec.gid {
            command.gid(gid);
        }
        if let Some(uid) = spec.uid {
            command.uid(uid);
        }

        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn command {:?}", spec.command))?;

        tracing::trace!("spawned command: {}: pid={}", spec.command, child.id());

        let (stdout_handle, stderr_handle) = spawn_reader_threads(&mut child)?;

        let status = match child.wait() {
            Ok(s) => s,
            Err(e) => {
                cleanup_child_process(&mut child, [stdout_handle, stderr_handle]);
                return Err(anyhow::anyhow!("failed to wait for command {:?}: {e}", spec.command));
            }
        };

        let mut panicked_streams = Vec::new();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        for (name, handle) in [("stdout", stdout_handle), ("stderr", stderr_handle)] {
            match handle.join() {
                Ok(bytes) => {
                    if name == "stdout" {
                        stdout = bytes;
                    } else {
                        stderr = bytes;
                    }
                }
                Err(e) => {
                    let msg = panic_message(&*e);
                    tracing::error!(stream = name, panic = msg, "reader thread panicked");
                    panicked_streams.push(format!("{name}: {msg}"));
                }
            }
        }

        if !panicked_streams.is_empty() {
            return Err(anyhow::anyhow!(
                "reader thread(s) panicked during command execution: {}",
                panicked_streams.join(", ")
            ));
        }

        tracing::trace!("executed command: {}: success={}", spec.command, status.success());

        Ok(ExecutionResult {
            status: Some(status),
            stdout,
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_true_successfully() {
        let spec = CommandSpec::new("true", Vec::new());
        let result = RealCommandExecutor.execute(&spec).unwrap();
        assert!(result.success());
    }

    #[test]
    fn captures_stdout() {
        let spec = CommandSpec::new("echo", vec!["hello".to_string()]);
        let result = RealCommandExecutor.execute(&spec).unwrap();
        assert_eq!(String::from_utf8_lossy(&result.stdout).trim(), "hello");
    }

    #[test]
    fn running_as_own_uid_succeeds() {
        let uid = nix::unistd::getuid().as_raw();
        let spec = CommandSpec::new("true", Vec::new()).with_uid(uid);
        let result = RealCommandExecutor.execute(&spec).unwrap();
        assert!(result.success());
    }

    #[test]
    fn unknown_command_is_an_error() {
        let spec = CommandSpec::new("definitely-not-a-real-command", Vec::new());
        assert!(RealCommandExecutor.execute(&spec).is_err());
    }
}
