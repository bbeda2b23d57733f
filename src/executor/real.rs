//! Real command executor implementation.
//!
//! This module provides [`RealCommandExecutor`], which executes commands
//! using `std::process::Command` with real-time output streaming and
//! cancellation by kill.

use std::process::{Child, Command, Stdio};
use std::thread::{self, ScopedJoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use which::which;

use super::pipe::{StreamType, panic_message, read_pipe_to_sink};
use super::{CommandExecutor, CommandSpec, ExecutionResult};
use crate::cancel::CancellationToken;
use crate::error::ProvisionError;
use crate::output::OutputSink;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Kills a child process and joins its reader threads.
///
/// Called from error and cancellation paths in
/// [`RealCommandExecutor::execute()`] so no process or thread outlives the call.
fn cleanup_child_process<'scope, I>(child: &mut Child, handles: I)
where
    I: IntoIterator<Item = ScopedJoinHandle<'scope, ()>>,
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

/// Command executor that runs actual host processes.
#[derive(Debug, Default, Clone)]
pub struct RealCommandExecutor;

impl CommandExecutor for RealCommandExecutor {
    fn execute(
        &self,
        spec: &CommandSpec,
        output: &dyn OutputSink,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult> {
        cancel.check()?;

        let cmd =
            which(&spec.command).with_context(|| format!("command not found: {}", spec.command))?;
        tracing::trace!("command found: {}: {}", spec.command, cmd.to_string_lossy());

        let mut command = Command::new(cmd);
        command.args(&spec.args);

        if let Some(ref cwd) = spec.cwd {
            command.current_dir(cwd);
        }

        for (key, value) in &spec.env {
            command.env(key, value);
        }

        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn command `{}`", spec.display()))?;

        tracing::trace!("spawned command: {}: pid={}", spec.command, child.id());

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        thread::scope(|s| {
            let stdout_handle = match thread::Builder::new()
                .name("stdout-reader".to_string())
                .spawn_scoped(s, move || read_pipe_to_sink(stdout_pipe, StreamType::Stdout, output))
            {
                Ok(handle) => handle,
                Err(e) => {
                    cleanup_child_process(&mut child, []);
                    return Err(anyhow!(
                        "failed to spawn stdout reader thread for `{}`: {}",
                        spec.display(),
                        e
                    ));
                }
            };

            let stderr_handle = match thread::Builder::new()
                .name("stderr-reader".to_string())
                .spawn_scoped(s, move || read_pipe_to_sink(stderr_pipe, StreamType::Stderr, output))
            {
                Ok(handle) => handle,
                Err(e) => {
                    cleanup_child_process(&mut child, [stdout_handle]);
                    return Err(anyhow!(
                        "failed to spawn stderr reader thread for `{}`: {}",
                        spec.display(),
                        e
                    ));
                }
            };

            let status = loop {
                match child.try_wait() {
                    Ok(Some(status)) => break status,
                    Ok(None) => {}
                    Err(e) => {
                        cleanup_child_process(&mut child, [stdout_handle, stderr_handle]);
                        return Err(anyhow!(
                            "failed to wait for command `{}`: {}",
                            spec.display(),
                            e
                        ));
                    }
                }
                if cancel.sleep(POLL_INTERVAL).is_err() {
                    tracing::info!(pid = child.id(), "cancellation requested, killing command");
                    cleanup_child_process(&mut child, [stdout_handle, stderr_handle]);
                    return Err(ProvisionError::Cancelled.into());
                }
            };

            let mut panicked_streams = Vec::new();
            let handles = [("stdout", stdout_handle), ("stderr", stderr_handle)];
            for (name, handle) in handles {
                if let Err(e) = handle.join() {
                    let msg = panic_message(&*e);
                    tracing::error!(stream = name, panic = msg, "reader thread panicked");
                    panicked_streams.push(format!("{}: {}", name, msg));
                }
            }

            if !panicked_streams.is_empty() {
                return Err(anyhow!(
                    "reader thread(s) panicked while running `{}`: {}",
                    spec.display(),
                    panicked_streams.join(", ")
                ));
            }

            tracing::trace!("executed command: {}: success={}", spec.command, status.success());

            Ok(ExecutionResult { status })
        })
    }
}
