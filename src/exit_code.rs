//! Exit-code classification and the terminal-run retry loop.
//!
//! The client process reports outcomes through its exit status. Three codes
//! signal a recognized non-error condition and always count as success;
//! any other non-zero code is retried only when the policy lists it.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Result;
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::error::ProvisionError;
use crate::guest::GuestExitStatus;
use crate::output::OutputSink;
use crate::retry::Sleeper;

/// A reboot has been scheduled by the run.
pub const REBOOT_SCHEDULED: i32 = 35;
/// A reboot is required to complete the run.
pub const REBOOT_NEEDED: i32 = 37;
/// The client exited to upgrade itself.
pub const CLIENT_UPGRADE: i32 = 213;

pub const BENIGN_CODES: [i32; 3] = [REBOOT_SCHEDULED, REBOOT_NEEDED, CLIENT_UPGRADE];

/// Outcome of one terminal run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    Success,
    /// Non-zero but treated as success.
    Benign,
    Retry,
    Fatal,
}

/// Maps exit codes to [`ExitClass`].
///
/// Benign codes take precedence over the retry set: they are dropped when
/// the policy is built, so the retry set never overlaps them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitCodePolicy {
    retry_on: BTreeSet<i32>,
}

impl Default for ExitCodePolicy {
    /// The set `{35, 37, 213}` used when none is configured. All three are
    /// benign, so the default policy retries nothing.
    fn default() -> Self {
        Self::with_retry_codes(BENIGN_CODES)
    }
}

impl ExitCodePolicy {
    /// Builds a policy retrying `codes`, minus zero and the benign codes.
    ///
    /// The set replaces the default; it is not merged with it.
    pub fn with_retry_codes(codes: impl IntoIterator<Item = i32>) -> Self {
        Self {
            retry_on: codes
                .into_iter()
                .filter(|&code| code != 0 && !is_benign(code))
                .collect(),
        }
    }

    /// Codes that trigger another attempt.
    pub fn retry_codes(&self) -> &BTreeSet<i32> {
        &self.retry_on
    }

    /// Returns true if `code` would be retried.
    pub fn is_retry_eligible(&self, code: i32) -> bool {
        self.retry_on.contains(&code)
    }

    pub fn classify(&self, code: i32) -> ExitClass {
        if code == 0 {
            ExitClass::Success
        } else if is_benign(code) {
            ExitClass::Benign
        } else if self.retry_on.contains(&code) {
            ExitClass::Retry
        } else {
            ExitClass::Fatal
        }
    }
}

pub fn is_benign(code: i32) -> bool {
    BENIGN_CODES.contains(&code)
}

fn benign_message(code: i32) -> &'static str {
    match code {
        REBOOT_SCHEDULED => "Reboot has been scheduled in the run state",
        REBOOT_NEEDED => "Reboot needs to be completed",
        CLIENT_UPGRADE => "Client has exited during a client upgrade",
        _ => "Client exited with a benign status",
    }
}

/// Settings for [`run_with_exit_code_policy`].
#[derive(Debug, Clone)]
pub struct TerminalRetry<'a> {
    pub policy: &'a ExitCodePolicy,
    /// Extra attempts beyond the first.
    pub max_retries: u32,
    /// Pause between attempts.
    pub wait: Duration,
    /// Command line, used in the fatal error.
    pub command: &'a str,
}

/// Runs `attempt` up to `max_retries + 1` times, classifying each exit code.
///
/// Attempts are numbered from 0. An `Err` from `attempt` means the process
/// could not be run and is returned immediately. The wait happens only
/// between attempts.
pub fn run_with_exit_code_policy(
    settings: &TerminalRetry<'_>,
    cancel: &CancellationToken,
    sleeper: &dyn Sleeper,
    sink: &dyn OutputSink,
    mut attempt: impl FnMut(u32) -> Result<GuestExitStatus>,
) -> Result<()> {
    let mut last_code = 0;

    for n in 0..=settings.max_retries {
        cancel.check()?;

        let status = attempt(n)?;
        let code = status.code();
        last_code = code;

        match settings.policy.classify(code) {
            ExitClass::Success => return Ok(()),
            ExitClass::Benign => {
                sink.emit(benign_message(code));
                return Ok(());
            }
            ExitClass::Fatal => {
                debug!(attempt = n, code, "exit code is not retry-eligible");
                return Err(execution_error(settings.command, code));
            }
            ExitClass::Retry => {
                debug!(attempt = n, code, "exit code is retry-eligible");
            }
        }

        if n < settings.max_retries {
            sink.emit(&format!(
                "Waiting {}s before retrying client run (exit code {})...",
                settings.wait.as_secs(),
                code
            ));
            sleeper.pause(settings.wait)?;
        }
    }

    Err(execution_error(settings.command, last_code))
}

fn execution_error(command: &str, code: i32) -> anyhow::Error {
    ProvisionError::Execution {
        command: command.to_string(),
        code,
    }
    .into()
}
