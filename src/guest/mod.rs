//! Guest agent channel abstraction.
//!
//! A [`GuestChannel`] is bound to one VM and one set of guest credentials
//! and exposes the primitives the guest agent offers: credential test,
//! file upload, command execution and file deletion. Channels are opened
//! through a [`ManagementSession`](crate::endpoint::ManagementSession).
//!
//! Implementations are thin and blocking; they never retry. Retrying is the
//! job of [`crate::retry`] and [`crate::exit_code`].

pub mod dry_run;
pub mod local;

use std::fmt;
use std::io::Read;

use anyhow::Result;

pub use dry_run::DryRunGuest;
pub use local::LocalGuest;

use crate::output::OutputSink;

/// Exit status of a guest process that actually ran.
///
/// A command that could not be started at all is reported as an `Err` by
/// [`GuestChannel::run`] instead; the two cases never mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GuestExitStatus(i32);

impl GuestExitStatus {
    /// The status of a process that exited cleanly.
    pub const SUCCESS: Self = Self(0);

    /// Wraps a raw exit code.
    pub const fn from_code(code: i32) -> Self {
        Self(code)
    }

    /// Returns the raw exit code.
    pub const fn code(self) -> i32 {
        self.0
    }

    /// Returns true for exit code 0.
    pub const fn success(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for GuestExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exit status: {}", self.0)
    }
}

/// Primitives exposed by the guest agent for one VM.
///
/// Implementations must be `Send + Sync` so the cleanup guard can hold a
/// reference across threads.
pub trait GuestChannel: Send + Sync {
    /// Verifies the guest credentials are accepted by the guest agent.
    fn test_credentials(&self) -> Result<()>;

    /// Returns the OS family string reported by the guest agent
    /// (e.g., "linuxGuest", "windowsGuest").
    fn guest_family(&self) -> Result<String>;

    /// Streams `content` into a file at `path` on the guest, replacing it.
    fn upload(&self, path: &str, content: &mut dyn Read) -> Result<()>;

    /// Runs `command` on the guest, forwarding its output to `output`.
    ///
    /// Returns `Ok` with the exit status whenever the process ran, including
    /// non-zero exits. Returns `Err` only if the process could not be run.
    fn run(&self, command: &str, output: &dyn OutputSink) -> Result<GuestExitStatus>;

    /// Deletes the file at `path` on the guest.
    fn delete_file(&self, path: &str) -> Result<()>;
}
