//! At-most-once cleanup of sensitive guest artifacts.

use std::sync::{Mutex, PoisonError};

use anyhow::Result;

use crate::guest::GuestChannel;
use crate::output::OutputSink;

type CleanupAction<'a> = Box<dyn FnOnce() -> Result<()> + Send + 'a>;

/// RAII guard running a cleanup action exactly once.
///
/// The action runs on the first call to [`run`](Self::run) or, failing that,
/// when the guard is dropped. Later calls are no-ops. Failures are reported
/// as warnings on the output sink and never propagate.
pub struct CleanupGuard<'a> {
    label: String,
    action: Mutex<Option<CleanupAction<'a>>>,
    sink: &'a dyn OutputSink,
}

impl<'a> CleanupGuard<'a> {
    pub fn new(
        label: impl Into<String>,
        sink: &'a dyn OutputSink,
        action: impl FnOnce() -> Result<()> + Send + 'a,
    ) -> Self {
        Self {
            label: label.into(),
            action: Mutex::new(Some(Box::new(action))),
            sink,
        }
    }

    /// Guard deleting the user key at `path` through the guest agent.
    pub fn delete_user_key(
        guest: &'a dyn GuestChannel,
        path: String,
        sink: &'a dyn OutputSink,
    ) -> Self {
        Self::new("user key", sink, move || guest.delete_file(&path))
    }

    /// Runs the action if it has not run yet.
    pub fn run(&self) {
        let action = self
            .action
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(action) = action else {
            tracing::debug!("cleanup of {} already done", self.label);
            return;
        };

        self.sink.emit(&format!("Cleaning up {}...", self.label));
        if let Err(e) = action() {
            self.sink
                .emit(&format!("WARNING: Failed to cleanup {}: {:#}", self.label, e));
        }
    }

    /// Returns true once the action has been taken by a call to `run`.
    pub fn is_done(&self) -> bool {
        self.action
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        self.run();
    }
}
