//! Cooperative cancellation for blocking provisioning runs.
//!
//! A [`CancellationToken`] is cloned into every component that blocks:
//! the retry loops sleep through [`CancellationToken::sleep`], and the local
//! transport polls [`CancellationToken::is_cancelled`] while a child process
//! runs. Cancelling wakes all sleepers immediately.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::ProvisionError;

#[derive(Debug, Default)]
struct State {
    cancelled: Mutex<bool>,
    wakeup: Condvar,
}

/// Shared cancellation flag with interruptible sleeps.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    state: Arc<State>,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the token as cancelled and wakes every pending sleep.
    pub fn cancel(&self) {
        let mut cancelled = self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        self.state.wakeup.notify_all();
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        *self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `Err(ProvisionError::Cancelled)` if the token was cancelled.
    pub fn check(&self) -> Result<(), ProvisionError> {
        if self.is_cancelled() {
            return Err(ProvisionError::Cancelled);
        }
        Ok(())
    }

    /// Sleeps for `duration`, returning early with `Cancelled` if the token
    /// is cancelled before or during the wait.
    ///
    /// A duration too large to be represented as a deadline waits until the
    /// token is cancelled.
    pub fn sleep(&self, duration: Duration) -> Result<(), ProvisionError> {
        let deadline = Instant::now().checked_add(duration);
        let mut cancelled = self
            .state
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        loop {
            if *cancelled {
                return Err(ProvisionError::Cancelled);
            }
            cancelled = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(());
                    }
                    self.state
                        .wakeup
                        .wait_timeout(cancelled, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .state
                    .wakeup
                    .wait(cancelled)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }
}
