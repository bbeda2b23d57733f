//! Constant-interval readiness polling.
//!
//! The same loop confirms the management endpoint is a healthy cluster and
//! waits for the guest agent to accept credentials; each use site gets its
//! own [`RetryPolicy`]. Transient probe failures are retried silently; only
//! exhausting the attempt budget is fatal.

use std::time::Duration;

use anyhow::Result;
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::error::{ProvisionError, find_typed};
use crate::output::OutputSink;

/// Interval and attempt budget for one polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause between consecutive attempts.
    pub interval: Duration,
    /// Total number of attempts, including the first.
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Creates a policy with an explicit attempt budget (at least one attempt).
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Derives the attempt budget as `ceil(timeout / interval)`.
    ///
    /// A zero interval degenerates to a single attempt.
    pub fn from_timeout(timeout: Duration, interval: Duration) -> Self {
        let attempts = if interval.is_zero() {
            1
        } else {
            let timeout = timeout.as_millis();
            let interval = interval.as_millis().max(1);
            u32::try_from(timeout.div_ceil(interval)).unwrap_or(u32::MAX)
        };
        Self::new(interval, attempts)
    }
}

/// Blocking pause between attempts.
///
/// Implemented by [`CancellationToken`] so every pause observes cancellation.
pub trait Sleeper {
    /// Pauses for `duration`, failing with `Cancelled` if interrupted.
    fn pause(&self, duration: Duration) -> Result<(), ProvisionError>;
}

impl Sleeper for CancellationToken {
    fn pause(&self, duration: Duration) -> Result<(), ProvisionError> {
        self.sleep(duration)
    }
}

/// Progress lines emitted by [`retry_until_ready`].
#[derive(Debug, Clone, Copy)]
pub struct ProbeMessages<'a> {
    /// Name of the thing being polled, used in the exhaustion error.
    pub target: &'a str,
    /// Line emitted before every attempt.
    pub waiting: &'a str,
    /// Line emitted once the probe succeeds.
    pub ready: &'a str,
}

/// Runs `probe` until it succeeds or the attempt budget is exhausted.
///
/// Sleeps for `policy.interval` between attempts, never after the last one
/// and never after a success. A probe error carrying
/// `ProvisionError::Cancelled` stops the loop immediately; every other probe
/// error is retried. On exhaustion the last probe error is returned as
/// `ProvisionError::Connectivity`.
pub fn retry_until_ready<T>(
    policy: &RetryPolicy,
    messages: ProbeMessages<'_>,
    cancel: &CancellationToken,
    sleeper: &dyn Sleeper,
    sink: &dyn OutputSink,
    mut probe: impl FnMut(u32) -> Result<T>,
) -> Result<T, ProvisionError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        cancel.check()?;
        sink.emit(&format!("{} (attempt {}/{})", messages.waiting, attempt, max_attempts));

        match probe(attempt) {
            Ok(value) => {
                sink.emit(messages.ready);
                return Ok(value);
            }
            Err(e) => {
                if matches!(find_typed(&e), Some(ProvisionError::Cancelled)) {
                    return Err(ProvisionError::Cancelled);
                }
                debug!(target_name = messages.target, attempt, "probe failed: {:#}", e);
                last_error = Some(e);
            }
        }

        if attempt < max_attempts {
            sleeper.pause(policy.interval)?;
        }
    }

    Err(ProvisionError::Connectivity {
        target: messages.target.to_string(),
        attempts: max_attempts,
        message: last_error
            .map(|e| format!("{:#}", e))
            .unwrap_or_else(|| "no attempt was made".to_string()),
    })
}
