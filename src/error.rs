//! Domain-specific error types for guestprov.
//!
//! This module defines `ProvisionError`, a `thiserror`-based enum that
//! provides typed error variants for the failure modes of a provisioning
//! run. Public entry points return `Result<T, ProvisionError>`, while trait
//! boundaries (guest channels, management clients, stage actions) use
//! `anyhow::Result`.
//!
//! `ProvisionError` implements `Into<anyhow::Error>`, so the `?` operator
//! converts it automatically at trait boundaries. When an `anyhow::Error`
//! crosses back into the public API, [`ProvisionError::from_stage`] recovers
//! any typed error carried in the chain.

use std::io;

/// Formats an IO error kind into a human-readable message.
///
/// Provides consistent, user-friendly messages for common IO error kinds
/// (e.g., "I/O error: not found") instead of the OS-level messages
/// (e.g., "No such file or directory (os error 2)"). For unrecognized
/// error kinds, falls back to including the OS-level error message
/// directly (e.g., "I/O error: connection refused").
pub(crate) fn io_error_kind_message(err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::NotFound => "I/O error: not found".to_string(),
        io::ErrorKind::PermissionDenied => "I/O error: permission denied".to_string(),
        io::ErrorKind::IsADirectory => "I/O error: is a directory".to_string(),
        _ => format!("I/O error: {}", err),
    }
}

/// Domain-specific error type for guestprov.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProvisionError {
    /// A configuration constraint was violated.
    #[error("validation error: {0}")]
    Validation(String),

    /// A configuration file could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// The guest reported an OS family no profile exists for.
    #[error("unsupported guest OS family: {0}")]
    UnsupportedOsFamily(String),

    /// The management endpoint or guest agent never became ready.
    #[error("{target} not ready after {attempts} attempt(s): {message}")]
    Connectivity {
        /// What was being polled (e.g., "management endpoint", "guest agent").
        target: String,
        /// Number of attempts performed before giving up.
        attempts: u32,
        /// The last error observed.
        message: String,
    },

    /// A guest process ran and exited with a non-zero status.
    #[error("command exited with status {code}: {command}")]
    Execution {
        /// The command line that was run on the guest.
        command: String,
        /// The guest process exit code.
        code: i32,
    },

    /// A pipeline stage failed; remaining stages were not run.
    #[error("stage '{stage}' failed: {message}")]
    Stage {
        /// The name of the failed stage (e.g., "register-identity").
        stage: String,
        /// Exit code of the guest process, when the failure was an exit status.
        exit_code: Option<i32>,
        /// Human-readable description including the error chain.
        message: String,
    },

    /// The run was cancelled by the caller.
    #[error("provisioning cancelled")]
    Cancelled,

    /// An I/O operation failed with contextual information.
    #[error("{context}: {message}")]
    Io {
        /// What was being done when the error occurred.
        context: String,
        /// Human-readable description derived from [`io_error_kind_message`].
        message: String,
        /// The underlying I/O error, preserved for programmatic inspection.
        #[source]
        source: std::io::Error,
    },
}

impl ProvisionError {
    /// Creates an `Io` variant with the `message` field automatically derived
    /// from the `source` via [`io_error_kind_message`].
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            message: io_error_kind_message(&source),
            source,
        }
    }

    /// Converts a stage failure into a typed error.
    ///
    /// `Cancelled` and configuration errors found anywhere in the chain are
    /// returned as-is. Everything else becomes a `Stage` error carrying the
    /// stage name and, when present, the exit code of an `Execution` error.
    pub fn from_stage(stage: &str, err: anyhow::Error) -> Self {
        match find_typed(&err) {
            Some(ProvisionError::Cancelled) => return ProvisionError::Cancelled,
            Some(ProvisionError::UnsupportedOsFamily(family)) => {
                return ProvisionError::UnsupportedOsFamily(family.clone());
            }
            Some(ProvisionError::Validation(msg)) => {
                return ProvisionError::Validation(msg.clone());
            }
            _ => {}
        }

        let exit_code = find_typed(&err).and_then(ProvisionError::exit_code);

        ProvisionError::Stage {
            stage: stage.to_string(),
            exit_code,
            message: format!("{:#}", err),
        }
    }

    /// Returns true if this error represents a cancelled run.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns the guest exit code carried by this error, if any.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Execution { code, .. } => Some(*code),
            Self::Stage { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}

/// Finds the first `ProvisionError` carried by an `anyhow::Error`.
///
/// `downcast_ref` sees through `.context()` layers; the chain walk covers
/// errors that were boxed as a source of another error.
pub(crate) fn find_typed(err: &anyhow::Error) -> Option<&ProvisionError> {
    err.downcast_ref::<ProvisionError>()
        .or_else(|| err.chain().find_map(|cause| cause.downcast_ref::<ProvisionError>()))
}
