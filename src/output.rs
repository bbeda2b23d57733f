//! Progress and warning reporting.
//!
//! Every stage transition, retry attempt and cleanup warning is reported
//! through an [`OutputSink`]. Emission is best-effort: sinks never fail
//! the run.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::{LazyLock, Mutex, PoisonError};

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;

/// Destination for human-readable progress lines.
pub trait OutputSink: Send + Sync {
    /// Emits one line of output.
    fn emit(&self, line: &str);

    /// Emits one line of diagnostic (stderr) output from a guest process.
    fn emit_stderr(&self, line: &str) {
        self.emit(line);
    }
}

/// Sink that forwards every line to `tracing` at INFO level.
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn emit(&self, line: &str) {
        tracing::info!("{}", line);
    }

    fn emit_stderr(&self, line: &str) {
        tracing::warn!("{}", line);
    }
}

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]+m").expect("ANSI escape pattern is valid"));

/// Removes colour escapes and turns carriage returns into newlines.
pub fn sanitize_log_line(line: &str) -> String {
    ANSI_ESCAPE.replace_all(line, "").replace('\r', "\n")
}

/// Sink that appends lines to a log file on the host.
///
/// Used for the terminal client run when `log_to_file` is enabled, so the
/// (often very long) client output does not flood the console.
#[derive(Debug)]
pub struct LogFileSink {
    path: Utf8PathBuf,
    lock: Mutex<()>,
}

impl LogFileSink {
    /// Creates (or truncates) `dir/<name>` and returns a sink appending to it.
    pub fn create(dir: &Utf8Path, name: &str) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("error creating logfile directory {}", dir))?;
        let path = dir.join(name);
        fs::File::create(&path).with_context(|| format!("error creating logfile {}", path))?;
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    /// Returns the path of the log file.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        let mut text = sanitize_log_line(line);
        if !text.ends_with('\n') {
            text.push('\n');
        }
        file.write_all(text.as_bytes())?;
        file.sync_data()
    }
}

impl OutputSink for LogFileSink {
    fn emit(&self, line: &str) {
        if let Err(e) = self.append(line) {
            tracing::warn!(path = %self.path, "error writing output to logfile: {}", e);
        }
    }
}
