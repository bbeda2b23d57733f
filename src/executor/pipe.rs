//! Internal utilities for streaming command output to an output sink.
//!
//! This module handles reading from stdout/stderr pipes and forwarding
//! the output line by line while the command runs.

use std::io::{BufRead, BufReader, Read};

use crate::output::OutputSink;

/// Type of output stream.
#[derive(Clone, Copy)]
pub(super) enum StreamType {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// Extracts a human-readable message from a thread panic.
pub(super) fn panic_message(err: &(dyn std::any::Any + Send)) -> &str {
    err.downcast_ref::<&str>()
        .copied()
        .or_else(|| err.downcast_ref::<String>().map(|s| s.as_str()))
        .unwrap_or("unknown panic")
}

/// Reads from a pipe and forwards each line to `output`.
///
/// - stdout goes to [`OutputSink::emit`], stderr to [`OutputSink::emit_stderr`]
/// - Binary data uses lossy UTF-8 conversion
/// - I/O errors stop reading but don't fail command execution
/// - `None` pipe logs an error and returns (unexpected if `Stdio::piped()` was set)
pub(super) fn read_pipe_to_sink<R: Read>(
    pipe: Option<R>,
    stream_type: StreamType,
    output: &dyn OutputSink,
) {
    let Some(pipe) = pipe else {
        tracing::error!(
            stream = %stream_type,
            "pipe was None (unexpected: Stdio::piped() was set), no output will be captured"
        );
        return;
    };

    let mut reader = BufReader::new(pipe);
    let mut line_buf = Vec::new();

    loop {
        line_buf.clear();
        match reader.read_until(b'\n', &mut line_buf) {
            Ok(0) => break, // EOF
            Ok(_) => {
                let content = line_buf.strip_suffix(b"\n").unwrap_or(&line_buf);
                forward_line(content, stream_type, output);
            }
            Err(e) => {
                tracing::error!(stream = %stream_type, error = %e, "I/O error, stopping read");
                break;
            }
        }
    }
}

/// Trailing CR is trimmed to handle CRLF line endings.
fn forward_line(line: &[u8], stream_type: StreamType, output: &dyn OutputSink) {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim_end_matches('\r');
    match stream_type {
        StreamType::Stdout => output.emit(trimmed),
        StreamType::Stderr => output.emit_stderr(trimmed),
    }
}
