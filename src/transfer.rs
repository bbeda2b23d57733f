//! File and command transfer helpers on top of a [`GuestChannel`].
//!
//! Directory sources are packaged into a single tar archive before upload.
//! Only regular files directly inside the directory are archived; entry
//! name, size, mode and modification time are preserved.

use std::fs;
use std::io::Cursor;
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};

use crate::error::ProvisionError;
use crate::guest::{GuestChannel, GuestExitStatus};
use crate::output::OutputSink;

/// What to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadSource {
    /// A host file, streamed as-is.
    File(Utf8PathBuf),
    /// A host directory, archived (non-recursively) to a tar stream.
    Directory(Utf8PathBuf),
    /// Inline text content.
    Content(String),
}

impl UploadSource {
    /// Classifies a host path as file or directory.
    pub fn from_path(path: &Utf8Path) -> Result<Self, ProvisionError> {
        let metadata = fs::metadata(path).map_err(|e| ProvisionError::io(path.as_str(), e))?;
        if metadata.is_dir() {
            Ok(Self::Directory(path.to_owned()))
        } else {
            Ok(Self::File(path.to_owned()))
        }
    }
}

/// Archives the regular files directly inside `dir` into a tar stream.
///
/// Entries are sorted by name; subdirectories are skipped.
pub fn archive_directory(dir: &Utf8Path) -> Result<Vec<u8>> {
    let mut entries = Vec::new();
    for entry in dir
        .read_dir_utf8()
        .with_context(|| format!("failed to read directory {}", dir))?
    {
        let entry = entry.with_context(|| format!("failed to read entry in {}", dir))?;
        let metadata = entry
            .metadata()
            .with_context(|| format!("failed to read metadata of {}", entry.path()))?;
        if metadata.is_file() {
            entries.push((entry.file_name().to_string(), entry.path().to_owned(), metadata));
        }
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut builder = tar::Builder::new(Vec::new());
    for (name, path, metadata) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(metadata.len());
        header.set_mode(file_mode(&metadata));
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or_default();
        header.set_mtime(mtime);
        header.set_entry_type(tar::EntryType::Regular);

        let file = fs::File::open(&path).with_context(|| format!("failed to open {}", path))?;
        builder
            .append_data(&mut header, &name, file)
            .with_context(|| format!("failed to archive {}", path))?;
    }
    builder.into_inner().context("failed to finish tar archive")
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// Uploads `source` to `destination` on the guest.
pub fn upload_source(guest: &dyn GuestChannel, source: &UploadSource, destination: &str) -> Result<()> {
    match source {
        UploadSource::File(path) => {
            let mut file =
                fs::File::open(path).with_context(|| format!("failed to open {}", path))?;
            guest
                .upload(destination, &mut file)
                .with_context(|| format!("uploading {} failed", path))
        }
        UploadSource::Directory(path) => {
            let archive = archive_directory(path)?;
            tracing::debug!("archived {} ({} bytes)", path, archive.len());
            guest
                .upload(destination, &mut Cursor::new(archive))
                .with_context(|| format!("uploading archive of {} failed", path))
        }
        UploadSource::Content(text) => guest
            .upload(destination, &mut text.as_bytes())
            .with_context(|| format!("uploading content to {} failed", destination)),
    }
}

/// Runs `command` and reports every attempt on `sink`.
///
/// Returns the exit status whether or not it is zero.
pub fn run_command(
    guest: &dyn GuestChannel,
    command: &str,
    sink: &dyn OutputSink,
) -> Result<GuestExitStatus> {
    sink.emit(&format!("[cmd] {}", command));
    guest.run(command, sink)
}

/// Runs `command`, turning a non-zero exit status into
/// `ProvisionError::Execution`.
pub fn run_checked(guest: &dyn GuestChannel, command: &str, sink: &dyn OutputSink) -> Result<()> {
    let status = run_command(guest, command, sink)?;
    if !status.success() {
        return Err(ProvisionError::Execution {
            command: command.to_string(),
            code: status.code(),
        }
        .into());
    }
    Ok(())
}
