//! Guest channel that only logs what it would do.

use std::io::{self, Read};

use anyhow::{Context, Result};
use tracing::info;

use super::{GuestChannel, GuestExitStatus};
use crate::output::OutputSink;

/// Default OS family reported when none is configured.
pub const DEFAULT_GUEST_FAMILY: &str = "linuxGuest";

/// Exit status the record lookup commands use for "not found".
const NOT_FOUND: i32 = 100;

/// Guest channel for `--dry-run`: accepts every credential, logs every
/// upload and command, and reports exit status 0.
///
/// Record lookups (`knife ... show`) report "not found", so a dry run plans
/// against an empty server.
#[derive(Debug, Clone)]
pub struct DryRunGuest {
    vm_name: String,
    guest_family: String,
}

impl DryRunGuest {
    pub fn new(vm_name: impl Into<String>, guest_family: Option<String>) -> Self {
        Self {
            vm_name: vm_name.into(),
            guest_family: guest_family.unwrap_or_else(|| DEFAULT_GUEST_FAMILY.to_string()),
        }
    }
}

impl GuestChannel for DryRunGuest {
    fn test_credentials(&self) -> Result<()> {
        info!(vm = %self.vm_name, "dry run: guest credentials accepted");
        Ok(())
    }

    fn guest_family(&self) -> Result<String> {
        Ok(self.guest_family.clone())
    }

    fn upload(&self, path: &str, content: &mut dyn Read) -> Result<()> {
        let bytes = io::copy(content, &mut io::sink())
            .with_context(|| format!("failed to read upload content for {}", path))?;
        info!(vm = %self.vm_name, "dry run: upload {} ({} bytes)", path, bytes);
        Ok(())
    }

    fn run(&self, command: &str, _output: &dyn OutputSink) -> Result<GuestExitStatus> {
        info!(vm = %self.vm_name, "dry run: {}", command);
        if command.contains(" show ") {
            return Ok(GuestExitStatus::from_code(NOT_FOUND));
        }
        Ok(GuestExitStatus::SUCCESS)
    }

    fn delete_file(&self, path: &str) -> Result<()> {
        info!(vm = %self.vm_name, "dry run: delete {}", path);
        Ok(())
    }
}
