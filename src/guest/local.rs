//! Loopback guest channel executing on the current host.
//!
//! Guest paths are translated to live below a root directory, so
//! `/etc/chef/client.rb` becomes `<root>/etc/chef/client.rb` and
//! `C:/chef/client.rb` becomes `<root>/chef/client.rb`. Commands are run
//! through `sh -c` with the root as working directory; their arguments are
//! not rewritten.

use std::fs;
use std::io::{self, Read};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};

use super::{GuestChannel, GuestExitStatus};
use crate::cancel::CancellationToken;
use crate::executor::{CommandExecutor, CommandSpec};
use crate::output::OutputSink;

/// Guest channel backed by a host directory and host processes.
pub struct LocalGuest {
    root: Utf8PathBuf,
    guest_family: String,
    executor: Arc<dyn CommandExecutor>,
    cancel: CancellationToken,
}

impl LocalGuest {
    pub fn new(
        root: Utf8PathBuf,
        guest_family: Option<String>,
        executor: Arc<dyn CommandExecutor>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            root,
            guest_family: guest_family.unwrap_or_else(|| "linuxGuest".to_string()),
            executor,
            cancel,
        }
    }

    /// Maps a guest path to a host path below the root.
    ///
    /// A leading drive letter is dropped; `..` components are rejected.
    pub fn host_path(&self, guest_path: &str) -> Result<Utf8PathBuf> {
        let normalized = guest_path.replace('\\', "/");
        let without_drive = match normalized.as_bytes() {
            [letter, b':', ..] if letter.is_ascii_alphabetic() => &normalized[2..],
            _ => normalized.as_str(),
        };

        let mut mapped = self.root.clone();
        for component in Utf8Path::new(without_drive).components() {
            match component {
                Utf8Component::Normal(part) => mapped.push(part),
                Utf8Component::RootDir | Utf8Component::CurDir | Utf8Component::Prefix(_) => {}
                Utf8Component::ParentDir => {
                    bail!("guest path must not contain '..': {}", guest_path)
                }
            }
        }
        if mapped == self.root {
            bail!("guest path does not name a file: {:?}", guest_path);
        }
        Ok(mapped)
    }
}

impl GuestChannel for LocalGuest {
    fn test_credentials(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to prepare local guest root {}", self.root))
    }

    fn guest_family(&self) -> Result<String> {
        Ok(self.guest_family.clone())
    }

    fn upload(&self, path: &str, content: &mut dyn Read) -> Result<()> {
        let target = self.host_path(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent))?;
        }
        let mut file = fs::File::create(&target)
            .with_context(|| format!("failed to create {}", target))?;
        io::copy(content, &mut file).with_context(|| format!("failed to write {}", target))?;
        tracing::debug!("uploaded {} -> {}", path, target);
        Ok(())
    }

    fn run(&self, command: &str, output: &dyn OutputSink) -> Result<GuestExitStatus> {
        let spec = CommandSpec::shell(command).with_cwd(self.root.clone());
        let result = self.executor.execute(&spec, output, &self.cancel)?;
        match result.code() {
            Some(code) => Ok(GuestExitStatus::from_code(code)),
            None => bail!("command terminated by signal: {}", command),
        }
    }

    fn delete_file(&self, path: &str) -> Result<()> {
        let target = self.host_path(path)?;
        fs::remove_file(&target).with_context(|| format!("failed to delete {}", target))
    }
}
