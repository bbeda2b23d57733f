//! Provisioning stages.
//!
//! The stage list is fixed:
//!
//! 1. **install-runtime**: install the client (unless `skip_install`)
//! 2. **upload-configuration**: keys, hints, `client.rb`, `first-boot.json`
//! 3. **fetch-certificates**: trust the server certificate (optional)
//! 4. **register-identity**: reconcile node/client records and create a client
//! 5. **configure-vaults**: grant the new client access to vault items (optional)
//! 6. **cleanup-sensitive-artifacts**: delete the user key from the guest
//! 7. **run-client**: the terminal client run, under the exit-code policy

pub mod client_run;
pub mod configure;
pub mod install;
pub mod register;
pub mod vaults;

use anyhow::Result;
use camino::Utf8Path;
use strum::Display;

use crate::cancel::CancellationToken;
use crate::cleanup::CleanupGuard;
use crate::config::ClientConfig;
use crate::guest::GuestChannel;
use crate::os::OsProfile;
use crate::output::OutputSink;
use crate::retry::Sleeper;

/// One ordered unit of provisioning work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Stage {
    InstallRuntime,
    UploadConfiguration,
    FetchCertificates,
    RegisterIdentity,
    ConfigureVaults,
    CleanupSensitiveArtifacts,
    RunClient,
}

impl Stage {
    /// Every stage, in execution order.
    pub const ALL: [Stage; 7] = [
        Stage::InstallRuntime,
        Stage::UploadConfiguration,
        Stage::FetchCertificates,
        Stage::RegisterIdentity,
        Stage::ConfigureVaults,
        Stage::CleanupSensitiveArtifacts,
        Stage::RunClient,
    ];

    /// Returns true if the stage runs for `client`.
    pub fn should_run(&self, client: &ClientConfig) -> bool {
        match self {
            Stage::InstallRuntime => !client.skip_install,
            Stage::FetchCertificates => !client.skip_register && client.fetch_chef_certificates,
            Stage::RegisterIdentity => !client.skip_register,
            Stage::ConfigureVaults => client.vaults().is_some(),
            Stage::UploadConfiguration | Stage::CleanupSensitiveArtifacts | Stage::RunClient => {
                true
            }
        }
    }

    /// Progress line emitted when the stage starts.
    pub fn banner(&self) -> &'static str {
        match self {
            Stage::InstallRuntime => "Installing client runtime...",
            Stage::UploadConfiguration => "Creating configuration files...",
            Stage::FetchCertificates => "Fetching server certificates...",
            Stage::RegisterIdentity => "Generating the client key...",
            Stage::ConfigureVaults => "Configuring vaults...",
            Stage::CleanupSensitiveArtifacts => "Removing sensitive artifacts...",
            Stage::RunClient => "Starting initial client run...",
        }
    }

    pub(crate) fn execute(&self, ctx: &StageContext<'_>, cleanup: &CleanupGuard<'_>) -> Result<()> {
        match self {
            Stage::InstallRuntime => install::install_runtime(ctx),
            Stage::UploadConfiguration => configure::upload_configuration(ctx),
            Stage::FetchCertificates => register::fetch_certificates(ctx),
            Stage::RegisterIdentity => register::register_identity(ctx),
            Stage::ConfigureVaults => vaults::configure_vaults(ctx),
            Stage::CleanupSensitiveArtifacts => {
                cleanup.run();
                Ok(())
            }
            Stage::RunClient => {
                cleanup.run();
                client_run::run_client(ctx)
            }
        }
    }
}

/// Everything a stage needs; borrowed for the duration of one run.
pub struct StageContext<'a> {
    pub client: &'a ClientConfig,
    pub os: OsProfile,
    pub guest: &'a dyn GuestChannel,
    pub sink: &'a dyn OutputSink,
    pub cancel: &'a CancellationToken,
    /// Pause used between terminal-run attempts.
    pub sleeper: &'a dyn Sleeper,
    /// Host directory receiving `log_to_file` output.
    pub log_dir: &'a Utf8Path,
}

impl StageContext<'_> {
    /// Runs a command, failing on a non-zero exit status.
    pub(crate) fn run(&self, command: &str) -> Result<()> {
        self.cancel.check()?;
        crate::transfer::run_checked(self.guest, command, self.sink)
    }

    /// Runs a command and reports whether it exited with status 0.
    pub(crate) fn probe(&self, command: &str) -> Result<bool> {
        self.cancel.check()?;
        Ok(crate::transfer::run_command(self.guest, command, self.sink)?.success())
    }

    pub(crate) fn upload(&self, path: &str, content: &[u8]) -> Result<()> {
        self.cancel.check()?;
        let mut reader = content;
        self.guest.upload(path, &mut reader)
    }
}
