pub mod cancel;
pub mod cleanup;
pub mod cli;
pub mod config;
pub mod connect;
pub mod endpoint;
pub mod error;
pub mod executor;
pub mod exit_code;
pub mod guest;
pub mod materialize;
pub mod os;
pub mod output;
pub mod pipeline;
pub mod retry;
pub mod serde_helpers;
pub mod stage;
pub mod transfer;

use anyhow::{Context, Result};
use camino::Utf8Path;
use tracing::info;
use tracing_subscriber::{FmtSubscriber, filter::LevelFilter};

use crate::cancel::CancellationToken;
use crate::cleanup::CleanupGuard;
use crate::config::ProvisioningConfig;
use crate::endpoint::ManagementClient;
use crate::error::ProvisionError;
use crate::guest::GuestChannel;
use crate::os::{OsFamily, OsProfile};
use crate::output::{OutputSink, TracingSink};
use crate::pipeline::Pipeline;
use crate::retry::Sleeper;
use crate::stage::{Stage, StageContext};
use crate::transfer::{UploadSource, run_checked, upload_source};

pub fn init_logging(log_level: cli::LogLevel) -> Result<()> {
    let filter = match log_level {
        cli::LogLevel::Trace => LevelFilter::TRACE,
        cli::LogLevel::Debug => LevelFilter::DEBUG,
        cli::LogLevel::Info => LevelFilter::INFO,
        cli::LogLevel::Warn => LevelFilter::WARN,
        cli::LogLevel::Error => LevelFilter::ERROR,
    };

    tracing::subscriber::set_global_default(
        FmtSubscriber::builder().with_max_level(filter).finish(),
    )
    .context("failed to set global default tracing subscriber")
}

/// Collaborators of one run.
#[derive(Clone, Copy)]
pub struct RunContext<'a> {
    /// Transport to the management endpoint.
    pub client: &'a dyn ManagementClient,
    /// Progress and warning lines.
    pub sink: &'a dyn OutputSink,
    pub cancel: &'a CancellationToken,
    /// Pause between retry attempts.
    pub sleeper: &'a dyn Sleeper,
    /// Host directory receiving `log_to_file` output.
    pub log_dir: &'a Utf8Path,
}

/// Provisions the configuration client onto the target guest.
///
/// Validates `config`, waits for the management endpoint and the guest
/// agent, selects the OS profile, then runs the stage pipeline. The user key
/// is deleted from the guest exactly once, before the terminal client run or,
/// if a stage fails first, on the way out.
pub fn provision(config: &ProvisioningConfig, rc: &RunContext<'_>) -> Result<(), ProvisionError> {
    config.validate()?;
    let client = config.client()?;

    let (_session, guest) = connect::establish(config, rc.client, rc.cancel, rc.sleeper, rc.sink)?;
    let family = resolve_family(config, guest.as_ref())?;
    let os = OsProfile::select(family, config.guest_username(), client.prevent_sudo);
    info!(os = %family, "selected {} profile", family);

    let cleanup =
        CleanupGuard::delete_user_key(guest.as_ref(), os.user_key_path(&client.user_name), rc.sink);

    let pipeline = Pipeline::new(StageContext {
        client,
        os,
        guest: guest.as_ref(),
        sink: rc.sink,
        cancel: rc.cancel,
        sleeper: rc.sleeper,
        log_dir: rc.log_dir,
    });
    pipeline.run(&cleanup)
}

/// Uploads one source to `destination` on the target guest.
pub fn upload(
    config: &ProvisioningConfig,
    source: &UploadSource,
    destination: &str,
    rc: &RunContext<'_>,
) -> Result<(), ProvisionError> {
    config.validate()?;
    let (_session, guest) = connect::establish(config, rc.client, rc.cancel, rc.sleeper, rc.sink)?;

    rc.sink.emit(&format!("Uploading to {}...", destination));
    upload_source(guest.as_ref(), source, destination)
        .map_err(|e| into_provision_error("upload", e))?;
    rc.sink.emit("File uploaded");
    Ok(())
}

/// What `exec` runs on the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecPayload {
    /// Command lines run in order.
    Commands(Vec<String>),
    /// Host script uploaded to a temporary guest path, run, then deleted.
    Script(camino::Utf8PathBuf),
}

/// Runs commands or a script on the target guest.
///
/// Stops at the first non-zero exit status with `ProvisionError::Execution`.
pub fn exec(
    config: &ProvisioningConfig,
    payload: &ExecPayload,
    rc: &RunContext<'_>,
) -> Result<(), ProvisionError> {
    config.validate()?;
    let (_session, guest) = connect::establish(config, rc.client, rc.cancel, rc.sleeper, rc.sink)?;

    match payload {
        ExecPayload::Commands(commands) => {
            for command in commands {
                rc.cancel.check()?;
                run_checked(guest.as_ref(), command, rc.sink)
                    .map_err(|e| into_provision_error("exec", e))?;
            }
        }
        ExecPayload::Script(script) => {
            let family = resolve_family(config, guest.as_ref())?;
            let prevent_sudo = config.client.as_ref().is_some_and(|c| c.prevent_sudo);
            let os = OsProfile::select(family, config.guest_username(), prevent_sudo);
            let remote = os.script_path(&uuid::Uuid::new_v4().to_string());

            upload_source(guest.as_ref(), &UploadSource::File(script.clone()), &remote)
                .map_err(|e| into_provision_error("exec", e))?;
            let guest_ref = guest.as_ref();
            let remote_path = remote.clone();
            let cleanup = CleanupGuard::new("temporary script", rc.sink, move || {
                guest_ref.delete_file(&remote_path)
            });

            let result = run_checked(guest.as_ref(), &os.script_invocation(&remote), rc.sink)
                .map_err(|e| into_provision_error("exec", e));
            cleanup.run();
            result?;
        }
    }
    Ok(())
}

/// Determines the OS family from the profile or the guest agent.
fn resolve_family(
    config: &ProvisioningConfig,
    guest: &dyn GuestChannel,
) -> Result<OsFamily, ProvisionError> {
    if let Some(family) = config.target.os_type {
        return Ok(family);
    }
    let reported = guest.guest_family().map_err(|e| ProvisionError::Connectivity {
        target: "guest agent".to_string(),
        attempts: 1,
        message: format!("failed to read guest OS family: {:#}", e),
    })?;
    OsFamily::from_guest_family(&reported)
}

/// Returns a bare `ProvisionError` unchanged; wraps anything else as a
/// failure of `operation`.
fn into_provision_error(operation: &str, err: anyhow::Error) -> ProvisionError {
    match err.downcast::<ProvisionError>() {
        Ok(typed) => typed,
        Err(err) => ProvisionError::from_stage(operation, err),
    }
}

fn load(file: &Utf8Path) -> Result<ProvisioningConfig, ProvisionError> {
    let config = crate::config::load_profile(file)?;
    info!("loaded profile {}", file);
    Ok(config)
}

pub fn run_provision(
    opts: &cli::ProvisionArgs,
    cancel: &CancellationToken,
) -> Result<(), ProvisionError> {
    let config = load(&opts.common.file)?;
    let client = config.transport.as_client(cancel, opts.dry_run);
    provision(
        &config,
        &RunContext {
            client: client.as_ref(),
            sink: &TracingSink,
            cancel,
            sleeper: cancel,
            log_dir: &opts.log_dir,
        },
    )
}

pub fn run_validate(opts: &cli::ValidateArgs) -> Result<(), ProvisionError> {
    let config = load(&opts.common.file)?;
    config.validate()?;

    let stages = match &config.client {
        Some(_) => {
            let client = config.client()?;
            info!(
                max_retries = client.max_retries,
                retry_codes = ?client.exit_code_policy().retry_codes(),
                "client run retry settings"
            );
            Stage::ALL
                .iter()
                .filter(|s| s.should_run(client))
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        }
        None => "none (no client section)".to_string(),
    };
    info!(
        "validation successful: vm {} on {} ({} transport); stages: {}",
        config.target.vm_name,
        config.host(),
        config.transport.name(),
        stages
    );
    Ok(())
}

pub fn run_upload(opts: &cli::UploadArgs, cancel: &CancellationToken) -> Result<(), ProvisionError> {
    let config = load(&opts.common.file)?;
    let source = match (&opts.source, &opts.content) {
        (Some(path), None) => UploadSource::from_path(path)?,
        (None, Some(content)) => UploadSource::Content(content.clone()),
        _ => {
            return Err(ProvisionError::Validation(
                "must provide exactly one of 'source' or 'content'".to_string(),
            ));
        }
    };
    let client = config.transport.as_client(cancel, opts.dry_run);
    upload(
        &config,
        &source,
        &opts.destination,
        &RunContext {
            client: client.as_ref(),
            sink: &TracingSink,
            cancel,
            sleeper: cancel,
            log_dir: Utf8Path::new("logfiles"),
        },
    )
}

pub fn run_exec(opts: &cli::ExecArgs, cancel: &CancellationToken) -> Result<(), ProvisionError> {
    let config = load(&opts.common.file)?;
    let payload = match &opts.script {
        Some(script) => ExecPayload::Script(script.clone()),
        None if !opts.commands.is_empty() => ExecPayload::Commands(opts.commands.clone()),
        None => {
            return Err(ProvisionError::Validation(
                "must provide one of 'command' or 'script'".to_string(),
            ));
        }
    };
    let client = config.transport.as_client(cancel, opts.dry_run);
    exec(
        &config,
        &payload,
        &RunContext {
            client: client.as_ref(),
            sink: &TracingSink,
            cancel,
            sleeper: cancel,
            log_dir: Utf8Path::new("logfiles"),
        },
    )
}
