use std::process::ExitCode;
use std::thread;

use anyhow::{Context, Result};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{error, warn};

use guestprov::cancel::CancellationToken;
use guestprov::cli;
use guestprov::error::ProvisionError;

const EXIT_FAILURE: u8 = 1;
const EXIT_CANCELLED: u8 = 130;

/// Cancels `cancel` on SIGINT or SIGTERM.
fn install_signal_handler(cancel: CancellationToken) -> Result<()> {
    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("failed to register signal handlers")?;
    thread::Builder::new()
        .name("signal-handler".to_string())
        .spawn(move || {
            for signal in signals.forever() {
                warn!(signal, "received signal, cancelling run");
                cancel.cancel();
            }
        })
        .context("failed to spawn signal handler thread")?;
    Ok(())
}

fn run(command: &cli::Commands, cancel: &CancellationToken) -> Result<(), ProvisionError> {
    match command {
        cli::Commands::Provision(opts) => guestprov::run_provision(opts, cancel),
        cli::Commands::Validate(opts) => guestprov::run_validate(opts),
        cli::Commands::Upload(opts) => guestprov::run_upload(opts, cancel),
        cli::Commands::Exec(opts) => guestprov::run_exec(opts, cancel),
        cli::Commands::Completions(opts) => {
            cli::write_completions(opts.shell, &mut std::io::stdout());
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{:#}", e);
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    if let Err(e) = guestprov::init_logging(args.command.log_level()) {
        eprintln!("{:#}", e);
        return ExitCode::from(EXIT_FAILURE);
    }

    let cancel = CancellationToken::new();
    if let Err(e) = install_signal_handler(cancel.clone()) {
        error!("{:#}", e);
        return ExitCode::from(EXIT_FAILURE);
    }

    match run(&args.command, &cancel) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_cancelled() => {
            error!("{}", e);
            ExitCode::from(EXIT_CANCELLED)
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
