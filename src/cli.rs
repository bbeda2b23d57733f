use anyhow::Result;
use camino::Utf8PathBuf;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install, register and run the configuration client on the guest
    Provision(ProvisionArgs),

    /// Validate the given YAML profile
    Validate(ValidateArgs),

    /// Upload a file, directory or inline content to the guest
    Upload(UploadArgs),

    /// Run commands or a script on the guest
    Exec(ExecArgs),

    /// Generate shell completion scripts
    Completions(CompletionsArgs),
}

impl Commands {
    /// Returns the log level requested by the subcommand.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Commands::Provision(opts) => opts.common.log_level,
            Commands::Validate(opts) => opts.common.log_level,
            Commands::Upload(opts) => opts.common.log_level,
            Commands::Exec(opts) => opts.common.log_level,
            Commands::Completions(_) => LogLevel::Warn,
        }
    }
}

/// Arguments shared by every profile-driven subcommand.
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// Path to the YAML file defining the profile
    #[arg(short, long, default_value = "profile.yaml")]
    pub file: Utf8PathBuf,

    /// Set the log level
    #[arg(short, long, default_value = "info")]
    pub log_level: LogLevel,
}

#[derive(Args, Debug)]
pub struct ProvisionArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Do not touch the guest, just show what would be done
    #[arg(long)]
    pub dry_run: bool,

    /// Directory receiving client output when `log_to_file` is enabled
    #[arg(long, default_value = "logfiles")]
    pub log_dir: Utf8PathBuf,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Host file or directory to upload (directories are sent as a tar archive)
    #[arg(long, conflicts_with = "content", required_unless_present = "content")]
    pub source: Option<Utf8PathBuf>,

    /// Inline content to upload
    #[arg(long)]
    pub content: Option<String>,

    /// Destination path on the guest
    #[arg(long)]
    pub destination: String,

    /// Do not touch the guest, just show what would be done
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Command line to run on the guest (repeatable; run in order)
    #[arg(long = "command", conflicts_with = "script", required_unless_present = "script")]
    pub commands: Vec<String>,

    /// Host script to upload and run on the guest
    #[arg(long)]
    pub script: Option<Utf8PathBuf>,

    /// Do not touch the guest, just show what would be done
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

/// Represents log levels for controlling the verbosity of logging output.
///
/// This enum maps directly to the log levels used by the `tracing` crate.
/// For example, specifying `--log-level debug` enables debug-level output.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

pub fn parse_args() -> Result<Cli> {
    Ok(Cli::parse())
}

/// Writes the completion script for `shell` to `out`.
pub fn write_completions(shell: clap_complete::Shell, out: &mut dyn std::io::Write) {
    let mut command = Cli::command();
    let name = command.get_name().to_string();
    clap_complete::generate(shell, &mut command, name, out);
}
