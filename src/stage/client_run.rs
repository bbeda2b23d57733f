//! The terminal client run.

use anyhow::Result;

use super::StageContext;
use crate::exit_code::{TerminalRetry, run_with_exit_code_policy};
use crate::output::{LogFileSink, OutputSink};
use crate::transfer::run_command;

/// Runs the client under the configured exit-code policy.
///
/// With `log_to_file`, the client's own output goes to
/// `<log_dir>/<node_name>` while progress lines stay on the main sink.
pub fn run_client(ctx: &StageContext<'_>) -> Result<()> {
    let client = ctx.client;
    let command = ctx.os.client_run(client);

    let log_file = if client.log_to_file {
        let sink = LogFileSink::create(ctx.log_dir, &client.node_name)?;
        ctx.sink
            .emit(&format!("Writing client output to {}", sink.path()));
        Some(sink)
    } else {
        None
    };
    let output: &dyn OutputSink = match &log_file {
        Some(sink) => sink,
        None => ctx.sink,
    };

    let policy = client.exit_code_policy();
    let settings = TerminalRetry {
        policy: &policy,
        max_retries: client.max_retries,
        wait: client.wait_for_retry(),
        command: &command,
    };

    run_with_exit_code_policy(&settings, ctx.cancel, ctx.sleeper, ctx.sink, |attempt| {
        if attempt > 0 {
            ctx.sink.emit(&format!(
                "Retrying client run (attempt {}/{})...",
                attempt + 1,
                client.max_retries + 1
            ));
        }
        run_command(ctx.guest, &command, output)
    })
}
