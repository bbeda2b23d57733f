//! Client runtime installation.

use anyhow::{Context, Result};

use super::StageContext;

/// Uploads the OS profile's installer files, then runs its install commands.
pub fn install_runtime(ctx: &StageContext<'_>) -> Result<()> {
    let plan = ctx.os.install_plan(ctx.client);

    for (path, content) in &plan.uploads {
        ctx.upload(path, content.as_bytes())
            .with_context(|| format!("uploading installer script {} failed", path))?;
    }
    for command in &plan.commands {
        ctx.run(command).context("client installation failed")?;
    }
    Ok(())
}
