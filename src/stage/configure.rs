//! Configuration directory preparation and uploads.

use anyhow::{Context, Result};

use super::StageContext;
use crate::materialize::{first_boot_payload, render_client_config};
use crate::os::{CLIENT_RB, FIRST_BOOT, SECRET_KEY};
use crate::transfer::{UploadSource, upload_source};

/// Creates the configuration directory and uploads the user key, the
/// optional secret, ohai hints, `client.rb` and `first-boot.json`.
pub fn upload_configuration(ctx: &StageContext<'_>) -> Result<()> {
    let conf_dir = ctx.os.conf_dir();
    for command in ctx.os.prepare_dir(conf_dir) {
        ctx.run(&command)?;
    }

    if !ctx.client.ohai_hints.is_empty() {
        upload_ohai_hints(ctx)?;
    }

    let key_path = ctx.os.user_key_path(&ctx.client.user_name);
    ctx.upload(&key_path, ctx.client.user_key.as_bytes())
        .context("uploading user key failed")?;

    if let Some(secret) = ctx.client.secret_key.as_deref().filter(|s| !s.is_empty()) {
        ctx.upload(&ctx.os.conf_path(SECRET_KEY), secret.as_bytes())
            .with_context(|| format!("uploading {} failed", SECRET_KEY))?;
    }

    let client_rb = render_client_config(ctx.client);
    ctx.upload(&ctx.os.conf_path(CLIENT_RB), client_rb.as_bytes())
        .with_context(|| format!("uploading {} failed", CLIENT_RB))?;

    let first_boot = first_boot_payload(ctx.client)?;
    ctx.upload(&ctx.os.conf_path(FIRST_BOOT), &first_boot)
        .with_context(|| format!("uploading {} failed", FIRST_BOOT))?;

    for command in ctx.os.seal_dir(conf_dir) {
        ctx.run(&command)?;
    }
    Ok(())
}

fn upload_ohai_hints(ctx: &StageContext<'_>) -> Result<()> {
    let hints_dir = ctx.os.hints_dir();
    for command in ctx.os.prepare_dir(&hints_dir) {
        ctx.run(&command)?;
    }

    for hint in &ctx.client.ohai_hints {
        let name = hint
            .file_name()
            .with_context(|| format!("ohai hint has no file name: {}", hint))?;
        ctx.cancel.check()?;
        let destination = format!("{}/{}", hints_dir, name);
        upload_source(ctx.guest, &UploadSource::File(hint.clone()), &destination)?;
    }

    for command in ctx.os.seal_dir(&hints_dir) {
        ctx.run(&command)?;
    }
    Ok(())
}
