//! Certificate fetch and client identity registration.

use anyhow::{Result, bail};

use super::StageContext;

/// Fetches and trusts the server certificate.
pub fn fetch_certificates(ctx: &StageContext<'_>) -> Result<()> {
    ctx.run(&ctx.os.fetch_certificates())
}

/// Reconciles existing node and client records and creates a new client.
///
/// An existing client is fatal unless `recreate_client` is set; otherwise
/// any existing node and client records are deleted first, so repeated
/// runs converge on exactly one client identity.
pub fn register_identity(ctx: &StageContext<'_>) -> Result<()> {
    let node = &ctx.client.node_name;
    let user = &ctx.client.user_name;

    let node_exists = ctx.probe(&ctx.os.node_show(node, user))?;
    let client_exists = ctx.probe(&ctx.os.client_show(node, user))?;
    tracing::debug!(node_exists, client_exists, "existing records for {}", node);

    if client_exists && !ctx.client.recreate_client {
        bail!(
            "client {:?} already exists, set recreate_client=true to automatically recreate the client",
            node
        );
    }

    if node_exists {
        ctx.run(&ctx.os.node_delete(node, user))?;
    }
    if client_exists {
        ctx.run(&ctx.os.client_delete(node, user))?;
    }

    ctx.run(&ctx.os.client_create(node, user))
}
