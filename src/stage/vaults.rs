//! Vault access for the new client.

use anyhow::Result;

use super::StageContext;

/// Installs the vault gem and grants the client access to each vault item.
///
/// When the client is being recreated, the old client is removed from every
/// item first; its keys can no longer decrypt them.
pub fn configure_vaults(ctx: &StageContext<'_>) -> Result<()> {
    let Some(vaults) = ctx.client.vaults() else {
        return Ok(());
    };
    let node = &ctx.client.node_name;
    let user = &ctx.client.user_name;

    ctx.run(&ctx.os.vault_gem_install())?;

    if ctx.client.recreate_client {
        for (vault, items) in vaults {
            for item in items.items() {
                ctx.run(&ctx.os.vault_remove(vault, item, node, user))?;
            }
        }
    }

    for (vault, items) in vaults {
        for item in items.items() {
            ctx.run(&ctx.os.vault_update(vault, item, node, user))?;
        }
    }
    Ok(())
}
