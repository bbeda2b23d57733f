//! Client configuration file bodies.
//!
//! Renders `client.rb` and the `first-boot.json` payload from the resolved
//! client settings. Nothing here touches the guest; the pipeline uploads the
//! results.

use std::fmt::Write as _;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::warn;

use crate::config::ClientConfig;

/// Renders the `client.rb` body.
pub fn render_client_config(client: &ClientConfig) -> String {
    let mut out = String::new();
    // Writing to a String never fails.
    let _ = write_client_config(&mut out, client);
    out
}

fn write_client_config(out: &mut String, client: &ClientConfig) -> std::fmt::Result {
    writeln!(out, "log_location            STDOUT")?;
    writeln!(out, "chef_server_url         {:?}", client.server_url)?;
    writeln!(out, "node_name               {:?}", client.node_name)?;

    if client.use_policyfile {
        writeln!(out)?;
        writeln!(out, "use_policyfile true")?;
        writeln!(out, "policy_group {:?}", client.policy_group.as_deref().unwrap_or_default())?;
        writeln!(out, "policy_name {:?}", client.policy_name.as_deref().unwrap_or_default())?;
    }

    for (var, value) in [("http", &client.http_proxy), ("https", &client.https_proxy)] {
        if let Some(proxy) = value.as_deref().filter(|p| !p.is_empty()) {
            writeln!(out)?;
            writeln!(out, "{}_proxy          {:?}", var, proxy)?;
            writeln!(out, "ENV['{}_proxy'] = {:?}", var, proxy)?;
            writeln!(out, "ENV['{}_PROXY'] = {:?}", var.to_uppercase(), proxy)?;
        }
    }

    if !client.no_proxy.is_empty() {
        let joined = client.no_proxy.join(",");
        writeln!(out)?;
        writeln!(out, "no_proxy          {:?}", joined)?;
        writeln!(out, "ENV['no_proxy'] = {:?}", joined)?;
    }

    if let Some(mode) = client.ssl_verify_mode.as_deref().filter(|m| !m.is_empty()) {
        writeln!(out)?;
        writeln!(out, "ssl_verify_mode  {}", mode)?;
    }

    if client.disable_reporting {
        writeln!(out)?;
        writeln!(out, "enable_reporting false")?;
    }

    if !client.client_options.is_empty() {
        writeln!(out)?;
        for option in &client.client_options {
            writeln!(out, "{}", option)?;
        }
    }
    Ok(())
}

/// Builds the first-run attributes payload.
///
/// The configured run list replaces any `run_list` in the attributes,
/// except in policy mode where no run list is injected.
pub fn first_boot_payload(client: &ClientConfig) -> Result<Vec<u8>> {
    let mut attributes = client.attributes.clone().unwrap_or_default();

    if attributes.contains_key("run_list") {
        warn!(
            "found a 'run_list' in the configured attributes; \
             it will be overwritten by the 'run_list' setting"
        );
    }

    if !client.use_policyfile {
        let run_list = client.run_list.iter().cloned().map(Value::String).collect();
        attributes.insert("run_list".to_string(), Value::Array(run_list));
    }

    serde_json::to_vec(&Value::Object(attributes)).context("failed to encode first-boot.json")
}
