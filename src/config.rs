//! Profile configuration for guestprov.
//!
//! A profile is a YAML document describing how to reach the management
//! endpoint, which VM and guest account to use, which transport to speak,
//! and (for `provision`) how to install and run the configuration client.
//!
//! Loading goes through three steps, all of which report structured errors
//! instead of aborting:
//! 1. decode the YAML into typed structures,
//! 2. fill credentials and readiness tunables from the environment and
//!    normalise values (server URL, SSL verify mode, JSON-encoded fields),
//! 3. [`ProvisioningConfig::validate`] the result before any network call.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use tracing::debug;

use crate::cancel::CancellationToken;
use crate::endpoint::{DryRunClient, LocalClient, ManagementClient};
use crate::error::ProvisionError;
use crate::executor::RealCommandExecutor;
use crate::exit_code::ExitCodePolicy;
use crate::os::OsFamily;
use crate::retry::RetryPolicy;
use crate::serde_helpers::{VaultMap, parse_vault_json};

pub const ENV_HOST: &str = "VC_VSPHERE_HOST";
pub const ENV_USERNAME: &str = "VC_VSPHERE_USERNAME";
pub const ENV_PASSWORD: &str = "VC_VSPHERE_PASSWORD";
pub const ENV_GUEST_USERNAME: &str = "VC_VSPHERE_GUEST_USERNAME";
pub const ENV_GUEST_PASSWORD: &str = "VC_VSPHERE_GUEST_PASSWORD";
pub const ENV_TIMEOUT: &str = "VC_RX_TIMEOUT";
pub const ENV_INTERVAL: &str = "VC_RX_INTERVAL";

const DEFAULT_CONNECT_INTERVAL_SECS: u64 = 10;
const DEFAULT_CONNECT_ATTEMPTS: u32 = 4;
const DEFAULT_GUEST_TIMEOUT_SECS: u64 = 300;
const DEFAULT_GUEST_INTERVAL_SECS: u64 = 15;
const DEFAULT_WAIT_FOR_RETRY_SECS: u64 = 30;

/// The fully resolved parameters of one provisioning run.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvisioningConfig {
    /// Management endpoint connection settings.
    pub connection: ConnectionConfig,
    /// Target VM and guest account.
    pub target: TargetConfig,
    /// Transport used to reach the management endpoint and guest agent.
    pub transport: TransportConfig,
    /// Configuration-management client settings (required by `provision`).
    #[serde(default)]
    pub client: Option<ClientConfig>,
}

/// Management endpoint connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Endpoint host name (falls back to `VC_VSPHERE_HOST`).
    #[serde(default)]
    pub host: Option<String>,
    /// Endpoint user (falls back to `VC_VSPHERE_USERNAME`).
    #[serde(default)]
    pub username: Option<String>,
    /// Endpoint password (falls back to `VC_VSPHERE_PASSWORD`).
    #[serde(default)]
    pub password: Option<String>,
    /// Skip TLS certificate verification of the endpoint.
    #[serde(default = "default_true")]
    pub insecure: bool,
    /// Datacenter the VM lives in; the endpoint default when absent.
    #[serde(default)]
    pub datacenter: Option<String>,
    /// Seconds between readiness attempts.
    #[serde(default = "default_connect_interval")]
    pub retry_interval: u64,
    /// Total readiness attempts before giving up.
    #[serde(default = "default_connect_attempts")]
    pub max_attempts: u32,
}

/// Target VM and guest account.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    /// Name of the VM to provision.
    pub vm_name: String,
    /// Guest account user (falls back to `VC_VSPHERE_GUEST_USERNAME`).
    #[serde(default)]
    pub guest_username: Option<String>,
    /// Guest account password (falls back to `VC_VSPHERE_GUEST_PASSWORD`).
    #[serde(default)]
    pub guest_password: Option<String>,
    /// Seconds to wait for the guest agent (falls back to `VC_RX_TIMEOUT`, then 300).
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Seconds between guest agent probes (falls back to `VC_RX_INTERVAL`, then 15).
    #[serde(default)]
    pub interval: Option<u64>,
    /// Explicit OS family; probed from the guest agent when absent.
    #[serde(default)]
    pub os_type: Option<OsFamily>,
}

/// Transport backend configuration.
///
/// The `type` field in YAML determines which variant is used.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case", deny_unknown_fields)]
pub enum TransportConfig {
    /// Log every operation; nothing leaves this process.
    DryRun {
        /// OS family string the simulated guest agent reports.
        #[serde(default)]
        guest_family: Option<String>,
    },
    /// Loopback transport executing on this host below `root`.
    Local {
        /// Directory standing in for the guest filesystem root.
        root: Utf8PathBuf,
        /// OS family string the loopback guest reports.
        #[serde(default)]
        guest_family: Option<String>,
    },
}

impl TransportConfig {
    /// Returns the transport name as written in YAML.
    pub fn name(&self) -> &'static str {
        match self {
            TransportConfig::DryRun { .. } => "dry-run",
            TransportConfig::Local { .. } => "local",
        }
    }

    /// Returns a boxed management client for this transport.
    ///
    /// `force_dry_run` selects the dry-run transport regardless of `type`.
    pub fn as_client(
        &self,
        cancel: &CancellationToken,
        force_dry_run: bool,
    ) -> Box<dyn ManagementClient> {
        match self {
            TransportConfig::DryRun { guest_family } => {
                Box::new(DryRunClient::new(guest_family.clone()))
            }
            TransportConfig::Local { guest_family, .. } if force_dry_run => {
                Box::new(DryRunClient::new(guest_family.clone()))
            }
            TransportConfig::Local { root, guest_family } => Box::new(LocalClient::new(
                root.clone(),
                guest_family.clone(),
                Arc::new(RealCommandExecutor),
                cancel.clone(),
            )),
        }
    }
}

/// Configuration-management client settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub node_name: String,
    pub server_url: String,
    pub user_name: String,
    pub user_key: String,

    /// First-run node attributes as a YAML mapping.
    #[serde(default)]
    pub attributes: Option<serde_json::Map<String, serde_json::Value>>,
    /// First-run node attributes as a JSON object string.
    #[serde(default)]
    pub attributes_json: Option<String>,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default)]
    pub client_options: Vec<String>,
    #[serde(default)]
    pub disable_reporting: bool,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default)]
    pub fetch_chef_certificates: bool,
    /// Installer download URL used by the Windows install script.
    #[serde(default)]
    pub installer_url: Option<String>,
    #[serde(default)]
    pub log_to_file: bool,
    #[serde(default)]
    pub use_policyfile: bool,
    #[serde(default)]
    pub policy_group: Option<String>,
    #[serde(default)]
    pub policy_name: Option<String>,
    #[serde(default)]
    pub http_proxy: Option<String>,
    #[serde(default)]
    pub https_proxy: Option<String>,
    #[serde(default)]
    pub no_proxy: Vec<String>,
    /// Extra terminal client runs after the first one.
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub named_run_list: Option<String>,
    /// Host-side hint files uploaded to the guest's ohai hints directory.
    #[serde(default)]
    pub ohai_hints: Vec<Utf8PathBuf>,
    #[serde(default)]
    pub prevent_sudo: bool,
    #[serde(default)]
    pub recreate_client: bool,
    /// Replaces (never extends) the default retry set when present.
    #[serde(default)]
    pub retry_on_exit_code: Option<Vec<i32>>,
    #[serde(default)]
    pub run_list: Vec<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub skip_install: bool,
    #[serde(default)]
    pub skip_register: bool,
    #[serde(default)]
    pub ssl_verify_mode: Option<String>,
    /// Vault name to item(s) as a YAML mapping.
    #[serde(default)]
    pub vaults: Option<VaultMap>,
    /// Vault name to item(s) as a JSON object string.
    #[serde(default)]
    pub vault_json: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    /// Seconds to wait between terminal client runs.
    #[serde(default = "default_wait_for_retry")]
    pub wait_for_retry: u64,
}

fn default_true() -> bool {
    true
}

fn default_connect_interval() -> u64 {
    DEFAULT_CONNECT_INTERVAL_SECS
}

fn default_connect_attempts() -> u32 {
    DEFAULT_CONNECT_ATTEMPTS
}

fn default_channel() -> String {
    "stable".to_string()
}

fn default_environment() -> String {
    "_default".to_string()
}

fn default_wait_for_retry() -> u64 {
    DEFAULT_WAIT_FOR_RETRY_SECS
}

impl ProvisioningConfig {
    /// Parses a profile from YAML text without touching the environment.
    pub fn from_yaml(yaml: &str) -> Result<Self, ProvisionError> {
        serde_yaml::from_str(yaml).map_err(|e| ProvisionError::Config(format!("YAML parse error: {}", e)))
    }

    /// Fills unset credentials and tunables from `lookup` (normally the
    /// process environment) and normalises derived values.
    ///
    /// Relative ohai hint paths are resolved against `base_dir`.
    pub fn resolve(
        &mut self,
        base_dir: &Utf8Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ProvisionError> {
        fill(&mut self.connection.host, ENV_HOST, &lookup);
        fill(&mut self.connection.username, ENV_USERNAME, &lookup);
        fill(&mut self.connection.password, ENV_PASSWORD, &lookup);
        fill(&mut self.target.guest_username, ENV_GUEST_USERNAME, &lookup);
        fill(&mut self.target.guest_password, ENV_GUEST_PASSWORD, &lookup);
        fill_secs(&mut self.target.timeout, ENV_TIMEOUT, &lookup)?;
        fill_secs(&mut self.target.interval, ENV_INTERVAL, &lookup)?;

        if let TransportConfig::Local { root, .. } = &mut self.transport
            && root.is_relative()
        {
            *root = base_dir.join(&*root);
        }

        if let Some(client) = &mut self.client {
            client.normalize(base_dir, &lookup)?;
        }
        Ok(())
    }

    /// Validates connection, target and transport settings.
    ///
    /// Client settings are validated separately by
    /// [`ProvisioningConfig::client`], since only `provision` needs them.
    pub fn validate(&self) -> Result<(), ProvisionError> {
        require(&self.connection.host, "connection.host", ENV_HOST)?;
        require(&self.connection.username, "connection.username", ENV_USERNAME)?;
        require(&self.connection.password, "connection.password", ENV_PASSWORD)?;
        require(&self.target.guest_username, "target.guest_username", ENV_GUEST_USERNAME)?;
        require(&self.target.guest_password, "target.guest_password", ENV_GUEST_PASSWORD)?;

        if self.target.vm_name.trim().is_empty() {
            return Err(ProvisionError::Validation("target.vm_name must not be empty".to_string()));
        }
        if self.connection.max_attempts == 0 {
            return Err(ProvisionError::Validation(
                "connection.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.guest_interval().is_zero() {
            return Err(ProvisionError::Validation(
                "target.interval must be greater than 0".to_string(),
            ));
        }
        if let TransportConfig::Local { root, .. } = &self.transport
            && root.as_str().is_empty()
        {
            return Err(ProvisionError::Validation(
                "transport.root must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the validated client settings, or an error if the profile has
    /// no `client` section or it is inconsistent.
    pub fn client(&self) -> Result<&ClientConfig, ProvisionError> {
        let client = self.client.as_ref().ok_or_else(|| {
            ProvisionError::Validation("profile has no 'client' section".to_string())
        })?;
        client.validate()?;
        Ok(client)
    }

    /// Endpoint SDK URL derived from the host name.
    pub fn sdk_url(&self) -> String {
        format!("https://{}/sdk", self.connection.host.as_deref().unwrap_or_default())
    }

    pub fn host(&self) -> &str {
        self.connection.host.as_deref().unwrap_or_default()
    }

    pub fn username(&self) -> &str {
        self.connection.username.as_deref().unwrap_or_default()
    }

    pub fn password(&self) -> &str {
        self.connection.password.as_deref().unwrap_or_default()
    }

    pub fn guest_username(&self) -> &str {
        self.target.guest_username.as_deref().unwrap_or_default()
    }

    pub fn guest_password(&self) -> &str {
        self.target.guest_password.as_deref().unwrap_or_default()
    }

    fn guest_interval(&self) -> Duration {
        Duration::from_secs(self.target.interval.unwrap_or(DEFAULT_GUEST_INTERVAL_SECS))
    }

    /// Polling policy for the management endpoint health check.
    pub fn endpoint_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.connection.retry_interval),
            self.connection.max_attempts,
        )
    }

    /// Polling policy for the guest agent credential test:
    /// `ceil(timeout / interval)` attempts.
    pub fn guest_retry(&self) -> RetryPolicy {
        let timeout = Duration::from_secs(self.target.timeout.unwrap_or(DEFAULT_GUEST_TIMEOUT_SECS));
        RetryPolicy::from_timeout(timeout, self.guest_interval())
    }
}

impl ClientConfig {
    fn normalize(
        &mut self,
        base_dir: &Utf8Path,
        lookup: &impl Fn(&str) -> Option<String>,
    ) -> Result<(), ProvisionError> {
        self.server_url = format!("{}/", self.server_url.trim_end_matches('/'));

        if let Some(mode) = &mut self.ssl_verify_mode
            && !mode.is_empty()
            && !mode.starts_with(':')
        {
            *mode = format!(":{}", mode);
        }

        if let Some(raw) = self.attributes_json.take() {
            if self.attributes.is_some() {
                return Err(ProvisionError::Config(
                    "'attributes' and 'attributes_json' are mutually exclusive".to_string(),
                ));
            }
            let attrs = serde_json::from_str(&raw).map_err(|e| {
                ProvisionError::Config(format!("error parsing attributes_json: {}", e))
            })?;
            self.attributes = Some(attrs);
        }

        if let Some(raw) = self.vault_json.take() {
            if self.vaults.is_some() {
                return Err(ProvisionError::Config(
                    "'vaults' and 'vault_json' are mutually exclusive".to_string(),
                ));
            }
            let vaults = parse_vault_json(&raw)
                .map_err(|e| ProvisionError::Config(format!("error parsing vault_json: {}", e)))?;
            self.vaults = Some(vaults);
        }

        let home = lookup("HOME");
        for hint in &mut self.ohai_hints {
            if let Some(rest) = hint.as_str().strip_prefix("~/") {
                let Some(home) = &home else {
                    return Err(ProvisionError::Config(format!(
                        "error expanding the path {}: HOME is not set",
                        hint
                    )));
                };
                *hint = Utf8PathBuf::from(home).join(rest);
            } else if hint.is_relative() {
                *hint = base_dir.join(&*hint);
            }
        }
        Ok(())
    }

    /// Validates the client settings.
    pub fn validate(&self) -> Result<(), ProvisionError> {
        for (value, name) in [
            (&self.node_name, "node_name"),
            (&self.user_name, "user_name"),
            (&self.user_key, "user_key"),
        ] {
            if value.trim().is_empty() {
                return Err(ProvisionError::Validation(format!(
                    "\"{}\": required field is not set",
                    name
                )));
            }
        }

        url::Url::parse(&self.server_url).map_err(|e| {
            ProvisionError::Validation(format!("\"server_url\" is not a valid URL: {}", e))
        })?;

        if self.use_policyfile {
            if is_blank(&self.policy_name) {
                return Err(ProvisionError::Validation(
                    "using policyfile, but \"policy_name\" not set".to_string(),
                ));
            }
            if is_blank(&self.policy_group) {
                return Err(ProvisionError::Validation(
                    "using policyfile, but \"policy_group\" not set".to_string(),
                ));
            }
        } else if self.run_list.is_empty() {
            return Err(ProvisionError::Validation(
                "\"run_list\": required field is not set".to_string(),
            ));
        }

        for hint in &self.ohai_hints {
            let metadata = std::fs::metadata(hint).map_err(|e| {
                ProvisionError::io(format!("failed to read ohai hint metadata: {}", hint), e)
            })?;
            if !metadata.is_file() {
                return Err(ProvisionError::Validation(format!(
                    "ohai hint is not a file: {}",
                    hint
                )));
            }
        }
        Ok(())
    }

    /// Exit-code classification policy for the terminal client run.
    pub fn exit_code_policy(&self) -> ExitCodePolicy {
        match &self.retry_on_exit_code {
            Some(codes) => ExitCodePolicy::with_retry_codes(codes.iter().copied()),
            None => ExitCodePolicy::default(),
        }
    }

    /// Pause between terminal client runs.
    pub fn wait_for_retry(&self) -> Duration {
        Duration::from_secs(self.wait_for_retry)
    }

    /// Vaults to configure, if the profile declares any.
    pub fn vaults(&self) -> Option<&VaultMap> {
        self.vaults.as_ref()
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

fn fill(slot: &mut Option<String>, var: &str, lookup: &impl Fn(&str) -> Option<String>) {
    if slot.is_none()
        && let Some(value) = lookup(var)
    {
        debug!("using {} from environment", var);
        *slot = Some(value);
    }
}

fn fill_secs(
    slot: &mut Option<u64>,
    var: &str,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<(), ProvisionError> {
    if slot.is_none()
        && let Some(value) = lookup(var)
    {
        let secs = value.trim().parse::<u64>().map_err(|e| {
            ProvisionError::Config(format!("{} must be a number of seconds: {}", var, e))
        })?;
        *slot = Some(secs);
    }
    Ok(())
}

fn require(value: &Option<String>, field: &str, var: &str) -> Result<(), ProvisionError> {
    if is_blank(value) {
        return Err(ProvisionError::Validation(format!(
            "\"{}\": required field is not set (or set {})",
            field, var
        )));
    }
    Ok(())
}

/// Loads a profile from a YAML file, resolving it against the process
/// environment and the file's directory.
pub fn load_profile(path: &Utf8Path) -> Result<ProvisioningConfig, ProvisionError> {
    let file = File::open(path).map_err(|e| ProvisionError::io(path.as_str(), e))?;
    let reader = BufReader::new(file);
    let mut config: ProvisioningConfig = serde_yaml::from_reader(reader)
        .map_err(|e| ProvisionError::Config(format!("failed to parse yaml: {}: {}", path, e)))?;

    let base_dir = path
        .parent()
        .filter(|p| !p.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    config.resolve(base_dir, |var| std::env::var(var).ok())?;
    Ok(config)
}
