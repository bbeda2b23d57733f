//! Per-OS-family command templates and paths.
//!
//! An [`OsProfile`] is selected once, after the guest family is known, and
//! then treated as immutable for the rest of the run. Every guest command
//! line the provisioning stages issue is rendered here.

use serde::Deserialize;
use strum::Display;

use crate::config::ClientConfig;
use crate::error::ProvisionError;

pub const CLIENT_RB: &str = "client.rb";
pub const FIRST_BOOT: &str = "first-boot.json";
pub const CLIENT_PEM: &str = "client.pem";
pub const SECRET_KEY: &str = "encrypted_data_bag_secret";

const LINUX_CONF_DIR: &str = "/etc/chef";
const LINUX_NO_OUTPUT: &str = "> /dev/null 2>&1";
const LINUX_GEM: &str = "/opt/chef/embedded/bin/gem";
const LINUX_INSTALL_URL: &str = "https://omnitruck.chef.io/install.sh";

const WINDOWS_CONF_DIR: &str = "C:/chef";
const WINDOWS_NO_OUTPUT: &str = "> $null 2>&1";
const WINDOWS_GEM: &str = "C:/opscode/chef/embedded/bin/gem";
const WINDOWS_INSTALL_SCRIPT: &str = "C:/Windows/Temp/ChefClient.ps1";

const CLIENT_CMD: &str = "chef-client";
const KNIFE_CMD: &str = "knife";

/// Supported guest OS families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OsFamily {
    Linux,
    Windows,
}

impl OsFamily {
    /// Maps a family string reported by the guest agent.
    ///
    /// Solaris guests are driven with the Linux profile.
    pub fn from_guest_family(family: &str) -> Result<Self, ProvisionError> {
        match family {
            "linuxGuest" | "solarisGuest" | "linux" => Ok(Self::Linux),
            "windowsGuest" | "windows" => Ok(Self::Windows),
            other => Err(ProvisionError::UnsupportedOsFamily(other.to_string())),
        }
    }
}

/// Files and commands that install the client runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPlan {
    /// `(guest path, content)` pairs uploaded before the commands run.
    pub uploads: Vec<(String, String)>,
    /// Commands run in order; the first failure aborts the install.
    pub commands: Vec<String>,
}

/// Command templates and paths for one OS family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsProfile {
    Linux {
        /// Prefix every command with `sudo`.
        use_sudo: bool,
    },
    Windows,
}

impl OsProfile {
    /// Builds the profile for `family`.
    ///
    /// Linux commands run under sudo unless the guest user is root or
    /// `prevent_sudo` is set.
    pub fn select(family: OsFamily, guest_username: &str, prevent_sudo: bool) -> Self {
        match family {
            OsFamily::Linux => Self::Linux {
                use_sudo: !prevent_sudo && guest_username != "root",
            },
            OsFamily::Windows => Self::Windows,
        }
    }

    /// Directory holding the client configuration on the guest.
    pub fn conf_dir(&self) -> &'static str {
        match self {
            Self::Linux { .. } => LINUX_CONF_DIR,
            Self::Windows => WINDOWS_CONF_DIR,
        }
    }

    /// Path of `name` inside the configuration directory.
    pub fn conf_path(&self, name: &str) -> String {
        format!("{}/{}", self.conf_dir(), name)
    }

    pub fn hints_dir(&self) -> String {
        self.conf_path("ohai/hints")
    }

    /// Path of the uploaded user key; the sensitive artifact of a run.
    pub fn user_key_path(&self, user_name: &str) -> String {
        self.conf_path(&format!("{}.pem", user_name))
    }

    fn no_output(&self) -> &'static str {
        match self {
            Self::Linux { .. } => LINUX_NO_OUTPUT,
            Self::Windows => WINDOWS_NO_OUTPUT,
        }
    }

    fn gem(&self) -> &'static str {
        match self {
            Self::Linux { .. } => LINUX_GEM,
            Self::Windows => WINDOWS_GEM,
        }
    }

    /// Applies the profile's privilege prefix to a command line.
    pub fn command(&self, line: &str) -> String {
        match self {
            Self::Linux { use_sudo: true } => format!("sudo {}", line),
            _ => line.to_string(),
        }
    }

    /// Commands creating `dir` and opening it for upload.
    pub fn prepare_dir(&self, dir: &str) -> Vec<String> {
        match self {
            Self::Linux { use_sudo } => {
                let mut commands = vec![self.command(&format!("mkdir -p {:?}", dir))];
                if *use_sudo {
                    commands.push(self.command(&format!("chmod 777 {:?}", dir)));
                }
                commands
            }
            Self::Windows => vec![format!("cmd /c if not exist {:?} mkdir {:?}", dir, dir)],
        }
    }

    /// Commands restoring ownership of `dir` after uploads.
    pub fn seal_dir(&self, dir: &str) -> Vec<String> {
        match self {
            Self::Linux { use_sudo: true } => vec![
                self.command(&format!("chmod 755 {:?}", dir)),
                self.command(&format!("chown -R root:root {:?}", dir)),
            ],
            _ => Vec::new(),
        }
    }

    /// Files and commands that install the client runtime.
    pub fn install_plan(&self, client: &ClientConfig) -> InstallPlan {
        match self {
            Self::Linux { .. } => {
                let prefix = proxy_env_prefix(client);
                let version = client.version.as_deref().unwrap_or_default();
                InstallPlan {
                    uploads: Vec::new(),
                    commands: vec![
                        self.command(&format!("{}curl -LO {}", prefix, LINUX_INSTALL_URL)),
                        self.command(&format!(
                            "{}bash ./install.sh -v {:?} -c {}",
                            prefix, version, client.channel
                        )),
                        self.command(&format!("{}rm -f install.sh", prefix)),
                    ],
                }
            }
            Self::Windows => InstallPlan {
                uploads: vec![(
                    WINDOWS_INSTALL_SCRIPT.to_string(),
                    windows_install_script(client),
                )],
                commands: vec![self.script_invocation(WINDOWS_INSTALL_SCRIPT)],
            },
        }
    }

    fn knife_options(&self, user_name: &str) -> String {
        format!(
            "-c {} -u {} --key {}",
            self.conf_path(CLIENT_RB),
            user_name,
            self.user_key_path(user_name)
        )
    }

    pub fn fetch_certificates(&self) -> String {
        self.command(&format!("{} ssl fetch -c {}", KNIFE_CMD, self.conf_path(CLIENT_RB)))
    }

    /// Probe succeeding (exit 0) when the node record exists.
    pub fn node_show(&self, node_name: &str, user_name: &str) -> String {
        self.command(&format!(
            "{} node show {} {} {}",
            KNIFE_CMD,
            node_name,
            self.knife_options(user_name),
            self.no_output()
        ))
    }

    /// Probe succeeding (exit 0) when the client record exists.
    pub fn client_show(&self, node_name: &str, user_name: &str) -> String {
        self.command(&format!(
            "{} client show {} {} {}",
            KNIFE_CMD,
            node_name,
            self.knife_options(user_name),
            self.no_output()
        ))
    }

    pub fn node_delete(&self, node_name: &str, user_name: &str) -> String {
        self.command(&format!(
            "{} node delete {} -y {}",
            KNIFE_CMD,
            node_name,
            self.knife_options(user_name)
        ))
    }

    pub fn client_delete(&self, node_name: &str, user_name: &str) -> String {
        self.command(&format!(
            "{} client delete {} -y {}",
            KNIFE_CMD,
            node_name,
            self.knife_options(user_name)
        ))
    }

    pub fn client_create(&self, node_name: &str, user_name: &str) -> String {
        self.command(&format!(
            "{} client create {} -d -f {} {}",
            KNIFE_CMD,
            node_name,
            self.conf_path(CLIENT_PEM),
            self.knife_options(user_name)
        ))
    }

    pub fn vault_gem_install(&self) -> String {
        self.command(&format!("{} install chef-vault", self.gem()))
    }

    pub fn vault_remove(&self, vault: &str, item: &str, node_name: &str, user_name: &str) -> String {
        self.command(&format!(
            "{} vault remove {} {} -C {:?} -M client {}",
            KNIFE_CMD,
            vault,
            item,
            node_name,
            self.knife_options(user_name)
        ))
    }

    pub fn vault_update(&self, vault: &str, item: &str, node_name: &str, user_name: &str) -> String {
        self.command(&format!(
            "{} vault update {} {} -C {} -M client {}",
            KNIFE_CMD,
            vault,
            item,
            node_name,
            self.knife_options(user_name)
        ))
    }

    /// The terminal client run.
    ///
    /// Policy mode never passes `-E`; it passes `-n` when a named run list
    /// is configured.
    pub fn client_run(&self, client: &ClientConfig) -> String {
        let first_boot = self.conf_path(FIRST_BOOT);
        let line = match (client.use_policyfile, client.named_run_list.as_deref()) {
            (true, None | Some("")) => format!("{} -j {:?}", CLIENT_CMD, first_boot),
            (true, Some(named)) => format!("{} -j {:?} -n {:?}", CLIENT_CMD, first_boot, named),
            (false, _) => format!("{} -j {:?} -E {:?}", CLIENT_CMD, first_boot, client.environment),
        };
        self.command(&line)
    }

    /// Guest path for a temporary script identified by `id`.
    pub fn script_path(&self, id: &str) -> String {
        match self {
            Self::Linux { .. } => format!("/tmp/guestprov-{}.sh", id),
            Self::Windows => format!("C:/Windows/Temp/guestprov-{}.ps1", id),
        }
    }

    /// Command line executing the script at `path`.
    pub fn script_invocation(&self, path: &str) -> String {
        match self {
            Self::Linux { .. } => self.command(&format!("sh {:?}", path)),
            Self::Windows => format!("powershell -NoProfile -ExecutionPolicy Bypass -File {}", path),
        }
    }
}

fn proxy_env_prefix(client: &ClientConfig) -> String {
    let mut prefix = String::new();
    if let Some(proxy) = client.http_proxy.as_deref().filter(|p| !p.is_empty()) {
        prefix.push_str(&format!("http_proxy='{}' ", proxy));
    }
    if let Some(proxy) = client.https_proxy.as_deref().filter(|p| !p.is_empty()) {
        prefix.push_str(&format!("https_proxy='{}' ", proxy));
    }
    if !client.no_proxy.is_empty() {
        prefix.push_str(&format!("no_proxy='{}' ", client.no_proxy.join(",")));
    }
    prefix
}

/// Default Windows installer URL; `$machine_os` and `$machine_arch` are
/// expanded by the install script.
pub fn default_windows_installer_url(channel: &str, version: Option<&str>) -> String {
    format!(
        "https://omnitruck.chef.io/{}/chef/download?p=windows&pv=$machine_os&m=$machine_arch&v={}",
        channel,
        version.unwrap_or("latest")
    )
}

fn windows_install_script(client: &ClientConfig) -> String {
    let url = client.installer_url.clone().unwrap_or_else(|| {
        default_windows_installer_url(&client.channel, client.version.as_deref())
    });
    let http_proxy = client.http_proxy.as_deref().unwrap_or_default();
    let no_proxy = client.no_proxy.join(",");

    format!(
        r#"
$winver = [System.Environment]::OSVersion.Version | % {{"{{0}}.{{1}}" -f $_.Major,$_.Minor}}

switch ($winver)
{{
  "6.0" {{$machine_os = "2008"}}
  "6.1" {{$machine_os = "2008r2"}}
  "6.2" {{$machine_os = "2012"}}
  "6.3" {{$machine_os = "2012"}}
  default {{$machine_os = "2008r2"}}
}}

if ([System.IntPtr]::Size -eq 4) {{$machine_arch = "i686"}} else {{$machine_arch = "x86_64"}}

$url = "{url}"
$dest = [System.IO.Path]::GetTempFileName()
$dest = [System.IO.Path]::ChangeExtension($dest, ".msi")
$downloader = New-Object System.Net.WebClient

$http_proxy = '{http_proxy}'
if ($http_proxy -ne '') {{
  $no_proxy = '{no_proxy}'
  if ($no_proxy -eq '') {{
    $no_proxy = "127.0.0.1"
  }}

  $proxy = New-Object System.Net.WebProxy($http_proxy, $true, ,$no_proxy.Split(','))
  $downloader.proxy = $proxy
}}

Write-Host 'Downloading Chef Client...'
$downloader.DownloadFile($url, $dest)

Write-Host 'Installing Chef Client...'
Start-Process -FilePath msiexec -ArgumentList /qn, /i, $dest -Wait
"#
    )
}
