mod helpers;

use std::fs;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use guestprov::config::{TransportConfig, load_profile};
use guestprov::error::ProvisionError;
use guestprov::os::OsFamily;
use tempfile::tempdir;

fn write_profile(dir: &tempfile::TempDir, yaml: &str) -> Utf8PathBuf {
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("UTF-8 temp dir");
    let path = root.join("profile.yaml");
    fs::write(&path, yaml).expect("failed to write profile");
    path
}

#[test]
fn load_profile_resolves_paths_against_profile_dir() -> Result<()> {
    let dir = tempdir()?;
    let yaml = helpers::BASE_PROFILE
        .replace("  type: dry-run\n", "  type: local\n  root: guest-root\n  guest_family: windowsGuest\n")
        .replace("  interval: 15\n", "  interval: 15\n  os_type: windows\n");
    let yaml = format!("{}  ohai_hints: [\"hints/vmware.json\"]\n", yaml);
    let path = write_profile(&dir, &yaml);
    let base = path.parent().unwrap().to_owned();
    fs::create_dir(base.join("hints"))?;
    fs::write(base.join("hints/vmware.json"), "{}")?;

    let config = load_profile(&path)?;
    config.validate()?;

    assert_eq!(
        config.transport,
        TransportConfig::Local {
            root: base.join("guest-root"),
            guest_family: Some("windowsGuest".to_string()),
        }
    );
    assert_eq!(config.target.os_type, Some(OsFamily::Windows));
    let client = config.client()?;
    assert_eq!(client.ohai_hints, vec![base.join("hints/vmware.json")]);
    Ok(())
}

#[test]
fn missing_ohai_hint_fails_client_validation() -> Result<()> {
    let dir = tempdir()?;
    let yaml = format!("{}  ohai_hints: [\"absent.json\"]\n", helpers::BASE_PROFILE);
    let path = write_profile(&dir, &yaml);

    let config = load_profile(&path)?;
    let err = config.client().unwrap_err();

    assert!(matches!(err, ProvisionError::Io { .. }), "got {:?}", err);
    assert!(err.to_string().contains("absent.json"));
    Ok(())
}

#[test]
fn missing_file_is_io_error() {
    let err = load_profile(Utf8Path::new("/nonexistent/guestprov/profile.yaml")).unwrap_err();
    assert!(matches!(err, ProvisionError::Io { .. }), "got {:?}", err);
    assert!(err.to_string().contains("not found"));
}

#[test]
fn malformed_yaml_is_config_error() -> Result<()> {
    let dir = tempdir()?;
    let path = write_profile(&dir, "connection: [unclosed\n");

    let err = load_profile(&path).unwrap_err();

    assert!(matches!(err, ProvisionError::Config(_)), "got {:?}", err);
    Ok(())
}

#[test]
fn unknown_transport_is_config_error() -> Result<()> {
    let dir = tempdir()?;
    let yaml = helpers::BASE_PROFILE.replace("  type: dry-run\n", "  type: ssh\n");
    let path = write_profile(&dir, &yaml);

    let err = load_profile(&path).unwrap_err();

    assert!(matches!(err, ProvisionError::Config(_)), "got {:?}", err);
    Ok(())
}

#[test]
fn unknown_client_field_is_rejected() -> Result<()> {
    let dir = tempdir()?;
    let yaml = format!("{}  run_lists: [\"typo\"]\n", helpers::BASE_PROFILE);
    let path = write_profile(&dir, &yaml);

    let err = load_profile(&path).unwrap_err();

    assert!(err.to_string().contains("run_lists"), "got {}", err);
    Ok(())
}

#[test]
fn structured_and_json_attributes_conflict() -> Result<()> {
    let dir = tempdir()?;
    let yaml = format!(
        "{}  attributes:\n    tier: web\n  attributes_json: '{{\"tier\": \"db\"}}'\n",
        helpers::BASE_PROFILE
    );
    let path = write_profile(&dir, &yaml);

    let err = load_profile(&path).unwrap_err();

    assert!(matches!(err, ProvisionError::Config(_)), "got {:?}", err);
    assert!(err.to_string().contains("mutually exclusive"));
    Ok(())
}

#[test]
fn validate_command_accepts_profile_with_retry_codes() -> Result<()> {
    use clap::Parser;
    use guestprov::cli::{Cli, Commands};

    let dir = tempdir()?;
    let yaml = format!("{}  max_retries: 2\n  retry_on_exit_code: [1, 35]\n", helpers::BASE_PROFILE);
    let path = write_profile(&dir, &yaml);

    let cli = Cli::parse_from(["guestprov", "validate", "-f", path.as_str()]);
    let Commands::Validate(opts) = cli.command else {
        panic!("Expected Validate command");
    };

    guestprov::run_validate(&opts)?;
    Ok(())
}
