use serial_test::serial;
use std::io::Write;
use tempfile::NamedTempFile;
use vsm_config::{Credentials, ProviderKind, SnapshotConfig, CONFIG_ENV_VAR};
use vsm_core::error::SnapshotError;

const VALID_CONFIG: &str = r#"
compute_resources:
  - name: pve
    provider: proxmox
    url: https://pve.example.com:8006
    auth:
      user: root@pam
      token_id: fleet
      token_secret: ${VSM_TEST_PVE_SECRET}
    task:
      poll_interval_ms: 250
  - name: vcenter
    provider: vmware
    url: https://vcenter.example.com
    instance_uuid: false
    auth:
      user: administrator@vsphere.local
      password: ${VSM_TEST_VC_PASSWORD}
"#;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp config");
    file.write_all(contents.as_bytes()).expect("write temp config");
    file
}

#[test]
#[serial]
fn test_load_expands_secrets() {
    std::env::set_var("VSM_TEST_PVE_SECRET", "0f9e-token");
    std::env::set_var("VSM_TEST_VC_PASSWORD", "vc-pass");
    let file = write_config(VALID_CONFIG);

    let config = SnapshotConfig::load(Some(file.path().to_path_buf())).unwrap();
    assert_eq!(config.compute_resources.len(), 2);

    let pve = config.get("pve").unwrap();
    assert_eq!(pve.provider, ProviderKind::Proxmox);
    assert_eq!(pve.task.poll_interval_ms, 250);
    assert_eq!(pve.task.timeout_secs, 600);
    assert_eq!(
        pve.auth.credentials().unwrap(),
        Credentials::Token {
            user: "root@pam",
            token_id: "fleet",
            secret: "0f9e-token"
        }
    );

    let vcenter = config.get("vcenter").unwrap();
    assert!(!vcenter.instance_uuid);
    assert_eq!(
        vcenter.auth.credentials().unwrap(),
        Credentials::Password {
            user: "administrator@vsphere.local",
            password: "vc-pass"
        }
    );

    std::env::remove_var("VSM_TEST_PVE_SECRET");
    std::env::remove_var("VSM_TEST_VC_PASSWORD");
}

#[test]
#[serial]
fn test_load_uses_env_override_path() {
    std::env::set_var("VSM_TEST_PVE_SECRET", "x");
    std::env::set_var("VSM_TEST_VC_PASSWORD", "y");
    let file = write_config(VALID_CONFIG);
    std::env::set_var(CONFIG_ENV_VAR, file.path());

    let config = SnapshotConfig::load(None).unwrap();
    assert!(config.get("vcenter").is_some());

    std::env::remove_var(CONFIG_ENV_VAR);
    std::env::remove_var("VSM_TEST_PVE_SECRET");
    std::env::remove_var("VSM_TEST_VC_PASSWORD");
}

#[test]
#[serial]
fn test_missing_secret_variable_is_config_error() {
    std::env::remove_var("VSM_TEST_PVE_SECRET");
    let file = write_config(VALID_CONFIG);

    let err = SnapshotConfig::load(Some(file.path().to_path_buf())).unwrap_err();
    assert!(matches!(err, SnapshotError::Config(_)));
}

#[test]
fn test_invalid_config_is_rejected() {
    let file = write_config(
        r#"
compute_resources:
  - name: pve
    provider: proxmox
    url: not a url
    auth:
      user: root@pam
"#,
    );

    let err = SnapshotConfig::load(Some(file.path().to_path_buf())).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("invalid url"));
    assert!(message.contains("auth requires a password"));
}

#[test]
fn test_unknown_provider_fails_to_parse() {
    let file = write_config(
        r#"
compute_resources:
  - name: ovirt
    provider: ovirt
    url: https://ovirt.example.com
    auth: { user: admin, password: pw }
"#,
    );

    let err = SnapshotConfig::load(Some(file.path().to_path_buf())).unwrap_err();
    assert!(matches!(err, SnapshotError::Serialization(_)));
}

#[test]
fn test_missing_file_keeps_read_context() {
    let err = SnapshotConfig::load(Some("/nonexistent/vsm/config.yaml".into())).unwrap_err();
    assert!(matches!(err, SnapshotError::Other(_)));
    // Context first, then the io cause.
    let message = err.to_string();
    assert!(message.starts_with("Failed to read /nonexistent/vsm/config.yaml: "));
    assert!(std::error::Error::source(&err).is_some());
}
