//! Compute-resource configuration.
//!
//! A single YAML file lists every compute resource the snapshot layer may
//! talk to. Secrets may reference environment variables (`${PVE_TOKEN}`),
//! which are expanded at load time so the file itself can stay in version
//! control.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use vsm_core::error::{Result, SnapshotError};

use crate::validator::ValidationReport;

/// Environment variable overriding the configuration file location.
pub const CONFIG_ENV_VAR: &str = "VSM_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Proxmox,
    #[serde(alias = "vsphere")]
    Vmware,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Proxmox => "proxmox",
            ProviderKind::Vmware => "vmware",
        }
    }
}

/// Credentials for one compute resource.
///
/// Exactly one of `password` or the `token_id`/`token_secret` pair must be
/// set; [`AuthConfig::credentials`] resolves which.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials<'a> {
    Token {
        user: &'a str,
        token_id: &'a str,
        secret: &'a str,
    },
    Password {
        user: &'a str,
        password: &'a str,
    },
}

impl AuthConfig {
    pub fn credentials(&self) -> Result<Credentials<'_>> {
        match (&self.password, &self.token_id, &self.token_secret) {
            (None, Some(token_id), Some(secret)) => Ok(Credentials::Token {
                user: &self.user,
                token_id,
                secret,
            }),
            (Some(password), None, None) => Ok(Credentials::Password {
                user: &self.user,
                password,
            }),
            (Some(_), _, _) => Err(SnapshotError::Config(
                "auth must use either a password or an API token, not both".into(),
            )),
            _ => Err(SnapshotError::Config(
                "auth requires a password or both token_id and token_secret".into(),
            )),
        }
    }

    fn expand(&mut self) -> Result<()> {
        self.user = expand_env(&self.user)?;
        for secret in [
            &mut self.password,
            &mut self.token_id,
            &mut self.token_secret,
        ] {
            if let Some(value) = secret.as_mut() {
                *value = expand_env(value)?;
            }
        }
        Ok(())
    }
}

/// Backend task polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_task_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_task_timeout_secs() -> u64 {
    600
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            timeout_secs: default_task_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeResourceConfig {
    pub name: String,
    pub provider: ProviderKind,
    pub url: String,
    pub auth: AuthConfig,

    #[serde(default = "default_true")]
    pub verify_tls: bool,

    /// Per-request HTTP timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub task: TaskSettings,

    /// vSphere only: look VMs up by instance UUID instead of BIOS UUID.
    #[serde(default = "default_true")]
    pub instance_uuid: bool,
}

impl ComputeResourceConfig {
    pub fn new(name: impl Into<String>, provider: ProviderKind, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider,
            url: url.into(),
            auth: AuthConfig::default(),
            verify_tls: true,
            timeout_secs: default_timeout_secs(),
            task: TaskSettings::default(),
            instance_uuid: true,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.task.poll_interval_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task.timeout_secs)
    }

    fn validate_into(&self, report: &mut ValidationReport) {
        let label = if self.name.trim().is_empty() {
            report.add_error("compute resource with an empty name".to_string());
            "<unnamed>"
        } else {
            self.name.as_str()
        };

        match url::Url::parse(&self.url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {
                if parsed.scheme() == "http" {
                    report.add_warning(format!("{label}: url uses plain http"));
                }
            }
            Ok(parsed) => report.add_error(format!(
                "{label}: unsupported url scheme '{}'",
                parsed.scheme()
            )),
            Err(e) => report.add_error(format!("{label}: invalid url '{}': {e}", self.url)),
        }

        if self.auth.user.trim().is_empty() {
            report.add_error(format!("{label}: auth.user is required"));
        }
        if let Err(e) = self.auth.credentials() {
            report.add_error(format!("{label}: {e}"));
        }

        if self.timeout_secs == 0 {
            report.add_error(format!("{label}: timeout_secs must be greater than zero"));
        }
        if self.task.poll_interval_ms == 0 || self.task.timeout_secs == 0 {
            report.add_error(format!(
                "{label}: task poll interval and timeout must be greater than zero"
            ));
        }

        if !self.verify_tls {
            report.add_warning(format!("{label}: TLS certificate verification is disabled"));
        }
        if self.provider == ProviderKind::Proxmox && !self.instance_uuid {
            report.add_info(format!("{label}: instance_uuid has no effect for proxmox"));
        }
    }
}

/// Root of the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default)]
    pub compute_resources: Vec<ComputeResourceConfig>,
}

impl SnapshotConfig {
    /// Load and validate configuration.
    ///
    /// Resolution order: `path`, then `$VSM_CONFIG`, then
    /// `<config dir>/vsm/config.yaml`.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => Self::default_path()?,
        };
        let config = Self::load_from_path(&path)?;

        let report = config.validate();
        for warning in &report.warnings {
            tracing::warn!("{}", warning);
        }
        if report.has_errors() {
            return Err(SnapshotError::Config(format!(
                "invalid configuration in {}:\n{}",
                path.display(),
                report
            )));
        }

        tracing::debug!(
            path = %path.display(),
            compute_resources = config.compute_resources.len(),
            "Loaded snapshot configuration"
        );
        Ok(config)
    }

    pub fn default_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Ok(PathBuf::from(path));
        }
        dirs::config_dir()
            .map(|dir| dir.join("vsm").join("config.yaml"))
            .ok_or_else(|| SnapshotError::Config("could not determine config directory".into()))
    }

    /// Parse a file and expand secrets. Does not validate.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let mut config: Self = serde_yaml_ng::from_str(contents)?;
        for resource in &mut config.compute_resources {
            resource.url = expand_env(&resource.url)?;
            resource.auth.expand()?;
        }
        Ok(config)
    }

    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if self.compute_resources.is_empty() {
            report.add_warning("no compute resources configured".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for resource in &self.compute_resources {
            if !resource.name.is_empty() && !seen.insert(resource.name.as_str()) {
                report.add_error(format!(
                    "duplicate compute resource name '{}'",
                    resource.name
                ));
            }
            resource.validate_into(&mut report);
        }

        report
    }

    pub fn get(&self, name: &str) -> Option<&ComputeResourceConfig> {
        self.compute_resources.iter().find(|r| r.name == name)
    }
}

fn expand_env(value: &str) -> Result<String> {
    shellexpand::env(value)
        .map(|v| v.into_owned())
        .map_err(|e| SnapshotError::Config(format!("failed to expand '{value}': {e}")))
}
