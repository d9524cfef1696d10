//! Configuration for VM snapshot management.
//!
//! Loads the list of compute resources (Proxmox clusters, vCenter servers)
//! from YAML, expands secrets from the environment, and validates the result
//! before any backend client is built from it.

pub mod config;
pub mod validator;

pub use config::{
    AuthConfig, ComputeResourceConfig, Credentials, ProviderKind, SnapshotConfig, TaskSettings,
    CONFIG_ENV_VAR,
};
pub use validator::ValidationReport;
