use std::time::Duration;
use thiserror::Error;
use vsm_core::error::SnapshotError;

#[derive(Error, Debug)]
pub enum ProxmoxError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx answer from the API; this is the recognized backend fault.
    #[error("Proxmox API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("task {upid} failed: {exit_status}")]
    TaskFailed { upid: String, exit_status: String },

    #[error("task {upid} did not finish within {timeout:?}")]
    TaskTimeout { upid: String, timeout: Duration },

    #[error("snapshots cannot be renamed on Proxmox ('{from}' -> '{to}')")]
    RenameUnsupported { from: String, to: String },

    #[error("invalid Proxmox url: {0}")]
    InvalidUrl(String),

    #[error("authentication failed: {0}")]
    Auth(String),
}

impl ProxmoxError {
    /// Faults the update path wraps instead of propagating.
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            ProxmoxError::Api { .. } | ProxmoxError::RenameUnsupported { .. }
        )
    }
}

impl From<ProxmoxError> for SnapshotError {
    fn from(err: ProxmoxError) -> Self {
        SnapshotError::backend(err)
    }
}
