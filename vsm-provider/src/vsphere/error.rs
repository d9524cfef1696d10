use std::time::Duration;
use thiserror::Error;
use vsm_core::error::SnapshotError;

#[derive(Error, Debug)]
pub enum VsphereError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),

    /// SOAP fault raised by the server; the recognized backend fault.
    #[error("{}: {message}", .kind.as_deref().unwrap_or(.code.as_str()))]
    Fault {
        code: String,
        message: String,
        kind: Option<String>,
    },

    #[error("task {task} failed: {message}")]
    TaskFailed { task: String, message: String },

    #[error("task {task} did not finish within {timeout:?}")]
    TaskTimeout { task: String, timeout: Duration },

    #[error("unexpected response: {0}")]
    InvalidResponse(String),

    #[error("session error: {0}")]
    Session(String),
}

impl VsphereError {
    pub fn is_fault(&self) -> bool {
        matches!(self, VsphereError::Fault { .. })
    }
}

impl From<VsphereError> for SnapshotError {
    fn from(err: VsphereError) -> Self {
        SnapshotError::backend(err)
    }
}
