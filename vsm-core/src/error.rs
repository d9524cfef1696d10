use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// Boxed error used to carry vendor client failures across crate boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A backend fault re-raised with a human-readable message.
///
/// Callers match on this type instead of vendor-specific errors; the
/// original fault stays reachable through [`WrappedError::wrapped_error`].
#[derive(Error, Debug)]
#[error("{message}")]
pub struct WrappedError {
    message: String,
    #[source]
    cause: BoxError,
}

impl WrappedError {
    pub fn new(cause: impl Into<BoxError>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: cause.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The underlying backend fault.
    pub fn wrapped_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.cause.as_ref()
    }
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    Config(String),
    Provider(String),
    Backend(#[source] BoxError),
    Wrapped(#[from] WrappedError),
    VmNotFound(String),
    Unsupported {
        provider: String,
        capability: String,
    },
    MissingHandle(&'static str),
    ForbiddenAttributes(Vec<String>),
    UnknownAttribute(String),
    Serialization(String),
    Other(#[from] anyhow::Error),
}

impl SnapshotError {
    /// Box a vendor client error without interpreting it.
    pub fn backend(err: impl Into<BoxError>) -> Self {
        SnapshotError::Backend(err.into())
    }

    pub fn is_wrapped(&self) -> bool {
        matches!(self, SnapshotError::Wrapped(_))
    }
}

impl Display for SnapshotError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            SnapshotError::Config(s) => write!(f, "Configuration error: {}", s),
            SnapshotError::Provider(s) => write!(f, "Provider error: {}", s),
            SnapshotError::Backend(e) => write!(f, "Backend error: {}", e),
            SnapshotError::Wrapped(e) => {
                write!(f, "{}: {}", e.message(), e.wrapped_error())
            }
            SnapshotError::VmNotFound(uuid) => {
                write!(f, "Virtual machine not found for uuid '{}'", uuid)
            }
            SnapshotError::Unsupported {
                provider,
                capability,
            } => write!(
                f,
                "Compute resource '{}' does not support {}",
                provider, capability
            ),
            SnapshotError::MissingHandle(op) => {
                write!(f, "Cannot {} a snapshot that has not been created", op)
            }
            SnapshotError::ForbiddenAttributes(keys) => {
                write!(f, "Forbidden attributes: {}", keys.join(", "))
            }
            SnapshotError::UnknownAttribute(key) => {
                write!(f, "Unknown attribute '{}' for Snapshot", key)
            }
            SnapshotError::Serialization(s) => write!(f, "Serialization error: {}", s),
            SnapshotError::Other(e) => write!(f, "{:#}", e),
        }
    }
}

impl From<serde_yaml_ng::Error> for SnapshotError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        SnapshotError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for SnapshotError {
    fn from(err: serde_json::Error) -> Self {
        SnapshotError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SnapshotError>;
