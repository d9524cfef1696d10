pub mod capability;
pub mod error;

pub use capability::{Capability, CapabilitySet};
pub use error::{BoxError, Result, SnapshotError, WrappedError};
