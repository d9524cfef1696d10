//! VM snapshot entity.
//!
//! [`Snapshot`] wraps a backend snapshot of a [`Host`](vsm_provider::Host)'s
//! VM and exposes create / save / destroy / revert through the host's
//! compute resource, with lifecycle callbacks and validation errors.

pub mod attributes;
pub mod bulk;
pub mod callbacks;
pub mod errors;
mod snapshot;

pub use attributes::{sanitize_for_mass_assignment, Attribute};
pub use bulk::{create_for_hosts, BulkFailure, BulkReport};
pub use callbacks::{LifecycleEvent, SnapshotCallbacks};
pub use errors::{ErrorField, ValidationErrors};
pub use snapshot::Snapshot;
