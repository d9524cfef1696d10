use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::SnapshotProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(pub u64);

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A managed virtual machine and the compute resource it runs on.
///
/// `uuid` is the key the backend uses to find the VM: an instance/BIOS UUID
/// on vSphere, `<node>_<vmid>` (or a bare vmid) on Proxmox.
#[derive(Clone)]
pub struct Host {
    pub id: HostId,
    pub name: String,
    pub uuid: String,
    compute_resource: Arc<dyn SnapshotProvider>,
}

impl Host {
    pub fn new(
        id: HostId,
        name: impl Into<String>,
        uuid: impl Into<String>,
        compute_resource: Arc<dyn SnapshotProvider>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            uuid: uuid.into(),
            compute_resource,
        }
    }

    pub fn compute_resource(&self) -> &dyn SnapshotProvider {
        self.compute_resource.as_ref()
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("uuid", &self.uuid)
            .field("compute_resource", &self.compute_resource.name())
            .finish()
    }
}
