//! VMware vSphere snapshot adapter.
//!
//! vSphere keeps snapshots in a tree hanging off the VM. Snapshots are
//! addressed by managed object reference and can be renamed in place.

mod client;
mod error;
mod soap;
mod types;

pub use client::VsphereClient;
pub use error::VsphereError;
pub use types::{flatten, link_parents, MoRef, VsphereSnapshot};

use std::sync::Arc;
use tracing::{debug, error};
use vsm_config::ProviderKind;
use vsm_core::capability::{Capability, CapabilitySet};
use vsm_core::error::{Result, SnapshotError, WrappedError};

use crate::{Host, RawSnapshot, SnapshotOptions, SnapshotProvider};

const UPDATE_FAILED: &str = "Unable to update VMware Snapshot";

/// Calls the adapter needs from a vSphere API client.
pub trait VsphereApi: Send + Sync {
    fn find_vm_by_uuid(&self, uuid: &str) -> std::result::Result<Option<MoRef>, VsphereError>;

    /// Root snapshots of `vm`, each carrying its descendants.
    fn snapshot_tree(
        &self,
        vm: &MoRef,
    ) -> std::result::Result<Vec<Arc<VsphereSnapshot>>, VsphereError>;

    fn create_snapshot(
        &self,
        vm: &MoRef,
        name: &str,
        description: &str,
        memory: bool,
        quiesce: bool,
    ) -> std::result::Result<MoRef, VsphereError>;

    fn remove_snapshot(
        &self,
        snapshot: &MoRef,
        remove_children: bool,
    ) -> std::result::Result<(), VsphereError>;

    fn revert_to_snapshot(&self, snapshot: &MoRef) -> std::result::Result<(), VsphereError>;

    fn rename_snapshot(
        &self,
        snapshot: &MoRef,
        name: &str,
        description: &str,
    ) -> std::result::Result<(), VsphereError>;
}

pub struct VsphereAdapter<C = VsphereClient> {
    name: String,
    client: Arc<C>,
}

impl<C: VsphereApi> VsphereAdapter<C> {
    pub fn new(name: impl Into<String>, client: C) -> Self {
        Self::with_shared_client(name, Arc::new(client))
    }

    pub fn with_shared_client(name: impl Into<String>, client: Arc<C>) -> Self {
        Self {
            name: name.into(),
            client,
        }
    }

    fn find_vm_by_uuid(&self, uuid: &str) -> Result<MoRef> {
        self.client
            .find_vm_by_uuid(uuid)?
            .ok_or_else(|| SnapshotError::VmNotFound(uuid.to_string()))
    }

    fn tree(&self, host: &Host) -> Result<Vec<Arc<VsphereSnapshot>>> {
        let vm = self.find_vm_by_uuid(&host.uuid)?;
        let mut roots = self.client.snapshot_tree(&vm)?;
        link_parents(&mut roots);
        Ok(roots)
    }

    fn handle<'a>(&self, snapshot: &'a RawSnapshot) -> Result<&'a VsphereSnapshot> {
        match snapshot {
            RawSnapshot::Vsphere(s) => Ok(s.as_ref()),
            other => Err(SnapshotError::Provider(format!(
                "compute resource '{}' cannot handle a {} snapshot",
                self.name,
                other.kind().as_str()
            ))),
        }
    }

    fn wrap_update_fault(&self, err: VsphereError) -> SnapshotError {
        if err.is_fault() {
            error!(
                compute_resource = %self.name,
                error = %err,
                "Error updating VMware Snapshot"
            );
            WrappedError::new(err, UPDATE_FAILED).into()
        } else {
            err.into()
        }
    }
}

impl<C: VsphereApi> SnapshotProvider for VsphereAdapter<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Vmware
    }

    fn snapshot_capabilities(&self) -> CapabilitySet {
        CapabilitySet::from([
            Capability::Snapshots,
            Capability::SnapshotIncludeRam,
            Capability::SnapshotIncludeQuiesce,
            Capability::EditableSnapshotName,
        ])
    }

    fn create_snapshot(
        &self,
        host: &Host,
        name: &str,
        description: &str,
        options: SnapshotOptions,
    ) -> Result<()> {
        let vm = self.find_vm_by_uuid(&host.uuid)?;
        debug!(
            compute_resource = %self.name,
            vm = %vm.value,
            snapshot = name,
            memory = options.include_ram,
            quiesce = options.quiesce,
            "Creating VMware snapshot"
        );
        let created = self.client.create_snapshot(
            &vm,
            name,
            description,
            options.include_ram,
            options.quiesce,
        )?;
        debug!(snapshot = %created.value, "VMware snapshot created");
        Ok(())
    }

    fn remove_snapshot(&self, snapshot: &RawSnapshot, remove_children: bool) -> Result<()> {
        let snapshot = self.handle(snapshot)?;
        debug!(
            compute_resource = %self.name,
            snapshot = %snapshot.snapshot.value,
            remove_children,
            "Removing VMware snapshot"
        );
        self.client
            .remove_snapshot(&snapshot.snapshot, remove_children)?;
        Ok(())
    }

    fn revert_snapshot(&self, snapshot: &RawSnapshot) -> Result<()> {
        let snapshot = self.handle(snapshot)?;
        debug!(
            compute_resource = %self.name,
            snapshot = %snapshot.snapshot.value,
            "Reverting VMware snapshot"
        );
        self.client.revert_to_snapshot(&snapshot.snapshot)?;
        Ok(())
    }

    fn update_snapshot(
        &self,
        snapshot: &RawSnapshot,
        name: &str,
        description: &str,
    ) -> Result<bool> {
        let snapshot = self.handle(snapshot)?;
        self.client
            .rename_snapshot(&snapshot.snapshot, name, description)
            .map_err(|e| self.wrap_update_fault(e))?;
        Ok(true)
    }

    fn get_snapshot(&self, host: &Host, snapshot_id: &str) -> Result<Option<RawSnapshot>> {
        let roots = self.tree(host)?;
        Ok(flatten(&roots)
            .into_iter()
            .find(|s| s.snapshot.value == snapshot_id)
            .map(|s| RawSnapshot::Vsphere(Arc::clone(s))))
    }

    fn get_snapshots(&self, host: &Host) -> Result<Vec<RawSnapshot>> {
        let roots = self.tree(host)?;
        Ok(flatten(&roots)
            .into_iter()
            .map(|s| RawSnapshot::Vsphere(Arc::clone(s)))
            .collect())
    }
}
