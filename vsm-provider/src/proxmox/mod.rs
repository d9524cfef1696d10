//! Proxmox VE snapshot adapter.
//!
//! Proxmox keeps a flat list of snapshots per guest and identifies them by
//! name. Names are immutable, so only the description can be updated.

mod client;
mod error;
mod types;

pub use client::ProxmoxClient;
pub use error::ProxmoxError;
pub use types::{parse_vmid, GuestKind, ProxmoxGuest, ProxmoxSnapshot, ProxmoxSnapshotInfo};

use std::sync::Arc;
use tracing::{debug, error};
use vsm_config::ProviderKind;
use vsm_core::capability::{Capability, CapabilitySet};
use vsm_core::error::{Result, SnapshotError, WrappedError};

use crate::{Host, RawSnapshot, SnapshotOptions, SnapshotProvider};

const UPDATE_FAILED: &str = "Unable to update Proxmox Snapshot";

/// Calls the adapter needs from a Proxmox API client.
pub trait ProxmoxApi: Send + Sync {
    fn find_guest(&self, vmid: u32) -> std::result::Result<Option<ProxmoxGuest>, ProxmoxError>;

    fn list_snapshots(
        &self,
        guest: &ProxmoxGuest,
    ) -> std::result::Result<Vec<ProxmoxSnapshotInfo>, ProxmoxError>;

    fn create_snapshot(
        &self,
        guest: &ProxmoxGuest,
        name: &str,
        vmstate: bool,
    ) -> std::result::Result<(), ProxmoxError>;

    fn set_snapshot_description(
        &self,
        guest: &ProxmoxGuest,
        name: &str,
        description: &str,
    ) -> std::result::Result<(), ProxmoxError>;

    fn delete_snapshot(&self, guest: &ProxmoxGuest, name: &str)
        -> std::result::Result<(), ProxmoxError>;

    fn rollback_snapshot(
        &self,
        guest: &ProxmoxGuest,
        name: &str,
    ) -> std::result::Result<(), ProxmoxError>;
}

pub struct ProxmoxAdapter<C = ProxmoxClient> {
    name: String,
    client: Arc<C>,
}

impl<C: ProxmoxApi> ProxmoxAdapter<C> {
    pub fn new(name: impl Into<String>, client: C) -> Self {
        Self::with_shared_client(name, Arc::new(client))
    }

    pub fn with_shared_client(name: impl Into<String>, client: Arc<C>) -> Self {
        Self {
            name: name.into(),
            client,
        }
    }

    fn find_vm_by_uuid(&self, uuid: &str) -> Result<ProxmoxGuest> {
        let vmid = parse_vmid(uuid).ok_or_else(|| SnapshotError::VmNotFound(uuid.to_string()))?;
        self.client
            .find_guest(vmid)?
            .ok_or_else(|| SnapshotError::VmNotFound(uuid.to_string()))
    }

    fn handle<'a>(&self, snapshot: &'a RawSnapshot) -> Result<&'a ProxmoxSnapshot> {
        match snapshot {
            RawSnapshot::Proxmox(s) => Ok(s),
            other => Err(SnapshotError::Provider(format!(
                "compute resource '{}' cannot handle a {} snapshot",
                self.name,
                other.kind().as_str()
            ))),
        }
    }

    fn wrap_update_fault(&self, err: ProxmoxError) -> SnapshotError {
        if err.is_fault() {
            error!(
                compute_resource = %self.name,
                error = %err,
                "Error updating Proxmox Snapshot"
            );
            WrappedError::new(err, UPDATE_FAILED).into()
        } else {
            err.into()
        }
    }
}

impl<C: ProxmoxApi> SnapshotProvider for ProxmoxAdapter<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Proxmox
    }

    fn snapshot_capabilities(&self) -> CapabilitySet {
        CapabilitySet::from([Capability::Snapshots, Capability::SnapshotIncludeRam])
    }

    fn create_snapshot(
        &self,
        host: &Host,
        name: &str,
        description: &str,
        options: SnapshotOptions,
    ) -> Result<()> {
        let guest = self.find_vm_by_uuid(&host.uuid)?;
        // Only qemu guests can save RAM state.
        let vmstate = options.include_ram && guest.kind == GuestKind::Qemu;
        debug!(
            compute_resource = %self.name,
            vmid = guest.vmid,
            node = %guest.node,
            snapshot = name,
            vmstate,
            "Creating Proxmox snapshot"
        );
        self.client.create_snapshot(&guest, name, vmstate)?;
        self.client
            .set_snapshot_description(&guest, name, description)?;
        Ok(())
    }

    fn remove_snapshot(&self, snapshot: &RawSnapshot, _remove_children: bool) -> Result<()> {
        let snapshot = self.handle(snapshot)?;
        debug!(
            compute_resource = %self.name,
            vmid = snapshot.guest.vmid,
            snapshot = %snapshot.name,
            "Removing Proxmox snapshot"
        );
        self.client
            .delete_snapshot(&snapshot.guest, &snapshot.name)?;
        Ok(())
    }

    fn revert_snapshot(&self, snapshot: &RawSnapshot) -> Result<()> {
        let snapshot = self.handle(snapshot)?;
        debug!(
            compute_resource = %self.name,
            vmid = snapshot.guest.vmid,
            snapshot = %snapshot.name,
            "Rolling back Proxmox snapshot"
        );
        self.client
            .rollback_snapshot(&snapshot.guest, &snapshot.name)?;
        Ok(())
    }

    fn update_snapshot(
        &self,
        snapshot: &RawSnapshot,
        name: &str,
        description: &str,
    ) -> Result<bool> {
        let snapshot = self.handle(snapshot)?;
        if snapshot.name != name {
            return Err(self.wrap_update_fault(ProxmoxError::RenameUnsupported {
                from: snapshot.name.clone(),
                to: name.to_string(),
            }));
        }

        self.client
            .set_snapshot_description(&snapshot.guest, &snapshot.name, description)
            .map_err(|e| self.wrap_update_fault(e))?;
        Ok(true)
    }

    fn get_snapshot(&self, host: &Host, snapshot_id: &str) -> Result<Option<RawSnapshot>> {
        let guest = self.find_vm_by_uuid(&host.uuid)?;
        let found = self
            .client
            .list_snapshots(&guest)?
            .into_iter()
            .find(|info| info.name == snapshot_id);
        Ok(found.map(|info| RawSnapshot::Proxmox(ProxmoxSnapshot::from_info(guest, info))))
    }

    fn get_snapshots(&self, host: &Host) -> Result<Vec<RawSnapshot>> {
        let guest = self.find_vm_by_uuid(&host.uuid)?;
        Ok(self
            .client
            .list_snapshots(&guest)?
            .into_iter()
            .map(|info| RawSnapshot::Proxmox(ProxmoxSnapshot::from_info(guest.clone(), info)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockOperation, MockProxmoxApi};
    use crate::HostId;

    fn setup() -> (Arc<MockProxmoxApi>, Arc<dyn SnapshotProvider>, Host) {
        let api = Arc::new(MockProxmoxApi::new());
        api.add_guest(ProxmoxGuest::new("pve1", 100, GuestKind::Qemu));
        let adapter: Arc<dyn SnapshotProvider> =
            Arc::new(ProxmoxAdapter::with_shared_client("pve", api.clone()));
        let host = Host::new(HostId(1), "web01", "1_100", adapter.clone());
        (api, adapter, host)
    }

    #[test]
    fn test_create_sets_description_in_second_call() {
        let (api, adapter, host) = setup();
        adapter
            .create_snapshot(&host, "nightly-1", "scheduled backup", SnapshotOptions::default())
            .unwrap();

        let snapshots = adapter.get_snapshots(&host).unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].name(), "nightly-1");
        assert_eq!(snapshots[0].reference(), "nightly-1");
        assert_eq!(snapshots[0].description(), "scheduled backup");
        assert!(snapshots[0].create_time().is_none());
        assert!(snapshots[0].child_snapshots().is_empty());

        let calls = api.calls();
        assert_eq!(calls[0], "find_guest 100");
        assert_eq!(calls[1], "create_snapshot 100 nightly-1 vmstate=false");
        assert_eq!(calls[2], "set_snapshot_description 100 nightly-1");
    }

    #[test]
    fn test_include_ram_only_for_qemu() {
        let (api, adapter, host) = setup();
        api.add_guest(ProxmoxGuest::new("pve2", 200, GuestKind::Lxc));
        let container = Host::new(HostId(2), "ct01", "1_200", adapter.clone());

        adapter
            .create_snapshot(&host, "with-ram", "", SnapshotOptions::with_ram())
            .unwrap();
        adapter
            .create_snapshot(&container, "ct-snap", "", SnapshotOptions::with_ram())
            .unwrap();

        let calls = api.calls();
        assert!(calls.contains(&"create_snapshot 100 with-ram vmstate=true".to_string()));
        assert!(calls.contains(&"create_snapshot 200 ct-snap vmstate=false".to_string()));
    }

    #[test]
    fn test_unknown_vm_is_not_found() {
        let (_, adapter, _) = setup();
        let ghost = Host::new(HostId(9), "ghost", "1_999", adapter.clone());
        let err = adapter.get_snapshots(&ghost).unwrap_err();
        assert!(matches!(err, SnapshotError::VmNotFound(uuid) if uuid == "1_999"));

        let garbage = Host::new(HostId(10), "bad", "not-a-vmid", adapter.clone());
        assert!(matches!(
            adapter.get_snapshots(&garbage),
            Err(SnapshotError::VmNotFound(_))
        ));
    }

    #[test]
    fn test_get_snapshot_missing_is_none() {
        let (_, adapter, host) = setup();
        assert!(adapter.get_snapshot(&host, "nope").unwrap().is_none());
    }

    #[test]
    fn test_update_description() {
        let (_, adapter, host) = setup();
        adapter
            .create_snapshot(&host, "s1", "old", SnapshotOptions::default())
            .unwrap();
        let raw = adapter.get_snapshot(&host, "s1").unwrap().unwrap();

        assert!(adapter.update_snapshot(&raw, "s1", "new").unwrap());
        let raw = adapter.get_snapshot(&host, "s1").unwrap().unwrap();
        assert_eq!(raw.description(), "new");
    }

    #[test]
    fn test_rename_is_wrapped_fault() {
        let (_, adapter, host) = setup();
        adapter
            .create_snapshot(&host, "s1", "", SnapshotOptions::default())
            .unwrap();
        let raw = adapter.get_snapshot(&host, "s1").unwrap().unwrap();

        match adapter.update_snapshot(&raw, "renamed", "") {
            Err(SnapshotError::Wrapped(wrapped)) => {
                assert_eq!(wrapped.message(), UPDATE_FAILED);
                assert!(wrapped.wrapped_error().to_string().contains("cannot be renamed"));
            }
            other => panic!("expected wrapped error, got {other:?}"),
        }
    }

    #[test]
    fn test_api_fault_on_update_is_wrapped_but_not_on_remove() {
        let (api, adapter, host) = setup();
        adapter
            .create_snapshot(&host, "s1", "", SnapshotOptions::default())
            .unwrap();
        let raw = adapter.get_snapshot(&host, "s1").unwrap().unwrap();

        api.inject_fault(MockOperation::Update, "snapshot is locked");
        assert!(adapter.update_snapshot(&raw, "s1", "x").unwrap_err().is_wrapped());

        api.inject_fault(MockOperation::Remove, "snapshot is locked");
        let err = adapter.remove_snapshot(&raw, false).unwrap_err();
        assert!(matches!(err, SnapshotError::Backend(_)));
    }

    #[test]
    fn test_remove_and_revert() {
        let (api, adapter, host) = setup();
        adapter
            .create_snapshot(&host, "s1", "", SnapshotOptions::default())
            .unwrap();
        let raw = adapter.get_snapshot(&host, "s1").unwrap().unwrap();

        adapter.revert_snapshot(&raw).unwrap();
        assert!(api.calls().contains(&"rollback_snapshot 100 s1".to_string()));

        adapter.remove_snapshot(&raw, false).unwrap();
        assert!(adapter.get_snapshots(&host).unwrap().is_empty());

        // No existence pre-check: removing again surfaces the backend error.
        assert!(adapter.remove_snapshot(&raw, false).is_err());
    }
}
