//! Bulk snapshot creation across hosts.

use std::sync::Arc;
use vsm_core::capability::CapabilitySet;
use vsm_core::error::{Result, SnapshotError};
use vsm_config::ProviderKind;
use vsm_provider::mock::{MockOperation, MockProxmoxApi, MockVsphereApi};
use vsm_provider::proxmox::{GuestKind, ProxmoxAdapter, ProxmoxGuest};
use vsm_provider::vsphere::VsphereAdapter;
use vsm_provider::{Host, HostId, RawSnapshot, SnapshotOptions, SnapshotProvider};
use vsm_snapshot::{create_for_hosts, BulkFailure, Snapshot};

/// A compute resource that cannot take snapshots at all.
struct PlainProvider;

impl SnapshotProvider for PlainProvider {
    fn name(&self) -> &str {
        "plain"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Proxmox
    }

    fn snapshot_capabilities(&self) -> CapabilitySet {
        CapabilitySet::new()
    }

    fn create_snapshot(&self, _: &Host, _: &str, _: &str, _: SnapshotOptions) -> Result<()> {
        panic!("create_snapshot called on a provider without snapshot support")
    }

    fn remove_snapshot(&self, _: &RawSnapshot, _: bool) -> Result<()> {
        Ok(())
    }

    fn revert_snapshot(&self, _: &RawSnapshot) -> Result<()> {
        Ok(())
    }

    fn update_snapshot(&self, _: &RawSnapshot, _: &str, _: &str) -> Result<bool> {
        Ok(true)
    }

    fn get_snapshot(&self, _: &Host, _: &str) -> Result<Option<RawSnapshot>> {
        Ok(None)
    }

    fn get_snapshots(&self, _: &Host) -> Result<Vec<RawSnapshot>> {
        Ok(Vec::new())
    }
}

struct Fleet {
    proxmox: Arc<MockProxmoxApi>,
    vsphere: Arc<MockVsphereApi>,
    pve: Arc<dyn SnapshotProvider>,
    vcenter: Arc<dyn SnapshotProvider>,
}

impl Fleet {
    fn new() -> Self {
        let proxmox = Arc::new(MockProxmoxApi::new());
        proxmox.add_guest(ProxmoxGuest::new("pve1", 100, GuestKind::Qemu));
        proxmox.add_guest(ProxmoxGuest::new("pve1", 101, GuestKind::Lxc));
        let vsphere = Arc::new(MockVsphereApi::new());
        vsphere.add_vm("uuid-db01", "vm-42");

        Self {
            pve: Arc::new(ProxmoxAdapter::with_shared_client("pve", proxmox.clone())),
            vcenter: Arc::new(VsphereAdapter::with_shared_client("vcenter", vsphere.clone())),
            proxmox,
            vsphere,
        }
    }

    fn host(&self, id: u64, name: &str, uuid: &str, provider: &Arc<dyn SnapshotProvider>) -> Arc<Host> {
        Arc::new(Host::new(HostId(id), name, uuid, Arc::clone(provider)))
    }
}

#[test]
fn test_mixed_fleet() {
    let fleet = Fleet::new();
    let plain: Arc<dyn SnapshotProvider> = Arc::new(PlainProvider);
    let hosts = vec![
        fleet.host(1, "web01", "pve1_100", &fleet.pve),
        fleet.host(2, "ghost", "pve1_999", &fleet.pve),
        fleet.host(3, "legacy", "anything", &plain),
        fleet.host(4, "db01", "uuid-db01", &fleet.vcenter),
        fleet.host(5, "cache01", "101", &fleet.pve),
    ];

    let report = create_for_hosts(&hosts, "pre-upgrade", "before kernel update", SnapshotOptions::default());

    assert_eq!(report.succeeded, vec!["web01", "db01", "cache01"]);
    assert_eq!(report.skipped, vec!["legacy"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].host, "ghost");
    assert!(report.failed[0].message.contains("999"));
    assert!(!report.is_success());
    assert_eq!(report.total(), hosts.len());
    assert_eq!(report.to_string(), "3 succeeded, 1 failed, 1 skipped");

    let web01 = Snapshot::all_for_host(&hosts[0]).unwrap();
    assert_eq!(web01.len(), 1);
    assert_eq!(web01[0].name(), "pre-upgrade");
    assert_eq!(web01[0].description(), "before kernel update");

    assert_eq!(fleet.vsphere.current_snapshot("vm-42").as_deref(), Some("snapshot-1"));
}

#[test]
fn test_backend_fault_does_not_stop_remaining_hosts() {
    let fleet = Fleet::new();
    fleet.proxmox.inject_fault(MockOperation::Create, "storage full");
    let hosts = vec![
        fleet.host(1, "web01", "pve1_100", &fleet.pve),
        fleet.host(5, "cache01", "pve1_101", &fleet.pve),
    ];

    let report = create_for_hosts(&hosts, "nightly", "", SnapshotOptions::with_ram());

    assert_eq!(
        report.failed,
        vec![BulkFailure {
            host: "web01".into(),
            message: "Backend error: Proxmox API returned 500: storage full".into(),
        }]
    );
    assert_eq!(report.succeeded, vec!["cache01"]);
    // RAM state is only saved for qemu guests.
    assert!(fleet
        .proxmox
        .calls()
        .contains(&"create_snapshot 101 nightly vmstate=false".to_string()));
}

#[test]
fn test_validation_errors_are_reported() {
    let fleet = Fleet::new();
    let hosts = vec![fleet.host(1, "web01", "pve1_100", &fleet.pve)];

    let report = create_for_hosts(&hosts, "  ", "", SnapshotOptions::default());

    assert_eq!(report.failed[0].message, "Name can't be blank");
    assert!(fleet.proxmox.calls().is_empty());
}

#[test]
fn test_empty_host_list() {
    let report = create_for_hosts(&[], "nightly", "", SnapshotOptions::default());
    assert!(report.is_success());
    assert_eq!(report.total(), 0);
    assert_eq!(report.to_string(), "0 succeeded, 0 failed, 0 skipped");
}

#[test]
fn test_report_serializes() {
    let fleet = Fleet::new();
    let plain: Arc<dyn SnapshotProvider> = Arc::new(PlainProvider);
    let hosts = vec![fleet.host(3, "legacy", "x", &plain)];

    let report = create_for_hosts(&hosts, "nightly", "", SnapshotOptions::default());
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(
        json,
        serde_json::json!({ "succeeded": [], "failed": [], "skipped": ["legacy"] })
    );
}

#[test]
fn test_finders_require_snapshot_support() {
    let plain: Arc<dyn SnapshotProvider> = Arc::new(PlainProvider);
    let host = Arc::new(Host::new(HostId(3), "legacy", "x", plain));

    assert!(matches!(
        Snapshot::all_for_host(&host),
        Err(SnapshotError::Unsupported { ref provider, .. }) if provider == "plain"
    ));
    assert!(matches!(
        Snapshot::find_for_host(&host, "s1"),
        Err(SnapshotError::Unsupported { .. })
    ));
}
