//! Snapshot backend abstraction.
//!
//! Every compute resource kind implements [`SnapshotProvider`], a uniform
//! set of snapshot operations over its vendor API. Adapters are generic over
//! a client trait ([`proxmox::ProxmoxApi`], [`vsphere::VsphereApi`]) so the
//! translation logic can be exercised without a live backend.

use indexmap::IndexMap;
use std::sync::Arc;
use vsm_config::{ComputeResourceConfig, ProviderKind, SnapshotConfig};
use vsm_core::capability::{Capability, CapabilitySet};
use vsm_core::error::{Result, SnapshotError};

pub mod host;
pub mod proxmox;
pub mod raw;
pub mod vsphere;

#[cfg(any(test, feature = "test-helpers"))]
pub mod mock;

pub use host::{Host, HostId};
pub use raw::{ParentRef, RawSnapshot};

/// Options accepted by [`SnapshotProvider::create_snapshot`].
///
/// Backends silently ignore options they cannot honour; check
/// [`Capability::SnapshotIncludeRam`] and
/// [`Capability::SnapshotIncludeQuiesce`] to know in advance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotOptions {
    pub include_ram: bool,
    pub quiesce: bool,
}

impl SnapshotOptions {
    pub fn with_ram() -> Self {
        Self {
            include_ram: true,
            quiesce: false,
        }
    }
}

/// Capabilities a backend kind has regardless of snapshot support.
pub fn base_capabilities(kind: ProviderKind) -> CapabilitySet {
    match kind {
        ProviderKind::Proxmox => CapabilitySet::from([
            Capability::Build,
            Capability::NewVolume,
            Capability::NewInterface,
            Capability::Image,
        ]),
        ProviderKind::Vmware => CapabilitySet::from([
            Capability::Build,
            Capability::Image,
            Capability::NewVolume,
            Capability::NewInterface,
        ]),
    }
}

/// The snapshot contract every compute resource adapter implements.
pub trait SnapshotProvider: Send + Sync {
    /// Name of the configured compute resource.
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    /// Capabilities this adapter adds on top of [`base_capabilities`].
    fn snapshot_capabilities(&self) -> CapabilitySet;

    /// Full capability set: the kind's base set plus the adapter's additions.
    fn capabilities(&self) -> CapabilitySet {
        base_capabilities(self.kind()).union(&self.snapshot_capabilities())
    }

    fn capable(&self, capability: Capability) -> bool {
        self.capabilities().contains(capability)
    }

    /// Take a snapshot of the VM backing `host`.
    ///
    /// Does not return the new snapshot; fetch it afterwards with
    /// [`SnapshotProvider::get_snapshots`].
    fn create_snapshot(
        &self,
        host: &Host,
        name: &str,
        description: &str,
        options: SnapshotOptions,
    ) -> Result<()>;

    /// Delete a snapshot. No existence check is made first.
    fn remove_snapshot(&self, snapshot: &RawSnapshot, remove_children: bool) -> Result<()>;

    /// Restore the VM to the state captured by `snapshot`.
    fn revert_snapshot(&self, snapshot: &RawSnapshot) -> Result<()>;

    /// Rename a snapshot and replace its description.
    ///
    /// Backend faults are returned as [`SnapshotError::Wrapped`].
    fn update_snapshot(&self, snapshot: &RawSnapshot, name: &str, description: &str)
        -> Result<bool>;

    /// Look up one snapshot by id. A missing snapshot is `Ok(None)`.
    fn get_snapshot(&self, host: &Host, snapshot_id: &str) -> Result<Option<RawSnapshot>>;

    /// All snapshots of the VM backing `host`.
    fn get_snapshots(&self, host: &Host) -> Result<Vec<RawSnapshot>>;
}

/// Creates the adapter for one configured compute resource.
pub fn get_provider(config: &ComputeResourceConfig) -> Result<Box<dyn SnapshotProvider>> {
    match config.provider {
        ProviderKind::Proxmox => {
            let client = proxmox::ProxmoxClient::new(config)?;
            Ok(Box::new(proxmox::ProxmoxAdapter::new(&config.name, client)))
        }
        ProviderKind::Vmware => {
            let client = vsphere::VsphereClient::new(config)?;
            Ok(Box::new(vsphere::VsphereAdapter::new(&config.name, client)))
        }
    }
}

/// Registry of configured compute resources, in configuration order.
#[derive(Default, Clone)]
pub struct ComputeResources {
    providers: IndexMap<String, Arc<dyn SnapshotProvider>>,
}

impl ComputeResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &SnapshotConfig) -> Result<Self> {
        let mut resources = Self::new();
        for resource in &config.compute_resources {
            let provider: Arc<dyn SnapshotProvider> = Arc::from(get_provider(resource)?);
            tracing::debug!(
                compute_resource = %resource.name,
                provider = resource.provider.as_str(),
                "Registered compute resource"
            );
            resources.insert(provider)?;
        }
        Ok(resources)
    }

    pub fn insert(&mut self, provider: Arc<dyn SnapshotProvider>) -> Result<()> {
        let name = provider.name().to_string();
        if self.providers.contains_key(&name) {
            return Err(SnapshotError::Config(format!(
                "compute resource '{name}' is already registered"
            )));
        }
        self.providers.insert(name, provider);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SnapshotProvider>> {
        self.providers.get(name).cloned()
    }

    /// Look up a compute resource and check it advertises `capability`.
    pub fn require(&self, name: &str, capability: Capability) -> Result<Arc<dyn SnapshotProvider>> {
        let provider = self.get(name).ok_or_else(|| {
            SnapshotError::Config(format!("unknown compute resource '{name}'"))
        })?;
        provider.capabilities().ensure(name, capability)?;
        Ok(provider)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vsm_config::AuthConfig;

    fn resource(name: &str, provider: ProviderKind) -> ComputeResourceConfig {
        let mut config = ComputeResourceConfig::new(name, provider, "https://backend.example.com");
        config.auth = AuthConfig {
            user: "admin".into(),
            password: Some("pw".into()),
            ..Default::default()
        };
        config
    }

    #[test]
    fn test_get_provider_builds_each_kind() {
        let pve = get_provider(&resource("pve", ProviderKind::Proxmox)).unwrap();
        assert_eq!(pve.name(), "pve");
        assert_eq!(pve.kind(), ProviderKind::Proxmox);

        let vc = get_provider(&resource("vc", ProviderKind::Vmware)).unwrap();
        assert_eq!(vc.kind(), ProviderKind::Vmware);
    }

    #[test]
    fn test_capabilities_extend_base_set() {
        let pve = get_provider(&resource("pve", ProviderKind::Proxmox)).unwrap();
        let caps = pve.capabilities();
        for cap in base_capabilities(ProviderKind::Proxmox).iter() {
            assert!(caps.contains(cap), "missing base capability {cap}");
        }
        assert!(pve.capable(Capability::Snapshots));
        assert!(pve.capable(Capability::SnapshotIncludeRam));
        assert!(!pve.capable(Capability::EditableSnapshotName));

        let vc = get_provider(&resource("vc", ProviderKind::Vmware)).unwrap();
        assert!(vc.capable(Capability::EditableSnapshotName));
        assert!(vc.capable(Capability::SnapshotIncludeQuiesce));
    }

    #[test]
    fn test_vsphere_rejects_token_auth() {
        let mut config = resource("vc", ProviderKind::Vmware);
        config.auth = AuthConfig {
            user: "admin".into(),
            token_id: Some("t".into()),
            token_secret: Some("s".into()),
            ..Default::default()
        };
        let err = get_provider(&config).err().unwrap();
        assert!(matches!(err, SnapshotError::Config(_)));
    }

    #[test]
    fn test_registry_from_config() {
        let config = SnapshotConfig {
            compute_resources: vec![
                resource("pve", ProviderKind::Proxmox),
                resource("vc", ProviderKind::Vmware),
            ],
        };
        let resources = ComputeResources::from_config(&config).unwrap();
        assert_eq!(resources.names().collect::<Vec<_>>(), vec!["pve", "vc"]);
        assert!(resources.require("vc", Capability::Snapshots).is_ok());

        let err = resources
            .require("pve", Capability::EditableSnapshotName)
            .err()
            .unwrap();
        assert!(matches!(err, SnapshotError::Unsupported { .. }));
        assert!(resources.require("missing", Capability::Snapshots).is_err());
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut resources = ComputeResources::new();
        let first: Arc<dyn SnapshotProvider> =
            Arc::from(get_provider(&resource("pve", ProviderKind::Proxmox)).unwrap());
        resources.insert(first.clone()).unwrap();
        assert!(resources.insert(first).is_err());
        assert_eq!(resources.len(), 1);
    }
}
