//! Backend-native snapshot handles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use vsm_config::ProviderKind;

use crate::proxmox::ProxmoxSnapshot;
use crate::vsphere::VsphereSnapshot;

/// Reference to the snapshot a node hangs under in a snapshot tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    pub id: String,
    pub name: String,
}

/// A snapshot as returned by a backend, with uniform read accessors.
///
/// Adapters only accept handles of their own variant.
#[derive(Debug, Clone, PartialEq)]
pub enum RawSnapshot {
    Proxmox(ProxmoxSnapshot),
    Vsphere(Arc<VsphereSnapshot>),
}

impl From<VsphereSnapshot> for RawSnapshot {
    fn from(snapshot: VsphereSnapshot) -> Self {
        RawSnapshot::Vsphere(Arc::new(snapshot))
    }
}

impl RawSnapshot {
    pub fn kind(&self) -> ProviderKind {
        match self {
            RawSnapshot::Proxmox(_) => ProviderKind::Proxmox,
            RawSnapshot::Vsphere(_) => ProviderKind::Vmware,
        }
    }

    /// Backend identifier: the name on Proxmox, the managed object id on vSphere.
    pub fn reference(&self) -> &str {
        match self {
            RawSnapshot::Proxmox(s) => &s.name,
            RawSnapshot::Vsphere(s) => &s.snapshot.value,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            RawSnapshot::Proxmox(s) => &s.name,
            RawSnapshot::Vsphere(s) => &s.name,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            RawSnapshot::Proxmox(s) => &s.description,
            RawSnapshot::Vsphere(s) => &s.description,
        }
    }

    /// Proxmox snapshots are presented without a creation time.
    pub fn create_time(&self) -> Option<DateTime<Utc>> {
        match self {
            RawSnapshot::Proxmox(_) => None,
            RawSnapshot::Vsphere(s) => s.create_time,
        }
    }

    /// Direct children. Always empty for flat backends.
    pub fn child_snapshots(&self) -> Vec<RawSnapshot> {
        match self {
            RawSnapshot::Proxmox(_) => Vec::new(),
            RawSnapshot::Vsphere(s) => s
                .children
                .iter()
                .cloned()
                .map(RawSnapshot::Vsphere)
                .collect(),
        }
    }

    pub fn parent_reference(&self) -> Option<ParentRef> {
        match self {
            RawSnapshot::Proxmox(_) => None,
            RawSnapshot::Vsphere(s) => s.parent.clone(),
        }
    }
}
