use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestKind {
    Qemu,
    Lxc,
}

impl GuestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuestKind::Qemu => "qemu",
            GuestKind::Lxc => "lxc",
        }
    }
}

/// Location of a guest inside a Proxmox cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxmoxGuest {
    pub node: String,
    pub vmid: u32,
    pub kind: GuestKind,
}

impl ProxmoxGuest {
    pub fn new(node: impl Into<String>, vmid: u32, kind: GuestKind) -> Self {
        Self {
            node: node.into(),
            vmid,
            kind,
        }
    }

    /// Path segments of the guest below `/api2/json`.
    pub(crate) fn segments(&self) -> Vec<String> {
        vec![
            "nodes".to_string(),
            self.node.clone(),
            self.kind.as_str().to_string(),
            self.vmid.to_string(),
        ]
    }
}

/// One entry of `GET /nodes/{node}/{type}/{vmid}/snapshot`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxmoxSnapshotInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snaptime: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vmstate: Option<u8>,
}

/// Raw Proxmox snapshot handle. The name doubles as identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxmoxSnapshot {
    pub guest: ProxmoxGuest,
    pub name: String,
    pub description: String,
    pub vmstate: bool,
}

impl ProxmoxSnapshot {
    pub fn from_info(guest: ProxmoxGuest, info: ProxmoxSnapshotInfo) -> Self {
        Self {
            guest,
            name: info.name,
            description: info.description,
            vmstate: info.vmstate.unwrap_or(0) != 0,
        }
    }
}

/// Extract the vmid from a host uuid of the form `<node>_<vmid>` or `<vmid>`.
pub fn parse_vmid(uuid: &str) -> Option<u32> {
    uuid.rsplit('_').next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vmid() {
        assert_eq!(parse_vmid("1_100"), Some(100));
        assert_eq!(parse_vmid("pve-node1_4242"), Some(4242));
        assert_eq!(parse_vmid("105"), Some(105));
        assert_eq!(parse_vmid("1_"), None);
        assert_eq!(parse_vmid("420a7c6e-aaaa-bbbb-cccc-123456789abc"), None);
    }

    #[test]
    fn test_snapshot_info_deserializes_listing() {
        let listing = r#"[
            {"name":"nightly-1","description":"scheduled backup","snaptime":1700000000,"vmstate":1},
            {"name":"current","digest":"abc","running":1,"description":"You are here!","parent":"nightly-1"}
        ]"#;
        let infos: Vec<ProxmoxSnapshotInfo> = serde_json::from_str(listing).unwrap();
        assert_eq!(infos.len(), 2);

        let guest = ProxmoxGuest::new("pve1", 100, GuestKind::Qemu);
        let snapshot = ProxmoxSnapshot::from_info(guest, infos[0].clone());
        assert_eq!(snapshot.name, "nightly-1");
        assert!(snapshot.vmstate);
        assert_eq!(infos[1].parent.as_deref(), Some("nightly-1"));
    }
}
