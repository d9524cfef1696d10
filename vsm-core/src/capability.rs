//! Capability tags advertised by compute resources.
//!
//! Each backend kind has a fixed base set; adapters extend it with the
//! features they layer on top (snapshots and their options). Sets only ever
//! grow by union, so an adapter can never hide a base capability.

use crate::error::{Result, SnapshotError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Build,
    Image,
    NewVolume,
    NewInterface,
    Snapshots,
    SnapshotIncludeRam,
    SnapshotIncludeQuiesce,
    EditableSnapshotName,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Build => "build",
            Capability::Image => "image",
            Capability::NewVolume => "new_volume",
            Capability::NewInterface => "new_interface",
            Capability::Snapshots => "snapshots",
            Capability::SnapshotIncludeRam => "snapshot_include_ram",
            Capability::SnapshotIncludeQuiesce => "snapshot_include_quiesce",
            Capability::EditableSnapshotName => "editable_snapshot_name",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single capability, returning the extended set.
    pub fn with(mut self, capability: Capability) -> Self {
        self.0.insert(capability);
        self
    }

    /// Union of two sets.
    pub fn union(mut self, other: &CapabilitySet) -> Self {
        self.0.extend(other.0.iter().copied());
        self
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// Fail with [`SnapshotError::Unsupported`] when `capability` is missing.
    pub fn ensure(&self, provider: &str, capability: Capability) -> Result<()> {
        if self.contains(capability) {
            Ok(())
        } else {
            Err(SnapshotError::Unsupported {
                provider: provider.to_string(),
                capability: capability.to_string(),
            })
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[Capability; N]> for CapabilitySet {
    fn from(caps: [Capability; N]) -> Self {
        caps.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_is_additive() {
        let base = CapabilitySet::from([Capability::Build, Capability::Image]);
        let extra = CapabilitySet::from([Capability::Snapshots, Capability::Build]);
        let merged = base.clone().union(&extra);

        assert_eq!(merged.len(), 3);
        for cap in base.iter() {
            assert!(merged.contains(cap));
        }
        assert!(merged.contains(Capability::Snapshots));
    }

    #[test]
    fn test_ensure_reports_missing_capability() {
        let caps = CapabilitySet::new().with(Capability::Build);
        assert!(caps.ensure("pve", Capability::Build).is_ok());

        let err = caps.ensure("pve", Capability::Snapshots).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Compute resource 'pve' does not support snapshots"
        );
    }

    #[test]
    fn test_capability_serializes_as_snake_case() {
        let json = serde_json::to_string(&Capability::SnapshotIncludeRam).unwrap();
        assert_eq!(json, "\"snapshot_include_ram\"");
    }
}
