use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::raw::ParentRef;

/// vSphere managed object reference, e.g. `VirtualMachine:vm-42`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MoRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl MoRef {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }

    pub fn virtual_machine(value: impl Into<String>) -> Self {
        Self::new("VirtualMachine", value)
    }

    pub fn snapshot(value: impl Into<String>) -> Self {
        Self::new("VirtualMachineSnapshot", value)
    }
}

impl fmt::Display for MoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// One node of a VM's snapshot tree (`VirtualMachineSnapshotTree`).
///
/// Subtrees are shared, so handing out a node never copies its descendants.
#[derive(Debug, Clone, PartialEq)]
pub struct VsphereSnapshot {
    pub snapshot: MoRef,
    pub vm: MoRef,
    pub name: String,
    pub description: String,
    pub id: i32,
    pub create_time: Option<DateTime<Utc>>,
    pub state: String,
    pub quiesced: bool,
    pub parent: Option<ParentRef>,
    pub children: Vec<Arc<VsphereSnapshot>>,
}

impl VsphereSnapshot {
    pub fn new(snapshot: MoRef, vm: MoRef, name: impl Into<String>) -> Self {
        Self {
            snapshot,
            vm,
            name: name.into(),
            description: String::new(),
            id: 0,
            create_time: None,
            state: "poweredOff".to_string(),
            quiesced: false,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = VsphereSnapshot>) -> Self {
        self.children = children.into_iter().map(Arc::new).collect();
        self
    }

    fn as_parent(&self) -> ParentRef {
        ParentRef {
            id: self.snapshot.value.clone(),
            name: self.name.clone(),
        }
    }
}

/// Fill in `parent` on every node below `roots`.
pub fn link_parents(roots: &mut [Arc<VsphereSnapshot>]) {
    fn link(node: &mut VsphereSnapshot) {
        let me = node.as_parent();
        for child in &mut node.children {
            let child = Arc::make_mut(child);
            child.parent = Some(me.clone());
            link(child);
        }
    }
    for root in roots.iter_mut() {
        let root = Arc::make_mut(root);
        root.parent = None;
        link(root);
    }
}

/// Pre-order walk of the tree: each node before its descendants.
pub fn flatten(roots: &[Arc<VsphereSnapshot>]) -> Vec<&Arc<VsphereSnapshot>> {
    let mut out = Vec::new();
    let mut stack: Vec<&Arc<VsphereSnapshot>> = roots.iter().rev().collect();
    while let Some(node) = stack.pop() {
        out.push(node);
        stack.extend(node.children.iter().rev());
    }
    out
}
