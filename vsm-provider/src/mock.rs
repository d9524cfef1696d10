//! In-memory backends for exercising the adapters and the entity layer
//! without a live Proxmox or vCenter.

use chrono::DateTime;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::proxmox::{ProxmoxApi, ProxmoxError, ProxmoxGuest, ProxmoxSnapshotInfo};
use crate::vsphere::{flatten, MoRef, VsphereApi, VsphereError, VsphereSnapshot};

/// Backend call that [`MockProxmoxApi::inject_fault`] and
/// [`MockVsphereApi::inject_fault`] can make fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    Find,
    List,
    Create,
    Update,
    Remove,
    Revert,
}

/// Recorded calls and one-shot faults shared by both mocks.
#[derive(Debug, Default)]
struct Journal {
    calls: Vec<String>,
    faults: HashMap<MockOperation, String>,
}

impl Journal {
    /// Record a call, returning the injected fault message if one is armed.
    fn record(&mut self, op: MockOperation, call: String) -> Option<String> {
        self.calls.push(call);
        self.faults.remove(&op)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Proxmox
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ProxmoxState {
    guests: Vec<ProxmoxGuest>,
    snapshots: HashMap<u32, Vec<ProxmoxSnapshotInfo>>,
    journal: Journal,
}

#[derive(Debug, Default)]
pub struct MockProxmoxApi {
    state: Mutex<ProxmoxState>,
}

impl MockProxmoxApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_guest(&self, guest: ProxmoxGuest) {
        let mut state = lock(&self.state);
        state.snapshots.entry(guest.vmid).or_default();
        state.guests.push(guest);
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).journal.calls.clone()
    }

    /// Make the next call of `op` fail with an API error carrying `message`.
    pub fn inject_fault(&self, op: MockOperation, message: impl Into<String>) {
        lock(&self.state).journal.faults.insert(op, message.into());
    }

    fn begin(
        &self,
        op: MockOperation,
        call: String,
    ) -> Result<MutexGuard<'_, ProxmoxState>, ProxmoxError> {
        let mut state = lock(&self.state);
        match state.journal.record(op, call) {
            Some(message) => Err(api_error(message)),
            None => Ok(state),
        }
    }
}

fn api_error(message: impl Into<String>) -> ProxmoxError {
    ProxmoxError::Api {
        status: 500,
        message: message.into(),
    }
}

fn missing(name: &str) -> ProxmoxError {
    api_error(format!("snapshot '{name}' does not exist"))
}

impl ProxmoxApi for MockProxmoxApi {
    fn find_guest(&self, vmid: u32) -> Result<Option<ProxmoxGuest>, ProxmoxError> {
        let state = self.begin(MockOperation::Find, format!("find_guest {vmid}"))?;
        Ok(state.guests.iter().find(|g| g.vmid == vmid).cloned())
    }

    fn list_snapshots(&self, guest: &ProxmoxGuest) -> Result<Vec<ProxmoxSnapshotInfo>, ProxmoxError> {
        let state = self.begin(MockOperation::List, format!("list_snapshots {}", guest.vmid))?;
        Ok(state.snapshots.get(&guest.vmid).cloned().unwrap_or_default())
    }

    fn create_snapshot(
        &self,
        guest: &ProxmoxGuest,
        name: &str,
        vmstate: bool,
    ) -> Result<(), ProxmoxError> {
        let mut state = self.begin(
            MockOperation::Create,
            format!("create_snapshot {} {name} vmstate={vmstate}", guest.vmid),
        )?;
        let snapshots = state.snapshots.entry(guest.vmid).or_default();
        if snapshots.iter().any(|s| s.name == name) {
            return Err(api_error(format!("snapshot name '{name}' already used")));
        }
        let parent = snapshots.last().map(|s| s.name.clone());
        let snaptime = 1_700_000_000 + snapshots.len() as i64;
        snapshots.push(ProxmoxSnapshotInfo {
            name: name.to_string(),
            description: String::new(),
            parent,
            snaptime: Some(snaptime),
            vmstate: vmstate.then_some(1),
        });
        Ok(())
    }

    fn set_snapshot_description(
        &self,
        guest: &ProxmoxGuest,
        name: &str,
        description: &str,
    ) -> Result<(), ProxmoxError> {
        let mut state = self.begin(
            MockOperation::Update,
            format!("set_snapshot_description {} {name}", guest.vmid),
        )?;
        let snapshot = state
            .snapshots
            .get_mut(&guest.vmid)
            .and_then(|list| list.iter_mut().find(|s| s.name == name))
            .ok_or_else(|| missing(name))?;
        snapshot.description = description.to_string();
        Ok(())
    }

    fn delete_snapshot(&self, guest: &ProxmoxGuest, name: &str) -> Result<(), ProxmoxError> {
        let mut state = self.begin(
            MockOperation::Remove,
            format!("delete_snapshot {} {name}", guest.vmid),
        )?;
        let list = state.snapshots.entry(guest.vmid).or_default();
        let before = list.len();
        list.retain(|s| s.name != name);
        if list.len() == before {
            return Err(missing(name));
        }
        Ok(())
    }

    fn rollback_snapshot(&self, guest: &ProxmoxGuest, name: &str) -> Result<(), ProxmoxError> {
        let state = self.begin(
            MockOperation::Revert,
            format!("rollback_snapshot {} {name}", guest.vmid),
        )?;
        let exists = state
            .snapshots
            .get(&guest.vmid)
            .is_some_and(|list| list.iter().any(|s| s.name == name));
        if exists {
            Ok(())
        } else {
            Err(missing(name))
        }
    }
}

// ---------------------------------------------------------------------------
// vSphere
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct VmState {
    roots: Vec<Arc<VsphereSnapshot>>,
    current: Option<String>,
}

#[derive(Debug, Default)]
struct VsphereState {
    vms: HashMap<String, MoRef>,
    trees: HashMap<String, VmState>,
    next_id: i32,
    journal: Journal,
}

impl VsphereState {
    /// The VM owning snapshot `value`.
    fn owner(&mut self, value: &str) -> Result<&mut VmState, VsphereError> {
        self.trees
            .values_mut()
            .find(|vm| contains(&vm.roots, value))
            .ok_or_else(|| not_found(value))
    }
}

/// vSphere snapshot tree kept in memory. New snapshots hang under the
/// VM's current snapshot and become current, as on a real host.
#[derive(Debug, Default)]
pub struct MockVsphereApi {
    state: Mutex<VsphereState>,
}

impl MockVsphereApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vm(&self, uuid: impl Into<String>, vm: impl Into<String>) {
        let vm = MoRef::virtual_machine(vm);
        let mut state = lock(&self.state);
        state.trees.entry(vm.value.clone()).or_default();
        state.vms.insert(uuid.into(), vm);
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).journal.calls.clone()
    }

    /// Reference of the VM's current snapshot, if any.
    pub fn current_snapshot(&self, vm: &str) -> Option<String> {
        lock(&self.state)
            .trees
            .get(vm)
            .and_then(|tree| tree.current.clone())
    }

    /// Make the next call of `op` fail with a SOAP fault carrying `message`.
    pub fn inject_fault(&self, op: MockOperation, message: impl Into<String>) {
        lock(&self.state).journal.faults.insert(op, message.into());
    }

    fn begin(
        &self,
        op: MockOperation,
        call: String,
    ) -> Result<MutexGuard<'_, VsphereState>, VsphereError> {
        let mut state = lock(&self.state);
        match state.journal.record(op, call) {
            Some(message) => Err(fault("InvalidState", message)),
            None => Ok(state),
        }
    }
}

fn fault(kind: &str, message: impl Into<String>) -> VsphereError {
    VsphereError::Fault {
        code: "ServerFaultCode".to_string(),
        message: message.into(),
        kind: Some(kind.to_string()),
    }
}

fn not_found(value: &str) -> VsphereError {
    fault(
        "ManagedObjectNotFound",
        format!("The object 'vim.vm.Snapshot:{value}' has already been deleted or has not been completely created"),
    )
}

fn contains(nodes: &[Arc<VsphereSnapshot>], value: &str) -> bool {
    flatten(nodes).iter().any(|n| n.snapshot.value == value)
}

/// Unshares only the nodes on the path to `value`.
fn find_mut<'a>(nodes: &'a mut [Arc<VsphereSnapshot>], value: &str) -> Option<&'a mut VsphereSnapshot> {
    let node = nodes
        .iter_mut()
        .find(|n| n.snapshot.value == value || contains(&n.children, value))?;
    let node = Arc::make_mut(node);
    if node.snapshot.value == value {
        Some(node)
    } else {
        find_mut(&mut node.children, value)
    }
}

fn parent_of(nodes: &[Arc<VsphereSnapshot>], value: &str) -> Option<String> {
    for node in nodes {
        if node.children.iter().any(|c| c.snapshot.value == value) {
            return Some(node.snapshot.value.clone());
        }
        if let Some(parent) = parent_of(&node.children, value) {
            return Some(parent);
        }
    }
    None
}

/// Remove `value` from the tree. Without `remove_children` its children
/// take its place under its parent.
fn remove_node(nodes: &mut Vec<Arc<VsphereSnapshot>>, value: &str, remove_children: bool) -> bool {
    if let Some(pos) = nodes.iter().position(|n| n.snapshot.value == value) {
        let removed = nodes.remove(pos);
        if !remove_children {
            nodes.splice(pos..pos, removed.children.iter().cloned());
        }
        return true;
    }
    match nodes.iter_mut().find(|n| contains(&n.children, value)) {
        Some(parent) => remove_node(&mut Arc::make_mut(parent).children, value, remove_children),
        None => false,
    }
}

impl VsphereApi for MockVsphereApi {
    fn find_vm_by_uuid(&self, uuid: &str) -> Result<Option<MoRef>, VsphereError> {
        let state = self.begin(MockOperation::Find, format!("find_vm_by_uuid {uuid}"))?;
        Ok(state.vms.get(uuid).cloned())
    }

    fn snapshot_tree(&self, vm: &MoRef) -> Result<Vec<Arc<VsphereSnapshot>>, VsphereError> {
        let state = self.begin(MockOperation::List, format!("snapshot_tree {}", vm.value))?;
        Ok(state
            .trees
            .get(&vm.value)
            .map(|tree| tree.roots.clone())
            .unwrap_or_default())
    }

    fn create_snapshot(
        &self,
        vm: &MoRef,
        name: &str,
        description: &str,
        memory: bool,
        quiesce: bool,
    ) -> Result<MoRef, VsphereError> {
        let mut state = self.begin(
            MockOperation::Create,
            format!(
                "create_snapshot {} {name} memory={memory} quiesce={quiesce}",
                vm.value
            ),
        )?;
        state.next_id += 1;
        let id = state.next_id;

        let reference = MoRef::snapshot(format!("snapshot-{id}"));
        let mut snapshot = VsphereSnapshot::new(reference.clone(), vm.clone(), name);
        snapshot.description = description.to_string();
        snapshot.id = id;
        snapshot.create_time = DateTime::from_timestamp(1_704_067_200 + i64::from(id) * 60, 0);
        snapshot.state = if memory { "poweredOn" } else { "poweredOff" }.to_string();
        snapshot.quiesced = quiesce;

        let tree = state.trees.entry(vm.value.clone()).or_default();
        let current = tree.current.clone();
        match current.as_deref().and_then(|c| find_mut(&mut tree.roots, c)) {
            Some(parent) => parent.children.push(Arc::new(snapshot)),
            None => tree.roots.push(Arc::new(snapshot)),
        }
        tree.current = Some(reference.value.clone());
        Ok(reference)
    }

    fn remove_snapshot(&self, snapshot: &MoRef, remove_children: bool) -> Result<(), VsphereError> {
        let mut state = self.begin(
            MockOperation::Remove,
            format!("remove_snapshot {} children={remove_children}", snapshot.value),
        )?;
        let tree = state.owner(&snapshot.value)?;
        let parent = parent_of(&tree.roots, &snapshot.value);
        remove_node(&mut tree.roots, &snapshot.value, remove_children);

        let current_gone = tree
            .current
            .as_deref()
            .is_some_and(|c| !contains(&tree.roots, c));
        if current_gone {
            tree.current = parent;
        }
        Ok(())
    }

    fn revert_to_snapshot(&self, snapshot: &MoRef) -> Result<(), VsphereError> {
        let mut state = self.begin(
            MockOperation::Revert,
            format!("revert_to_snapshot {}", snapshot.value),
        )?;
        let tree = state.owner(&snapshot.value)?;
        tree.current = Some(snapshot.value.clone());
        Ok(())
    }

    fn rename_snapshot(
        &self,
        snapshot: &MoRef,
        name: &str,
        description: &str,
    ) -> Result<(), VsphereError> {
        let mut state = self.begin(
            MockOperation::Update,
            format!("rename_snapshot {} {name}", snapshot.value),
        )?;
        let tree = state.owner(&snapshot.value)?;
        let node = find_mut(&mut tree.roots, &snapshot.value).ok_or_else(|| not_found(&snapshot.value))?;
        node.name = name.to_string();
        node.description = description.to_string();
        Ok(())
    }
}
