//! Snapshot tree navigation and presentation.

use std::sync::Arc;
use vsm_provider::mock::MockVsphereApi;
use vsm_provider::vsphere::{MoRef, VsphereAdapter, VsphereSnapshot};
use vsm_provider::{Host, HostId, RawSnapshot, SnapshotProvider};
use vsm_snapshot::{LifecycleEvent, Snapshot, SnapshotCallbacks};

fn host() -> Arc<Host> {
    let api = Arc::new(MockVsphereApi::new());
    let adapter: Arc<dyn SnapshotProvider> =
        Arc::new(VsphereAdapter::with_shared_client("vcenter", api));
    Arc::new(Host::new(HostId(7), "app01", "uuid-7", adapter))
}

fn node(value: &str, children: Vec<VsphereSnapshot>) -> VsphereSnapshot {
    VsphereSnapshot::new(
        MoRef::snapshot(value),
        MoRef::virtual_machine("vm-7"),
        format!("{value}-name"),
    )
    .with_children(children)
}

fn ids(snapshots: &[Snapshot]) -> Vec<&str> {
    snapshots.iter().filter_map(|s| s.id()).collect()
}

#[test]
fn test_children_are_breadth_then_depth() {
    // root -> [a -> [c], b]
    let root = node("root", vec![node("a", vec![node("c", vec![])]), node("b", vec![])]);
    let snapshot = Snapshot::from_raw(host(), RawSnapshot::from(root), None);

    let children = snapshot.children();
    assert_eq!(ids(&children), vec!["a", "b", "c"]);

    let parent_of = |id: &str| {
        children
            .iter()
            .find(|s| s.id() == Some(id))
            .and_then(|s| s.parent())
            .map(|p| p.id.clone())
    };
    assert_eq!(parent_of("a").as_deref(), Some("root"));
    assert_eq!(parent_of("b").as_deref(), Some("root"));
    assert_eq!(parent_of("c").as_deref(), Some("a"));
}

#[test]
fn test_descendants_follow_each_child_in_order() {
    // root -> [a -> [c -> [d]], b -> [e]]
    let root = node(
        "root",
        vec![
            node("a", vec![node("c", vec![node("d", vec![])])]),
            node("b", vec![node("e", vec![])]),
        ],
    );
    let snapshot = Snapshot::from_raw(host(), RawSnapshot::from(root), None);
    assert_eq!(ids(&snapshot.children()), vec!["a", "b", "c", "d", "e"]);
}

#[test]
fn test_repeated_references_are_visited_once() {
    // A node that lists itself, and a reference reachable twice.
    let root = node(
        "root",
        vec![
            node("a", vec![node("root", vec![]), node("b", vec![])]),
            node("b", vec![]),
        ],
    );
    let snapshot = Snapshot::from_raw(host(), RawSnapshot::from(root), None);
    assert_eq!(ids(&snapshot.children()), vec!["a", "b"]);
}

#[test]
fn test_children_are_recomputed_each_call() {
    let root = node("root", vec![node("a", vec![])]);
    let snapshot = Snapshot::from_raw(host(), RawSnapshot::from(root), None);
    assert_eq!(snapshot.children().len(), 1);
    assert_eq!(snapshot.children().len(), 1);
}

#[test]
fn test_fresh_snapshot_has_no_children() {
    assert!(Snapshot::new(host()).children().is_empty());
}

#[test]
fn test_explicit_parent_wins_over_raw_parent() {
    let mut raw = node("a", vec![]);
    raw.parent = Some(vsm_provider::ParentRef {
        id: "root".into(),
        name: "root-name".into(),
    });
    let from_raw = Snapshot::from_raw(host(), RawSnapshot::from(raw.clone()), None);
    assert_eq!(from_raw.parent().map(|p| p.id.as_str()), Some("root"));

    let explicit = Snapshot::from_raw(
        host(),
        RawSnapshot::from(raw),
        Some(vsm_provider::ParentRef {
            id: "other".into(),
            name: "other-name".into(),
        }),
    );
    assert_eq!(explicit.parent().map(|p| p.id.as_str()), Some("other"));
}

#[test]
fn test_children_inherit_callbacks() {
    let callbacks = SnapshotCallbacks::new().before(LifecycleEvent::Destroy, |_| false);
    let root = node("root", vec![node("a", vec![])]);
    let snapshot = Snapshot::from_raw(host(), RawSnapshot::from(root), None)
        .with_callbacks(Arc::new(callbacks));

    let mut child = snapshot.children().remove(0);
    // The inherited before hook halts without reaching the backend.
    assert!(!child.destroy().unwrap());
    assert_eq!(child.id(), Some("a"));
}

#[test]
fn test_presentation() {
    let mut raw = node("root", vec![node("a", vec![])]);
    raw.description = "clean install".into();
    raw.create_time = chrono::DateTime::from_timestamp(1_709_288_130, 0);
    let snapshot = Snapshot::from_raw(host(), RawSnapshot::from(raw), None);

    assert_eq!(snapshot.to_string(), "Snapshot");
    assert_eq!(
        snapshot.formatted_create_time().as_deref(),
        Some("2024-03-01 10:15")
    );

    let debug = format!("{snapshot:?}");
    assert!(debug.contains(r#"name: "root-name""#));
    assert!(debug.contains(r#"id: Some("root")"#));
    assert!(debug.contains(r#"description: "clean install""#));
    assert!(debug.contains("host_id: HostId(7)"));
    assert!(debug.contains("parent: None"));
    assert!(debug.contains(r#"children: ["a"]"#));
}
