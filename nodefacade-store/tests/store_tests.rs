use nodefacade_store::{ChangeKind, ResourceStore, StoreError, SyncedVersions};
use nodefacade_types::{Resource, ResourceId, ResourceType};
use pretty_assertions::assert_eq;
use serde_json::json;

fn node() -> Resource {
    Resource::node(ResourceId::new(), json!({"label": "node"}))
}

fn child(resource_type: ResourceType, parent: ResourceId) -> Resource {
    Resource::child(resource_type, ResourceId::new(), parent, json!({"label": resource_type.as_str()}))
}

/// node -> device -> source -> flow, plus a sender on the device.
fn populated() -> (ResourceStore, Vec<ResourceId>) {
    let store = ResourceStore::new();
    let n = node();
    let d = child(ResourceType::Device, n.id);
    let s = child(ResourceType::Source, d.id);
    let f = child(ResourceType::Flow, s.id);
    let tx = child(ResourceType::Sender, d.id);
    let ids = vec![n.id, d.id, s.id, f.id, tx.id];
    for r in [n, d, s, f, tx] {
        store.put(r).unwrap();
    }
    (store, ids)
}

// ── Put ──────────────────────────────────────────────────────────

#[test]
fn put_node_assigns_version() {
    let store = ResourceStore::new();
    let n = node();
    let version = store.put(n.clone()).unwrap();

    assert_eq!(version, 1);
    let stored = store.get(&n.id).unwrap();
    assert_eq!(stored.version, 1);
    assert_eq!(stored.data, n.data);
    assert_eq!(store.node().unwrap().id, n.id);
}

#[test]
fn put_bumps_version_on_every_update() {
    let store = ResourceStore::new();
    let mut n = node();
    let v1 = store.put(n.clone()).unwrap();
    n.data = json!({"label": "renamed"});
    let v2 = store.put(n.clone()).unwrap();

    assert!(v2 > v1);
    assert_eq!(store.get(&n.id).unwrap().data["label"], json!("renamed"));
    assert_eq!(store.len(), 1);
}

#[test]
fn put_child_with_missing_parent_is_rejected() {
    let store = ResourceStore::new();
    let orphan = child(ResourceType::Device, ResourceId::new());
    let err = store.put(orphan.clone()).unwrap_err();

    assert!(matches!(err, StoreError::InvalidParent { id, .. } if id == orphan.id));
    assert!(store.is_empty());
    assert_eq!(store.revision(), 0);
}

#[test]
fn put_child_without_parent_is_rejected() {
    let store = ResourceStore::new();
    let dev = Resource::new(ResourceType::Device, ResourceId::new(), None, json!({}));
    assert!(matches!(store.put(dev), Err(StoreError::InvalidParent { .. })));
}

#[test]
fn put_child_under_wrong_parent_type_is_rejected() {
    let store = ResourceStore::new();
    let n = node();
    store.put(n.clone()).unwrap();
    // A flow must hang off a source, not the node.
    let flow = child(ResourceType::Flow, n.id);
    assert!(matches!(store.put(flow), Err(StoreError::InvalidParent { .. })));
}

#[test]
fn node_with_parent_is_rejected() {
    let store = ResourceStore::new();
    let n = Resource::new(ResourceType::Node, ResourceId::new(), Some(ResourceId::new()), json!({}));
    assert!(matches!(store.put(n), Err(StoreError::InvalidParent { .. })));
}

#[test]
fn second_node_is_rejected() {
    let store = ResourceStore::new();
    let first = node();
    store.put(first.clone()).unwrap();

    let err = store.put(node()).unwrap_err();
    assert_eq!(err, StoreError::DuplicateNode { existing: first.id });
}

#[test]
fn changing_type_is_rejected() {
    let (store, ids) = populated();
    let as_receiver = Resource::child(ResourceType::Receiver, ids[2], ids[1], json!({}));
    let err = store.put(as_receiver).unwrap_err();
    assert!(matches!(
        err,
        StoreError::TypeMismatch { existing: ResourceType::Source, requested: ResourceType::Receiver, .. }
    ));
}

#[test]
fn reparenting_moves_dependents() {
    let (store, ids) = populated();
    let n = ids[0];
    let d1 = ids[1];
    let d2 = child(ResourceType::Device, n);
    store.put(d2.clone()).unwrap();

    let mut sender = (*store.get(&ids[4]).unwrap()).clone();
    sender.parent = Some(d2.id);
    store.put(sender.clone()).unwrap();

    assert!(!store.dependents(&d1).contains(&sender.id));
    assert_eq!(store.dependents(&d2.id), vec![sender.id]);
}

// ── Delete ───────────────────────────────────────────────────────

#[test]
fn delete_missing_is_not_found() {
    let store = ResourceStore::new();
    let id = ResourceId::new();
    assert_eq!(store.delete(&id).unwrap_err(), StoreError::NotFound(id));
}

#[test]
fn delete_with_dependents_is_refused() {
    let (store, ids) = populated();
    let err = store.delete(&ids[1]).unwrap_err();
    assert_eq!(err, StoreError::HasDependents { id: ids[1], dependents: 2 });
    assert!(store.contains(&ids[1]));
}

#[test]
fn delete_leaf_first_then_parent() {
    let (store, ids) = populated();
    store.delete(&ids[3]).unwrap();
    store.delete(&ids[2]).unwrap();
    store.delete(&ids[4]).unwrap();
    store.delete(&ids[1]).unwrap();
    let removed = store.delete(&ids[0]).unwrap();

    assert!(removed.is_node());
    assert!(store.is_empty());
    assert!(store.node().is_none());
}

#[test]
fn delete_node_allows_a_new_node() {
    let store = ResourceStore::new();
    let first = node();
    store.put(first.clone()).unwrap();
    store.delete(&first.id).unwrap();

    let second = node();
    store.put(second.clone()).unwrap();
    assert_eq!(store.node().unwrap().id, second.id);
}

#[test]
fn delete_bumps_revision() {
    let (store, ids) = populated();
    let before = store.revision();
    store.delete(&ids[3]).unwrap();
    assert_eq!(store.revision(), before + 1);
}

// ── Snapshot ─────────────────────────────────────────────────────

#[test]
fn snapshot_is_parent_first() {
    let (store, _) = populated();
    let snapshot = store.snapshot();

    assert_eq!(snapshot.len(), 5);
    assert_eq!(snapshot.revision(), store.revision());
    assert!(snapshot.node().is_some());
    let types: Vec<_> = snapshot.resources().iter().map(|r| r.resource_type).collect();
    let mut sorted = types.clone();
    sorted.sort();
    assert_eq!(types, sorted);
}

#[test]
fn snapshot_is_unaffected_by_later_mutations() {
    let (store, ids) = populated();
    let snapshot = store.snapshot();
    store.delete(&ids[3]).unwrap();

    assert!(snapshot.get(&ids[3]).is_some());
    assert!(!store.contains(&ids[3]));
}

#[test]
fn empty_snapshot() {
    let snapshot = ResourceStore::new().snapshot();
    assert!(snapshot.is_empty());
    assert!(snapshot.node().is_none());
    assert_eq!(snapshot.revision(), 0);
}

// ── Diff ─────────────────────────────────────────────────────────

#[test]
fn diff_from_nothing_is_everything() {
    let (store, _) = populated();
    let diff = store.diff(&SyncedVersions::new());
    assert_eq!(diff.puts.len(), 5);
    assert!(diff.deletes.is_empty());
    assert_eq!(diff.puts[0].resource_type, ResourceType::Node);
}

#[test]
fn diff_from_snapshot_is_empty() {
    let (store, _) = populated();
    let acked = store.snapshot().versions();
    assert!(store.diff(&acked).is_empty());
}

#[test]
fn diff_coalesces_repeated_updates() {
    let (store, ids) = populated();
    let acked = store.snapshot().versions();

    let mut flow = (*store.get(&ids[3]).unwrap()).clone();
    flow.data = json!({"label": "v2"});
    store.put(flow.clone()).unwrap();
    flow.data = json!({"label": "v3"});
    let latest = store.put(flow.clone()).unwrap();

    let diff = store.diff(&acked);
    assert_eq!(diff.len(), 1);
    assert_eq!(diff.puts[0].version, latest);
    assert_eq!(diff.puts[0].data["label"], json!("v3"));
}

#[test]
fn diff_lists_deletes_child_first() {
    let (store, ids) = populated();
    let acked = store.snapshot().versions();
    store.delete(&ids[3]).unwrap();
    store.delete(&ids[2]).unwrap();

    let diff = store.diff(&acked);
    assert!(diff.puts.is_empty());
    let deleted: Vec<_> = diff.deletes.iter().map(|d| d.id).collect();
    assert_eq!(deleted, vec![ids[3], ids[2]]);
    assert_eq!(diff.deletes[0].resource_type, ResourceType::Flow);
}

#[test]
fn diff_of_create_then_delete_is_empty() {
    let (store, ids) = populated();
    let acked = store.snapshot().versions();
    let extra = child(ResourceType::Receiver, ids[1]);
    store.put(extra.clone()).unwrap();
    store.delete(&extra.id).unwrap();

    assert!(store.diff(&acked).is_empty());
}

#[test]
fn diff_of_recreated_id_with_new_type_deletes_old_registration() {
    let (store, ids) = populated();
    let acked = store.snapshot().versions();
    let sender_id = ids[4];
    store.delete(&sender_id).unwrap();
    store
        .put(Resource::child(ResourceType::Receiver, sender_id, ids[1], json!({})))
        .unwrap();

    let diff = store.diff(&acked);
    assert_eq!(diff.deletes.len(), 1);
    assert_eq!(diff.deletes[0].resource_type, ResourceType::Sender);
    assert_eq!(diff.puts.len(), 1);
    assert_eq!(diff.puts[0].resource_type, ResourceType::Receiver);
}

// ── Notifications ────────────────────────────────────────────────

#[tokio::test]
async fn subscribers_see_every_mutation_in_order() {
    let store = ResourceStore::new();
    let mut rx = store.subscribe();

    let n = node();
    let d = child(ResourceType::Device, n.id);
    store.put(n.clone()).unwrap();
    store.put(d.clone()).unwrap();
    store.delete(&d.id).unwrap();

    let first = rx.recv().await.unwrap();
    assert_eq!((first.id, first.kind, first.revision), (n.id, ChangeKind::Put, 1));
    let second = rx.recv().await.unwrap();
    assert_eq!((second.id, second.kind), (d.id, ChangeKind::Put));
    let third = rx.recv().await.unwrap();
    assert_eq!((third.id, third.kind, third.revision), (d.id, ChangeKind::Delete, 3));
}

#[test]
fn failed_mutations_are_not_announced() {
    let store = ResourceStore::new();
    let mut rx = store.subscribe();
    let _ = store.put(child(ResourceType::Device, ResourceId::new()));
    assert!(rx.try_recv().is_err());
}
