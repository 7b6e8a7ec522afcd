//! The resource store.
//!
//! Holds every resource this node owns, keyed by id, along with a parent to
//! children index used to refuse orphaning deletes. All mutations go through
//! one write lock and take the next store revision as their version, so a
//! version is never reused even across delete and re-create.

use crate::error::{StoreError, StoreResult};
use nodefacade_types::{Resource, ResourceId, ResourceType, VersionStamp};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the mutation notification channel. Slow subscribers see
/// `Lagged` and should fall back to a fresh [`Diff`].
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// What a consumer has acknowledged, per resource.
pub type SyncedVersions = HashMap<ResourceId, VersionStamp>;

/// Kind of mutation reported to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Put,
    Delete,
}

/// Notification sent after every applied mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreChange {
    /// Store revision after the mutation.
    pub revision: u64,
    pub id: ResourceId,
    pub resource_type: ResourceType,
    pub kind: ChangeKind,
}

/// An immutable, consistent view of the whole store.
///
/// Resources are ordered parent-first (by type, then id).
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    revision: u64,
    resources: Vec<Arc<Resource>>,
}

impl Snapshot {
    /// Store revision this view was taken at.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// All resources, parent-first.
    pub fn resources(&self) -> &[Arc<Resource>] {
        &self.resources
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Looks up a resource in this view.
    pub fn get(&self, id: &ResourceId) -> Option<&Arc<Resource>> {
        self.resources.iter().find(|r| r.id == *id)
    }

    /// The node resource, if one is stored.
    pub fn node(&self) -> Option<&Arc<Resource>> {
        self.resources
            .first()
            .filter(|r| r.resource_type == ResourceType::Node)
    }

    /// The version of every resource in this view.
    pub fn versions(&self) -> SyncedVersions {
        self.resources.iter().map(|r| (r.id, r.stamp())).collect()
    }
}

/// A resource a consumer knows about that must be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Removal {
    pub id: ResourceId,
    pub resource_type: ResourceType,
}

/// The changes that bring a consumer from an acknowledged state to the
/// current one.
///
/// Each changed resource appears once with its latest state, however many
/// versions it went through. Puts are ordered parent-first, deletes
/// child-first.
#[derive(Debug, Clone, Default)]
pub struct Diff {
    /// Store revision the diff was computed at.
    pub revision: u64,
    pub puts: Vec<Arc<Resource>>,
    pub deletes: Vec<Removal>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.puts.is_empty() && self.deletes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.puts.len() + self.deletes.len()
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    resources: HashMap<ResourceId, Arc<Resource>>,
    children: HashMap<ResourceId, BTreeSet<ResourceId>>,
    node: Option<ResourceId>,
    revision: u64,
}

impl StoreInner {
    fn validate(&self, resource: &Resource) -> StoreResult<()> {
        if let Some(existing) = self.resources.get(&resource.id) {
            if existing.resource_type != resource.resource_type {
                return Err(StoreError::TypeMismatch {
                    id: resource.id,
                    existing: existing.resource_type,
                    requested: resource.resource_type,
                });
            }
        }

        match resource.resource_type.parent_type() {
            None => {
                if resource.parent.is_some() {
                    return Err(StoreError::InvalidParent {
                        id: resource.id,
                        reason: "a node cannot have a parent".to_string(),
                    });
                }
                match self.node {
                    Some(existing) if existing != resource.id => {
                        Err(StoreError::DuplicateNode { existing })
                    }
                    _ => Ok(()),
                }
            }
            Some(expected) => {
                let parent_id = resource.parent.ok_or_else(|| StoreError::InvalidParent {
                    id: resource.id,
                    reason: format!("a {} must reference a {}", resource.resource_type, expected),
                })?;
                let parent = self
                    .resources
                    .get(&parent_id)
                    .ok_or_else(|| StoreError::InvalidParent {
                        id: resource.id,
                        reason: format!("parent {parent_id} is not stored"),
                    })?;
                if parent.resource_type != expected {
                    return Err(StoreError::InvalidParent {
                        id: resource.id,
                        reason: format!(
                            "parent {parent_id} is a {}, expected a {expected}",
                            parent.resource_type
                        ),
                    });
                }
                Ok(())
            }
        }
    }

    fn link(&mut self, parent: ResourceId, child: ResourceId) {
        self.children.entry(parent).or_default().insert(child);
    }

    fn unlink(&mut self, parent: ResourceId, child: ResourceId) {
        if let Some(set) = self.children.get_mut(&parent) {
            set.remove(&child);
            if set.is_empty() {
                self.children.remove(&parent);
            }
        }
    }
}

/// In-memory, versioned store of local resources.
pub struct ResourceStore {
    inner: RwLock<StoreInner>,
    changes: broadcast::Sender<StoreChange>,
}

impl ResourceStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(StoreInner::default()),
            changes,
        }
    }

    /// Inserts or updates a resource, returning its new version.
    ///
    /// Fails with `InvalidParent` when a non-node resource's parent is not
    /// stored or is of the wrong kind, `DuplicateNode` when a second node is
    /// offered, and `TypeMismatch` when an id changes kind.
    pub fn put(&self, mut resource: Resource) -> StoreResult<u64> {
        let mut inner = self.inner.write();
        inner.validate(&resource)?;

        inner.revision += 1;
        let version = inner.revision;
        resource.version = version;

        let id = resource.id;
        let resource_type = resource.resource_type;
        let old_parent = inner.resources.get(&id).and_then(|r| r.parent);
        if old_parent != resource.parent {
            if let Some(p) = old_parent {
                inner.unlink(p, id);
            }
            if let Some(p) = resource.parent {
                inner.link(p, id);
            }
        }
        if resource_type == ResourceType::Node {
            inner.node = Some(id);
        }
        inner.resources.insert(id, Arc::new(resource));

        debug!("Stored {} {} at version {}", resource_type, id, version);
        self.notify(StoreChange {
            revision: version,
            id,
            resource_type,
            kind: ChangeKind::Put,
        });
        Ok(version)
    }

    /// Removes a resource, returning its last stored state.
    ///
    /// Fails with `NotFound` when absent and `HasDependents` while any other
    /// resource still names it as parent; children must be deleted first.
    pub fn delete(&self, id: &ResourceId) -> StoreResult<Arc<Resource>> {
        let mut inner = self.inner.write();
        if !inner.resources.contains_key(id) {
            return Err(StoreError::NotFound(*id));
        }
        let dependents = inner.children.get(id).map_or(0, BTreeSet::len);
        if dependents > 0 {
            return Err(StoreError::HasDependents {
                id: *id,
                dependents,
            });
        }

        let removed = inner
            .resources
            .remove(id)
            .ok_or(StoreError::NotFound(*id))?;
        if let Some(p) = removed.parent {
            inner.unlink(p, *id);
        }
        if inner.node == Some(*id) {
            inner.node = None;
        }
        inner.revision += 1;
        let revision = inner.revision;

        debug!("Deleted {} {} at revision {}", removed.resource_type, id, revision);
        self.notify(StoreChange {
            revision,
            id: *id,
            resource_type: removed.resource_type,
            kind: ChangeKind::Delete,
        });
        Ok(removed)
    }

    /// Takes a consistent view of every stored resource.
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.inner.read();
        let mut resources: Vec<Arc<Resource>> = inner.resources.values().cloned().collect();
        resources.sort_by_key(|r| (r.resource_type, r.id));
        Snapshot {
            revision: inner.revision,
            resources,
        }
    }

    /// Computes the minimal puts and deletes that bring a consumer who has
    /// acknowledged `since` up to the current state.
    pub fn diff(&self, since: &SyncedVersions) -> Diff {
        let inner = self.inner.read();

        let mut puts: Vec<Arc<Resource>> = inner
            .resources
            .values()
            .filter(|r| since.get(&r.id).is_none_or(|s| s.version != r.version))
            .cloned()
            .collect();
        puts.sort_by_key(|r| (r.resource_type, r.id));

        // An id acknowledged under another type was deleted and re-created as
        // a different kind; the old registration has to go as well.
        let mut deletes: Vec<Removal> = since
            .iter()
            .filter(|(id, stamp)| {
                inner
                    .resources
                    .get(id)
                    .is_none_or(|r| r.resource_type != stamp.resource_type)
            })
            .map(|(id, stamp)| Removal {
                id: *id,
                resource_type: stamp.resource_type,
            })
            .collect();
        deletes.sort_by(|a, b| {
            b.resource_type
                .cmp(&a.resource_type)
                .then_with(|| a.id.cmp(&b.id))
        });

        Diff {
            revision: inner.revision,
            puts,
            deletes,
        }
    }

    /// Returns the current state of a resource.
    pub fn get(&self, id: &ResourceId) -> Option<Arc<Resource>> {
        self.inner.read().resources.get(id).cloned()
    }

    /// Returns the node resource, if one is stored.
    pub fn node(&self) -> Option<Arc<Resource>> {
        let inner = self.inner.read();
        inner.node.and_then(|id| inner.resources.get(&id).cloned())
    }

    /// Ids of the resources naming `id` as their parent.
    pub fn dependents(&self, id: &ResourceId) -> Vec<ResourceId> {
        self.inner
            .read()
            .children
            .get(id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.inner.read().resources.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().resources.is_empty()
    }

    /// The latest store revision.
    pub fn revision(&self) -> u64 {
        self.inner.read().revision
    }

    /// Subscribes to mutation notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    fn notify(&self, change: StoreChange) {
        // No subscribers is not an error.
        let _ = self.changes.send(change);
    }
}

impl Default for ResourceStore {
    fn default() -> Self {
        Self::new()
    }
}
