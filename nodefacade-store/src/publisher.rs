//! Producer apply loop.
//!
//! Producers never touch the store directly. They hand `ResourceEvent`s to a
//! [`ResourcePublisher`], and a single task applies them in the order they
//! arrive. Producers wait only for the store, never for a registry.

use crate::error::{StoreError, StoreResult};
use crate::store::ResourceStore;
use nodefacade_types::{Resource, ResourceEvent};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Outcome of applying one producer event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The resource was created or updated at this version.
    Stored { version: u64 },
    /// The resource was removed.
    Removed,
    /// The resource was already gone. Removal is idempotent for producers.
    AlreadyAbsent,
}

struct Submission {
    event: ResourceEvent,
    reply: Option<oneshot::Sender<StoreResult<Applied>>>,
}

/// Handle local producers use to submit resource events.
#[derive(Clone)]
pub struct ResourcePublisher {
    tx: mpsc::Sender<Submission>,
}

impl ResourcePublisher {
    /// Submits an event and waits until the store has applied it.
    ///
    /// Data-model violations (`InvalidParent`, `HasDependents`, ...) come
    /// back here, to the producer that caused them.
    pub async fn publish(&self, event: ResourceEvent) -> StoreResult<Applied> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Submission {
                event,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| StoreError::ApplyLoopClosed)?;
        reply_rx.await.map_err(|_| StoreError::ApplyLoopClosed)?
    }

    /// Submits an event without waiting for the outcome. Failures are
    /// logged by the apply loop.
    pub async fn submit(&self, event: ResourceEvent) -> StoreResult<()> {
        self.tx
            .send(Submission { event, reply: None })
            .await
            .map_err(|_| StoreError::ApplyLoopClosed)
    }
}

/// Applies one producer event to the store.
pub fn apply_event(store: &ResourceStore, event: ResourceEvent) -> StoreResult<Applied> {
    match event {
        ResourceEvent::Upsert {
            resource_type,
            id,
            parent,
            data,
        } => {
            let resource = Resource::new(resource_type, id, parent, data);
            let version = store.put(resource)?;
            Ok(Applied::Stored { version })
        }
        ResourceEvent::Remove { resource_type, id } => {
            if let Some(existing) = store.get(&id) {
                if existing.resource_type != resource_type {
                    return Err(StoreError::TypeMismatch {
                        id,
                        existing: existing.resource_type,
                        requested: resource_type,
                    });
                }
            }
            match store.delete(&id) {
                Ok(_) => Ok(Applied::Removed),
                Err(StoreError::NotFound(_)) => {
                    debug!("Remove of absent {} {} ignored", resource_type, id);
                    Ok(Applied::AlreadyAbsent)
                }
                Err(e) => Err(e),
            }
        }
    }
}

/// Spawns the apply loop for `store`, returning the producer handle and the
/// loop's task. The loop ends once every publisher has been dropped.
pub fn spawn_apply_loop(
    store: Arc<ResourceStore>,
    capacity: usize,
) -> (ResourcePublisher, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Submission>(capacity.max(1));

    let handle = tokio::spawn(async move {
        debug!("Starting resource apply loop");
        while let Some(Submission { event, reply }) = rx.recv().await {
            let id = event.id();
            let result = apply_event(&store, event);
            match reply {
                Some(reply) => {
                    let _ = reply.send(result);
                }
                None => {
                    if let Err(e) = result {
                        warn!("Dropped producer event for {}: {}", id, e);
                    }
                }
            }
        }
        debug!("Stopping resource apply loop");
    });

    (ResourcePublisher { tx }, handle)
}
