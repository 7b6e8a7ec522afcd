//! Versioned in-memory store of the resources this node owns.
//!
//! # Components
//!
//! - **ResourceStore**: the single source of truth for local resources.
//!   Mutations are serialized behind one lock, every mutation takes the next
//!   store revision as the resource's version, and readers only ever see
//!   whole mutations.
//! - **Snapshot / Diff**: immutable views used for bulk registration and for
//!   computing the minimal set of changes a consumer is missing.
//! - **Apply loop**: local producers submit [`ResourceEvent`]s through a
//!   [`ResourcePublisher`]; one task applies them in arrival order.
//!
//! # Example
//!
//! ```
//! use nodefacade_store::ResourceStore;
//! use nodefacade_types::{Resource, ResourceId};
//!
//! let store = ResourceStore::new();
//! let version = store.put(Resource::node(ResourceId::new(), serde_json::json!({}))).unwrap();
//! assert_eq!(version, 1);
//! ```
//!
//! [`ResourceEvent`]: nodefacade_types::ResourceEvent

mod error;
mod publisher;
mod store;

pub use error::{StoreError, StoreResult};
pub use publisher::{apply_event, spawn_apply_loop, Applied, ResourcePublisher};
pub use store::{ChangeKind, Diff, Removal, ResourceStore, Snapshot, StoreChange, SyncedVersions};
