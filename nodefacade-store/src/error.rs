//! Error types for the resource store.

use nodefacade_types::{ResourceId, ResourceType};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Data-model violations, reported synchronously to the producer that
/// caused them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The resource's parent reference does not resolve.
    #[error("invalid parent for {id}: {reason}")]
    InvalidParent { id: ResourceId, reason: String },

    /// No resource with this id is stored.
    #[error("resource not found: {0}")]
    NotFound(ResourceId),

    /// Other resources still name this one as their parent.
    #[error("resource {id} still has {dependents} dependent(s)")]
    HasDependents { id: ResourceId, dependents: usize },

    /// A node is already stored under a different id.
    #[error("a node is already registered as {existing}")]
    DuplicateNode { existing: ResourceId },

    /// The id is stored under a different resource type.
    #[error("resource {id} is a {existing}, not a {requested}")]
    TypeMismatch {
        id: ResourceId,
        existing: ResourceType,
        requested: ResourceType,
    },

    /// The apply loop has stopped accepting events.
    #[error("apply loop closed")]
    ApplyLoopClosed,
}
