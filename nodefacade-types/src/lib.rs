//! Core type definitions for the node facade.
//!
//! This crate defines the resource model mirrored into a Registration API:
//! - Resource identifiers (UUID v4, as used on the wire)
//! - The fixed resource catalog (node, device, source, flow, sender, receiver)
//! - The versioned resource envelope with an opaque JSON payload
//! - Producer events (upsert/remove) consumed by the store's apply loop
//!
//! The payload of each resource is owned by the producer that published it.
//! Nothing here interprets it beyond the `id` field.

mod event;
mod ids;
mod resource;

pub use event::ResourceEvent;
pub use ids::ResourceId;
pub use resource::{Resource, ResourceType, VersionStamp, REGISTRATION_ORDER};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("unknown resource type: {0}")]
    UnknownResourceType(String),
}
