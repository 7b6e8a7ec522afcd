//! Producer events.
//!
//! Local producers describe every change to the resources they own as a
//! `ResourceEvent`. Events are applied to the store strictly in arrival
//! order by a single apply loop.

use crate::{Resource, ResourceId, ResourceType};
use serde::{Deserialize, Serialize};

/// A create/update or delete announced by a local producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ResourceEvent {
    /// A resource was created or its attributes changed.
    Upsert {
        resource_type: ResourceType,
        id: ResourceId,
        parent: Option<ResourceId>,
        data: serde_json::Value,
    },

    /// A resource went away.
    Remove {
        resource_type: ResourceType,
        id: ResourceId,
    },
}

impl ResourceEvent {
    /// Builds an upsert event carrying the state of `resource`.
    pub fn upsert(resource: &Resource) -> Self {
        Self::Upsert {
            resource_type: resource.resource_type,
            id: resource.id,
            parent: resource.parent,
            data: resource.data.clone(),
        }
    }

    /// Builds a remove event.
    pub fn remove(resource_type: ResourceType, id: ResourceId) -> Self {
        Self::Remove { resource_type, id }
    }

    /// The resource this event concerns.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        match self {
            Self::Upsert { id, .. } | Self::Remove { id, .. } => *id,
        }
    }

    /// The kind of resource this event concerns.
    #[must_use]
    pub fn resource_type(&self) -> ResourceType {
        match self {
            Self::Upsert { resource_type, .. } | Self::Remove { resource_type, .. } => {
                *resource_type
            }
        }
    }

    /// The resource an upsert describes, unstored. `None` for removals.
    #[must_use]
    pub fn into_resource(self) -> Option<Resource> {
        match self {
            Self::Upsert {
                resource_type,
                id,
                parent,
                data,
            } => Some(Resource::new(resource_type, id, parent, data)),
            Self::Remove { .. } => None,
        }
    }
}
