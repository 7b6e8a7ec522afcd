//! The resource catalog and the versioned envelope every resource travels in.

use crate::{Error, ResourceId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The fixed set of resource kinds a node can own.
///
/// Variants are declared parent-first, so the derived `Ord` is also the
/// order in which resources must be registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Node,
    Device,
    Source,
    Flow,
    Sender,
    Receiver,
}

/// Parent-first registration order.
pub const REGISTRATION_ORDER: [ResourceType; 6] = [
    ResourceType::Node,
    ResourceType::Device,
    ResourceType::Source,
    ResourceType::Flow,
    ResourceType::Sender,
    ResourceType::Receiver,
];

impl ResourceType {
    /// Singular wire name (`"device"`), used in registration envelopes.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Device => "device",
            Self::Source => "source",
            Self::Flow => "flow",
            Self::Sender => "sender",
            Self::Receiver => "receiver",
        }
    }

    /// Plural wire name (`"devices"`), used in resource paths.
    #[must_use]
    pub const fn plural(&self) -> &'static str {
        match self {
            Self::Node => "nodes",
            Self::Device => "devices",
            Self::Source => "sources",
            Self::Flow => "flows",
            Self::Sender => "senders",
            Self::Receiver => "receivers",
        }
    }

    /// The kind of resource this kind must hang off, `None` for the node.
    #[must_use]
    pub const fn parent_type(&self) -> Option<ResourceType> {
        match self {
            Self::Node => None,
            Self::Device => Some(Self::Node),
            Self::Source => Some(Self::Device),
            Self::Flow => Some(Self::Source),
            Self::Sender | Self::Receiver => Some(Self::Device),
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        REGISTRATION_ORDER
            .into_iter()
            .find(|t| t.as_str() == s || t.plural() == s)
            .ok_or_else(|| Error::UnknownResourceType(s.to_string()))
    }
}

/// What a consumer last observed of a resource: its kind and the version it
/// saw. The kind is kept so a consumer can still address a resource after
/// it has disappeared from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionStamp {
    pub resource_type: ResourceType,
    pub version: u64,
}

/// A resource owned by this node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Unique identifier.
    pub id: ResourceId,
    /// Which catalog entry this is.
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    /// The resource this one hangs off. `None` only for the node.
    pub parent: Option<ResourceId>,
    /// Store revision at which this state was written. Zero until stored.
    pub version: u64,
    /// Producer-owned attributes, forwarded to the registry as-is.
    pub data: serde_json::Value,
}

impl Resource {
    /// Creates an unstored resource.
    pub fn new(
        resource_type: ResourceType,
        id: ResourceId,
        parent: Option<ResourceId>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id,
            resource_type,
            parent,
            version: 0,
            data,
        }
    }

    /// Creates the node resource.
    pub fn node(id: ResourceId, data: serde_json::Value) -> Self {
        Self::new(ResourceType::Node, id, None, data)
    }

    /// Creates a non-node resource under `parent`.
    pub fn child(
        resource_type: ResourceType,
        id: ResourceId,
        parent: ResourceId,
        data: serde_json::Value,
    ) -> Self {
        Self::new(resource_type, id, Some(parent), data)
    }

    /// Returns whether this is the node resource.
    #[must_use]
    pub fn is_node(&self) -> bool {
        self.resource_type == ResourceType::Node
    }

    /// The kind and version of this resource.
    #[must_use]
    pub fn stamp(&self) -> VersionStamp {
        VersionStamp {
            resource_type: self.resource_type,
            version: self.version,
        }
    }

    /// The payload as it should be sent to a registry: the producer's data
    /// with `id` filled in when the producer left it out.
    #[must_use]
    pub fn registration_payload(&self) -> serde_json::Value {
        let mut data = self.data.clone();
        if let serde_json::Value::Object(map) = &mut data {
            map.entry("id")
                .or_insert_with(|| serde_json::Value::String(self.id.to_string()));
        }
        data
    }
}
