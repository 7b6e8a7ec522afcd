//! The registry client abstraction.
//!
//! The lifecycle engine only ever talks to a registry through this trait,
//! so the engine is testable without a network and the wire protocol lives
//! in one place ([`crate::http`]).

use crate::endpoint::RegistryEndpoint;
use crate::error::RegistryResult;
use async_trait::async_trait;
use nodefacade_types::{Resource, ResourceId, ResourceType};
use std::time::Duration;

/// Shortest heartbeat interval a registry may ask for.
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
/// Longest heartbeat interval a registry may ask for.
pub const MAX_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3_600);

/// Whether a registry-reported heartbeat interval is one we follow.
pub fn heartbeat_interval_in_range(interval: Duration) -> bool {
    (MIN_HEARTBEAT_INTERVAL..=MAX_HEARTBEAT_INTERVAL).contains(&interval)
}

/// The four registry operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    RegisterNode,
    RegisterResource,
    DeleteResource,
    Heartbeat,
}

/// Operations a registry supports.
#[async_trait]
pub trait RegistrationClient: Send + Sync {
    /// Creates a fresh registration for the node on `endpoint` and returns
    /// the heartbeat interval the registry asks for.
    ///
    /// Any stale registration of the same node is replaced; on success the
    /// registry holds the node and nothing else of ours.
    async fn register_node(
        &self,
        endpoint: &RegistryEndpoint,
        node: &Resource,
    ) -> RegistryResult<Duration>;

    /// Registers or updates one resource under the current registration.
    ///
    /// Fails with `NodeNotRegistered` when the registry no longer holds the
    /// node.
    async fn register_resource(
        &self,
        endpoint: &RegistryEndpoint,
        resource: &Resource,
    ) -> RegistryResult<()>;

    /// Deletes a resource. Deleting something the registry does not hold
    /// succeeds.
    async fn delete_resource(
        &self,
        endpoint: &RegistryEndpoint,
        resource_type: ResourceType,
        id: ResourceId,
    ) -> RegistryResult<()>;

    /// Extends the node's lease and returns the interval the registry wants
    /// heartbeats at.
    async fn heartbeat(
        &self,
        endpoint: &RegistryEndpoint,
        node_id: ResourceId,
    ) -> RegistryResult<Duration>;

    /// Most wire requests one call of `kind` can make. Callers budget one
    /// request timeout per round trip.
    fn round_trips(&self, kind: CallKind) -> u32 {
        match kind {
            // stale delete, register, first heartbeat
            CallKind::RegisterNode => 3,
            _ => 1,
        }
    }
}

/// In-memory registries for tests.
pub mod mock {
    use super::*;
    pub use super::CallKind;
    use crate::error::RegistryError;
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet, VecDeque};

    /// One call as seen by the mock, recorded whether or not it succeeded.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum RegistryCall {
        RegisterNode {
            href: String,
            id: ResourceId,
        },
        RegisterResource {
            href: String,
            id: ResourceId,
            resource_type: ResourceType,
            version: u64,
        },
        DeleteResource {
            href: String,
            id: ResourceId,
            resource_type: ResourceType,
        },
        Heartbeat {
            href: String,
            node_id: ResourceId,
        },
    }

    impl RegistryCall {
        pub fn href(&self) -> &str {
            match self {
                RegistryCall::RegisterNode { href, .. }
                | RegistryCall::RegisterResource { href, .. }
                | RegistryCall::DeleteResource { href, .. }
                | RegistryCall::Heartbeat { href, .. } => href,
            }
        }

        pub fn kind(&self) -> CallKind {
            match self {
                RegistryCall::RegisterNode { .. } => CallKind::RegisterNode,
                RegistryCall::RegisterResource { .. } => CallKind::RegisterResource,
                RegistryCall::DeleteResource { .. } => CallKind::DeleteResource,
                RegistryCall::Heartbeat { .. } => CallKind::Heartbeat,
            }
        }

        pub fn is_heartbeat(&self) -> bool {
            self.kind() == CallKind::Heartbeat
        }
    }

    #[derive(Debug, Default)]
    struct RegistryContents {
        node: Option<ResourceId>,
        resources: HashMap<ResourceId, Resource>,
    }

    #[derive(Debug, Default)]
    struct MockState {
        calls: Vec<RegistryCall>,
        registries: HashMap<String, RegistryContents>,
        unreachable: HashSet<String>,
        hanging: HashSet<String>,
        queued_failures: HashMap<(String, CallKind), VecDeque<RegistryError>>,
        rejected_ids: HashSet<ResourceId>,
        lease_intervals: HashMap<String, Duration>,
    }

    impl MockState {
        fn lease_for(&self, href: &str, default: Duration) -> Duration {
            self.lease_intervals.get(href).copied().unwrap_or(default)
        }
    }

    /// A set of registries that behave like the real thing: they hold a
    /// node registration, require it before child resources, and forget it
    /// when told to expire.
    #[derive(Debug)]
    pub struct MockRegistry {
        state: Mutex<MockState>,
        default_lease: Duration,
    }

    impl Default for MockRegistry {
        fn default() -> Self {
            Self::new(Duration::from_secs(5))
        }
    }

    impl MockRegistry {
        /// Creates registries that report `default_lease` on heartbeat.
        pub fn new(default_lease: Duration) -> Self {
            Self {
                state: Mutex::new(MockState::default()),
                default_lease,
            }
        }

        // ── Fault injection ──────────────────────────────────────

        /// Makes every call to `href` fail as unreachable.
        pub fn set_unreachable(&self, href: &str, unreachable: bool) {
            let mut state = self.state.lock();
            if unreachable {
                state.unreachable.insert(href.to_string());
            } else {
                state.unreachable.remove(href);
            }
        }

        /// Makes every call to `href` hang until the caller gives up.
        pub fn set_hanging(&self, href: &str, hanging: bool) {
            let mut state = self.state.lock();
            if hanging {
                state.hanging.insert(href.to_string());
            } else {
                state.hanging.remove(href);
            }
        }

        /// Fails the next call of `kind` to `href` with `error`.
        pub fn fail_next(&self, href: &str, kind: CallKind, error: RegistryError) {
            self.state
                .lock()
                .queued_failures
                .entry((href.to_string(), kind))
                .or_default()
                .push_back(error);
        }

        /// Drops the node registration and everything under it, as a
        /// registry garbage collector would.
        pub fn expire_node(&self, href: &str) {
            if let Some(contents) = self.state.lock().registries.get_mut(href) {
                contents.node = None;
                contents.resources.clear();
            }
        }

        /// Refuses every registration of `id` on every registry.
        pub fn reject_resource(&self, id: ResourceId) {
            self.state.lock().rejected_ids.insert(id);
        }

        /// Stops refusing `id`.
        pub fn accept_resource(&self, id: ResourceId) {
            self.state.lock().rejected_ids.remove(&id);
        }

        /// Sets the heartbeat interval `href` reports.
        pub fn set_lease_interval(&self, href: &str, interval: Duration) {
            self.state
                .lock()
                .lease_intervals
                .insert(href.to_string(), interval);
        }

        // ── Inspection ───────────────────────────────────────────

        /// Every call made so far, in order.
        pub fn calls(&self) -> Vec<RegistryCall> {
            self.state.lock().calls.clone()
        }

        /// Calls made to `href`, in order.
        pub fn calls_to(&self, href: &str) -> Vec<RegistryCall> {
            self.state
                .lock()
                .calls
                .iter()
                .filter(|c| c.href() == href)
                .cloned()
                .collect()
        }

        /// Calls made to `href`, heartbeats left out.
        pub fn changes_to(&self, href: &str) -> Vec<RegistryCall> {
            self.calls_to(href)
                .into_iter()
                .filter(|c| !c.is_heartbeat())
                .collect()
        }

        pub fn clear_calls(&self) {
            self.state.lock().calls.clear();
        }

        /// The node id `href` currently holds.
        pub fn registered_node(&self, href: &str) -> Option<ResourceId> {
            self.state
                .lock()
                .registries
                .get(href)
                .and_then(|c| c.node)
        }

        /// Everything `href` holds, node included.
        pub fn registered(&self, href: &str) -> HashMap<ResourceId, Resource> {
            self.state
                .lock()
                .registries
                .get(href)
                .map(|c| c.resources.clone())
                .unwrap_or_default()
        }

        // ── Call handling ────────────────────────────────────────

        /// Records the call and decides whether it reaches the registry.
        /// `Ok(true)` means the caller should hang.
        fn admit(&self, call: RegistryCall) -> RegistryResult<bool> {
            let mut state = self.state.lock();
            let href = call.href().to_string();
            let kind = call.kind();
            state.calls.push(call);

            if state.hanging.contains(&href) {
                return Ok(true);
            }
            if state.unreachable.contains(&href) {
                return Err(RegistryError::Unreachable(format!("{href} is down")));
            }
            if let Some(error) = state
                .queued_failures
                .get_mut(&(href, kind))
                .and_then(VecDeque::pop_front)
            {
                return Err(error);
            }
            Ok(false)
        }

        async fn enter(&self, call: RegistryCall) -> RegistryResult<()> {
            if self.admit(call)? {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RegistrationClient for MockRegistry {
        async fn register_node(
            &self,
            endpoint: &RegistryEndpoint,
            node: &Resource,
        ) -> RegistryResult<Duration> {
            self.enter(RegistryCall::RegisterNode {
                href: endpoint.href.clone(),
                id: node.id,
            })
            .await?;

            let mut state = self.state.lock();
            if state.rejected_ids.contains(&node.id) {
                return Err(RegistryError::Rejected {
                    status: Some(400),
                    reason: "node refused".into(),
                });
            }
            let contents = state.registries.entry(endpoint.href.clone()).or_default();
            contents.resources.clear();
            contents.node = Some(node.id);
            contents.resources.insert(node.id, node.clone());
            Ok(state.lease_for(&endpoint.href, self.default_lease))
        }

        async fn register_resource(
            &self,
            endpoint: &RegistryEndpoint,
            resource: &Resource,
        ) -> RegistryResult<()> {
            self.enter(RegistryCall::RegisterResource {
                href: endpoint.href.clone(),
                id: resource.id,
                resource_type: resource.resource_type,
                version: resource.version,
            })
            .await?;

            let mut state = self.state.lock();
            if state.rejected_ids.contains(&resource.id) {
                return Err(RegistryError::Rejected {
                    status: Some(400),
                    reason: format!("{} refused", resource.id),
                });
            }
            let contents = state.registries.entry(endpoint.href.clone()).or_default();
            if contents.node.is_none() {
                return Err(RegistryError::NodeNotRegistered);
            }
            if let Some(parent) = resource.parent {
                if !contents.resources.contains_key(&parent) {
                    return Err(RegistryError::Rejected {
                        status: Some(400),
                        reason: format!("parent {parent} not registered"),
                    });
                }
            }
            contents.resources.insert(resource.id, resource.clone());
            Ok(())
        }

        async fn delete_resource(
            &self,
            endpoint: &RegistryEndpoint,
            resource_type: ResourceType,
            id: ResourceId,
        ) -> RegistryResult<()> {
            self.enter(RegistryCall::DeleteResource {
                href: endpoint.href.clone(),
                id,
                resource_type,
            })
            .await?;

            let mut state = self.state.lock();
            if let Some(contents) = state.registries.get_mut(&endpoint.href) {
                contents.resources.remove(&id);
                if contents.node == Some(id) {
                    contents.node = None;
                    contents.resources.clear();
                }
            }
            Ok(())
        }

        async fn heartbeat(
            &self,
            endpoint: &RegistryEndpoint,
            node_id: ResourceId,
        ) -> RegistryResult<Duration> {
            self.enter(RegistryCall::Heartbeat {
                href: endpoint.href.clone(),
                node_id,
            })
            .await?;

            let state = self.state.lock();
            let holds_node = state
                .registries
                .get(&endpoint.href)
                .is_some_and(|c| c.node == Some(node_id));
            if !holds_node {
                return Err(RegistryError::NodeExpired);
            }
            Ok(state.lease_for(&endpoint.href, self.default_lease))
        }
    }
}
