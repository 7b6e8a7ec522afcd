//! Per-registry registration state.

use crate::endpoint::RegistryEndpoint;
use chrono::{DateTime, Utc};
use nodefacade_store::SyncedVersions;
use nodefacade_types::{Resource, ResourceId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// What the engine knows about its registration with one registry.
///
/// A session starts when an endpoint is selected and ends on failover,
/// withdrawal of the endpoint, or shutdown. Losing the node registration
/// (expiry) does not end the session; it resets it.
#[derive(Debug, Clone)]
pub struct RegistrationSession {
    pub endpoint: RegistryEndpoint,
    pub started_at: DateTime<Utc>,
    /// The node this session registered, once registered.
    pub node_id: Option<ResourceId>,
    pub node_registered: bool,
    /// Last successful exchange of any kind.
    pub last_success: Instant,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    /// Heartbeat interval the registry asked for.
    pub lease_interval: Duration,
    /// Versions the registry has acknowledged.
    pub acked: SyncedVersions,
    /// Resources refused at a given version. Retried once the version moves.
    pub rejected: HashMap<ResourceId, u64>,
    /// The last heartbeat was refused outright.
    pub heartbeat_rejected: bool,
    /// Snapshot push rounds that ended early.
    pub registration_rounds: u32,
}

impl RegistrationSession {
    pub fn new(endpoint: RegistryEndpoint, lease_interval: Duration, now: Instant) -> Self {
        Self {
            endpoint,
            started_at: Utc::now(),
            node_id: None,
            node_registered: false,
            last_success: now,
            last_heartbeat_at: None,
            consecutive_failures: 0,
            lease_interval,
            acked: SyncedVersions::new(),
            rejected: HashMap::new(),
            heartbeat_rejected: false,
            registration_rounds: 0,
        }
    }

    pub fn record_success(&mut self, now: Instant) {
        self.consecutive_failures = 0;
        self.last_success = now;
    }

    /// Counts a failure and returns the running total.
    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures
    }

    /// Whether the registry must have dropped us by now, given it expires
    /// registrations after `factor` missed lease intervals.
    pub fn lease_expired(&self, now: Instant, factor: u32) -> bool {
        let elapsed = now.saturating_duration_since(self.last_success);
        self.lease_interval
            .checked_mul(factor)
            .is_some_and(|lease| elapsed > lease)
    }

    /// Forgets everything the registry held for us. The next step is a full
    /// re-registration.
    pub fn reset_registration(&mut self) {
        self.node_registered = false;
        self.acked.clear();
        self.rejected.clear();
        self.heartbeat_rejected = false;
    }

    pub fn acknowledge_put(&mut self, resource: &Resource) {
        self.acked.insert(resource.id, resource.stamp());
        self.rejected.remove(&resource.id);
    }

    pub fn acknowledge_delete(&mut self, id: &ResourceId) {
        self.acked.remove(id);
        self.rejected.remove(id);
    }

    pub fn reject(&mut self, resource: &Resource) {
        self.rejected.insert(resource.id, resource.version);
    }

    /// Whether `resource` was refused at exactly this version.
    pub fn is_rejected(&self, resource: &Resource) -> bool {
        self.rejected.get(&resource.id) == Some(&resource.version)
    }

    /// Whether anything keeps the session short of fully healthy.
    pub fn has_refusals(&self) -> bool {
        !self.rejected.is_empty() || self.heartbeat_rejected
    }
}
