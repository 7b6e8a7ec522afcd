//! The registration lifecycle engine.
//!
//! One task owns all registration state and reacts to four inputs: the
//! locator's endpoint list, the store's change feed, its own timers
//! (heartbeat, debounced push, retry) and commands from the handle.
//!
//! ```text
//!   DISCOVERING ──endpoint──▶ REGISTERING ──snapshot pushed──▶ HEALTHY
//!        ▲                        │    ▲                        │  ▲
//!        │                        ▼    │ (lost registration)    ▼  │
//!   FAILED_OVER ◀──threshold── DEGRADED ◀──────failure──────────┘  │
//!                                 └──────heartbeat ok──────────────┘
//! ```
//!
//! Registry calls are bounded by the request timeout (per wire request the
//! call may make) and never overlap, so
//! a heartbeat can never be sent after a push in the same cycle learned the
//! registration was gone.

use crate::client::{heartbeat_interval_in_range, CallKind, RegistrationClient};
use crate::config::EngineConfig;
use crate::endpoint::RegistryEndpoint;
use crate::error::{EngineError, RegistryError, RegistryResult};
use crate::locator::{EndpointList, RegistryLocator};
use crate::p2p::P2pAdvertiser;
use crate::session::RegistrationSession;
use chrono::{DateTime, Utc};
use nodefacade_store::{Diff, ResourceStore, StoreChange};
use nodefacade_types::{ResourceId, VersionStamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineState {
    /// No usable registry (or no node to register).
    Discovering,
    /// Creating the node registration and pushing the snapshot.
    Registering,
    /// Registered, heartbeating, in sync.
    Healthy,
    /// Registered but failing, or holding refused resources.
    Degraded,
    /// Abandoning a registry. Transient; always followed by DISCOVERING.
    FailedOver,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Discovering => "DISCOVERING",
            EngineState::Registering => "REGISTERING",
            EngineState::Healthy => "HEALTHY",
            EngineState::Degraded => "DEGRADED",
            EngineState::FailedOver => "FAILED_OVER",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally visible engine state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    /// Registry of the current session.
    pub endpoint: Option<RegistryEndpoint>,
    /// Whether the registry currently holds our node.
    pub registered: bool,
    pub session_started_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub heartbeat_interval_ms: u64,
    pub consecutive_failures: u32,
    /// Resources the registry refused at their current version.
    pub rejected: Vec<ResourceId>,
    pub last_error: Option<String>,
}

impl EngineStatus {
    pub fn is_healthy(&self) -> bool {
        self.state == EngineState::Healthy
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StateChanged { from: EngineState, to: EngineState },
    EndpointSelected(RegistryEndpoint),
    ResourceRejected { id: ResourceId, reason: String },
}

enum Command {
    Shutdown(oneshot::Sender<()>),
}

/// Handle to a running engine.
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<EngineStatus>,
    events: broadcast::Sender<EngineEvent>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// The latest published status.
    pub fn status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    /// A receiver that observes every status change.
    pub fn watch_status(&self) -> watch::Receiver<EngineStatus> {
        self.status.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Waits until the status satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&EngineStatus) -> bool,
    ) -> Result<EngineStatus, EngineError> {
        let mut status = self.status.clone();
        let matched = status
            .wait_for(predicate)
            .await
            .map_err(|_| EngineError::Stopped)?;
        Ok((*matched).clone())
    }

    /// Deregisters (best effort, bounded) and stops the engine.
    pub async fn shutdown(self) -> Result<(), EngineError> {
        let (reply, done) = oneshot::channel();
        self.commands
            .send(Command::Shutdown(reply))
            .await
            .map_err(|_| EngineError::Stopped)?;
        done.await.map_err(|_| EngineError::Stopped)?;
        self.task.await.map_err(|_| EngineError::Stopped)
    }
}

/// The registration state machine. Build with [`new`](Self::new), start
/// with [`spawn`](Self::spawn).
pub struct LifecycleEngine {
    config: EngineConfig,
    store: Arc<ResourceStore>,
    locator: RegistryLocator,
    client: Arc<dyn RegistrationClient>,
    p2p: Option<P2pAdvertiser>,

    state: EngineState,
    session: Option<RegistrationSession>,
    heartbeat_interval: Duration,
    heartbeat_at: Option<Instant>,
    push_at: Option<Instant>,
    retry_at: Option<Instant>,
    discovery_poll_at: Option<Instant>,
    last_error: Option<String>,

    status_tx: watch::Sender<EngineStatus>,
    events: broadcast::Sender<EngineEvent>,
}

impl LifecycleEngine {
    pub fn new(
        store: Arc<ResourceStore>,
        locator: RegistryLocator,
        client: Arc<dyn RegistrationClient>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let heartbeat_interval = config.default_heartbeat_interval();
        let (status_tx, _) = watch::channel(EngineStatus {
            state: EngineState::Discovering,
            endpoint: None,
            registered: false,
            session_started_at: None,
            last_heartbeat_at: None,
            heartbeat_interval_ms: config.default_heartbeat_interval_ms,
            consecutive_failures: 0,
            rejected: Vec::new(),
            last_error: None,
        });
        let (events, _) = broadcast::channel(64);

        Ok(Self {
            config,
            store,
            locator,
            client,
            p2p: None,
            state: EngineState::Discovering,
            session: None,
            heartbeat_interval,
            heartbeat_at: None,
            push_at: None,
            retry_at: None,
            discovery_poll_at: None,
            last_error: None,
            status_tx,
            events,
        })
    }

    /// Enables the peer-to-peer fallback advertisement.
    pub fn with_p2p(mut self, advertiser: P2pAdvertiser) -> Self {
        self.p2p = Some(advertiser);
        self
    }

    /// Starts the engine task. Must be called from within a Tokio runtime.
    pub fn spawn(self) -> EngineHandle {
        let (commands, command_rx) = mpsc::channel(8);
        let status = self.status_tx.subscribe();
        let events = self.events.clone();
        let task = tokio::spawn(self.run(command_rx));
        EngineHandle {
            commands,
            status,
            events,
            task,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut endpoints = self.locator.subscribe();
        let mut changes = self.store.subscribe();
        let mut endpoints_open = true;
        let mut changes_open = true;
        info!("Registration engine started");

        loop {
            if self.state == EngineState::Discovering && self.discover() {
                continue;
            }
            if self.state == EngineState::Registering && self.retry_at.is_none() {
                self.register().await;
                self.publish_status();
                continue;
            }
            self.publish_status();

            let deadline = self.next_deadline();
            tokio::select! {
                command = commands.recv() => {
                    self.shutdown().await;
                    if let Some(Command::Shutdown(reply)) = command {
                        let _ = reply.send(());
                    }
                    return;
                }
                changed = endpoints.changed(), if endpoints_open => match changed {
                    Ok(()) => {
                        let list = endpoints.borrow_and_update().clone();
                        self.on_endpoints_changed(&list);
                    }
                    Err(_) => endpoints_open = false,
                },
                change = changes.recv(), if changes_open => match change {
                    Ok(change) => self.on_store_change(Some(&change)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Missed {} store notifications", skipped);
                        self.on_store_change(None);
                    }
                    Err(broadcast::error::RecvError::Closed) => changes_open = false,
                },
                _ = sleep_until(deadline) => self.on_deadline().await,
            }
        }
    }

    // ── Inputs ───────────────────────────────────────────────────

    fn on_endpoints_changed(&mut self, list: &EndpointList) {
        let Some(session) = &self.session else {
            return;
        };
        // Sticky: a better registry appearing does not move us, losing ours does.
        if !list.iter().any(|e| e.href == session.endpoint.href) {
            info!("Registry {} is no longer advertised", session.endpoint.href);
            self.end_session();
        }
    }

    fn on_store_change(&mut self, change: Option<&StoreChange>) {
        if let (Some(p2p), Some(change)) = (self.p2p.as_mut(), change) {
            p2p.on_resource_changed(change.resource_type);
        }

        let connected = matches!(self.state, EngineState::Healthy | EngineState::Degraded)
            && self.retry_at.is_none()
            && self.session.as_ref().is_some_and(|s| s.node_registered);
        if connected && self.push_at.is_none() {
            self.push_at = Some(later(Instant::now(), self.config.push_debounce()));
        }
    }

    async fn on_deadline(&mut self) {
        let now = Instant::now();
        let due = |at: Option<Instant>| at.is_some_and(|t| t <= now);

        if due(self.retry_at) {
            self.retry_at = None;
            // REGISTERING resumes at the top of the loop.
            if self.state == EngineState::Degraded {
                self.retry().await;
            }
            return;
        }
        if due(self.heartbeat_at) {
            self.heartbeat().await;
        }
        if due(self.push_at) {
            self.push().await;
        }
        if due(self.discovery_poll_at) {
            self.discovery_poll_at = None;
            if self.state == EngineState::Discovering {
                debug!("No registry available");
                self.note_unavailable();
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        let cooldown_end = if self.state == EngineState::Discovering {
            self.locator.next_cooldown_expiry(Instant::now())
        } else {
            None
        };
        [
            self.heartbeat_at,
            self.push_at,
            self.retry_at,
            self.discovery_poll_at,
            cooldown_end,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    // ── Discovery ────────────────────────────────────────────────

    /// Opens a session with the best candidate. Returns whether one was
    /// opened.
    fn discover(&mut self) -> bool {
        let now = Instant::now();
        let candidate = if self.store.node().is_some() {
            self.locator.candidates(now).into_iter().next()
        } else {
            None
        };
        let Some(endpoint) = candidate else {
            if self.discovery_poll_at.is_none() {
                self.discovery_poll_at = Some(later(now, self.heartbeat_interval));
            }
            return false;
        };

        info!("Selected registry {}", endpoint);
        self.discovery_poll_at = None;
        // A new registry starts from our own cadence until it states its own.
        self.heartbeat_interval = self.config.default_heartbeat_interval();
        self.session = Some(RegistrationSession::new(
            endpoint.clone(),
            self.heartbeat_interval,
            now,
        ));
        let _ = self.events.send(EngineEvent::EndpointSelected(endpoint));
        self.transition(EngineState::Registering);
        true
    }

    // ── Registration ─────────────────────────────────────────────

    async fn register(&mut self) {
        let budget = self.call_budget(CallKind::RegisterNode);
        let client = Arc::clone(&self.client);
        let Some(session) = self.session.as_mut() else {
            self.transition(EngineState::Discovering);
            return;
        };
        let endpoint = session.endpoint.clone();

        if !session.node_registered {
            let Some(node) = self.store.node() else {
                info!("No node resource to register");
                self.end_session();
                return;
            };
            session.reset_registration();
            session.node_id = Some(node.id);

            match bounded(budget, client.register_node(&endpoint, &node)).await {
                Ok(reported) => {
                    let interval = adopt_interval(&self.config, reported);
                    self.heartbeat_interval = interval;
                    session.lease_interval = interval;
                    session.node_registered = true;
                    session.acknowledge_put(&node);
                    session.record_success(Instant::now());
                    info!("Node {} registered with {}", node.id, endpoint.href);
                    if let Some(p2p) = self.p2p.as_mut() {
                        p2p.registered();
                    }
                }
                Err(e) if e.is_rejection() => {
                    error!("Registry {} refused node {}: {}", endpoint.href, node.id, e);
                    self.last_error = Some(e.to_string());
                    self.fail_over("node registration refused");
                    return;
                }
                Err(e) => {
                    self.on_failure(e);
                    return;
                }
            }
        }

        let diff = self.store.diff(&session.acked);
        match self.send_diff(diff).await {
            Ok(()) => {
                if !self.reconcile_node() {
                    return;
                }
                if let Some(session) = self.session.as_mut() {
                    session.registration_rounds = 0;
                }
                info!("Registration with {} complete", endpoint.href);
                self.heartbeat_at = Some(later(Instant::now(), self.heartbeat_interval));
                self.settle();
            }
            Err(e) if e.is_session_lost() => self.on_failure(e),
            Err(e) => {
                let now = Instant::now();
                self.last_error = Some(e.to_string());
                if let Some(p2p) = self.p2p.as_mut() {
                    p2p.record_failure();
                }
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                session.registration_rounds += 1;
                let rounds = session.registration_rounds;
                if rounds >= self.config.max_registration_attempts {
                    self.fail_over(&format!("snapshot push failed {rounds} times: {e}"));
                    return;
                }
                warn!(
                    "Snapshot push to {} interrupted (round {}): {}",
                    endpoint.href, rounds, e
                );
                self.retry_at = Some(later(now, self.config.backoff.delay_for_attempt(rounds)));
            }
        }
    }

    /// Sends deletes child-first, then puts parent-first. Refusals are
    /// recorded and skipped; anything else stops the push.
    async fn send_diff(&mut self, diff: Diff) -> RegistryResult<()> {
        let delete_budget = self.call_budget(CallKind::DeleteResource);
        let put_budget = self.call_budget(CallKind::RegisterResource);
        let client = Arc::clone(&self.client);
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let endpoint = session.endpoint.clone();
        let node_current =
            session.node_id.is_some() && self.store.node().map(|n| n.id) == session.node_id;
        session.rejected.retain(|id, _| self.store.contains(id));

        for removal in &diff.deletes {
            match bounded(
                delete_budget,
                client.delete_resource(&endpoint, removal.resource_type, removal.id),
            )
            .await
            {
                Ok(()) => {
                    session.acknowledge_delete(&removal.id);
                    session.record_success(Instant::now());
                }
                Err(e) if e.is_rejection() => {
                    warn!(
                        "Registry {} refused delete of {} {}: {}",
                        endpoint.href, removal.resource_type, removal.id, e
                    );
                    session.acknowledge_delete(&removal.id);
                }
                Err(e) => return Err(e),
            }
        }

        // A replaced node is registered afresh; its children follow it.
        if !node_current {
            return Ok(());
        }

        for resource in &diff.puts {
            if session.is_rejected(resource) {
                continue;
            }
            match bounded(put_budget, client.register_resource(&endpoint, resource)).await {
                Ok(()) => {
                    session.acknowledge_put(resource);
                    session.record_success(Instant::now());
                }
                Err(e) if e.is_rejection() => {
                    error!(
                        "Registry {} refused {} {} at version {}: {}",
                        endpoint.href, resource.resource_type, resource.id, resource.version, e
                    );
                    session.reject(resource);
                    self.last_error = Some(e.to_string());
                    let _ = self.events.send(EngineEvent::ResourceRejected {
                        id: resource.id,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Follows node removal or replacement in the store. Returns whether
    /// the session carries on as before.
    fn reconcile_node(&mut self) -> bool {
        let current = self.store.node().map(|n| n.id);
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if session.node_id.is_some() && session.node_id == current {
            return true;
        }
        match current {
            None => {
                info!("Node removed; ending registration with {}", session.endpoint.href);
                self.end_session();
            }
            Some(id) => {
                info!("Node replaced by {}; registering afresh", id);
                session.reset_registration();
                self.clear_timers();
                self.transition(EngineState::Registering);
            }
        }
        false
    }

    // ── Steady state ─────────────────────────────────────────────

    async fn heartbeat(&mut self) {
        self.heartbeat_at = None;
        let Some((endpoint, node_id)) = self.registered_node() else {
            return;
        };
        let result = bounded(
            self.call_budget(CallKind::Heartbeat),
            self.client.heartbeat(&endpoint, node_id),
        )
        .await;
        self.handle_heartbeat(result);
    }

    async fn push(&mut self) {
        self.push_at = None;
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if !session.node_registered {
            return;
        }
        let diff = self.store.diff(&session.acked);
        if diff.is_empty() && !session.rejected.keys().any(|id| !self.store.contains(id)) {
            return;
        }
        debug!("Pushing {} changes to {}", diff.len(), session.endpoint.href);

        match self.send_diff(diff).await {
            Ok(()) => {
                if self.reconcile_node() {
                    self.settle();
                }
            }
            Err(e) => self.on_failure(e),
        }
    }

    /// DEGRADED recovery: check with a heartbeat, then catch up.
    async fn retry(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if !session.node_registered {
            self.transition(EngineState::Registering);
            return;
        }
        let Some((endpoint, node_id)) = self.registered_node() else {
            return;
        };
        let result = bounded(
            self.call_budget(CallKind::Heartbeat),
            self.client.heartbeat(&endpoint, node_id),
        )
        .await;
        if self.handle_heartbeat(result) {
            self.push().await;
        }
    }

    /// Applies a heartbeat outcome. Returns whether it succeeded.
    fn handle_heartbeat(&mut self, result: RegistryResult<Duration>) -> bool {
        let now = Instant::now();
        match result {
            Ok(reported) => {
                let interval = adopt_interval(&self.config, reported);
                if interval != self.heartbeat_interval {
                    info!("Registry heartbeat interval is {:?}", interval);
                }
                self.heartbeat_interval = interval;
                if let Some(session) = self.session.as_mut() {
                    session.lease_interval = interval;
                    session.last_heartbeat_at = Some(Utc::now());
                    session.heartbeat_rejected = false;
                    session.record_success(now);
                }
                self.heartbeat_at = Some(later(now, interval));
                self.settle();
                true
            }
            Err(e) if e.is_rejection() => {
                error!("Registry refused heartbeat: {}", e);
                self.last_error = Some(e.to_string());
                if let Some(session) = self.session.as_mut() {
                    session.heartbeat_rejected = true;
                }
                self.heartbeat_at = Some(later(now, self.heartbeat_interval));
                self.settle();
                false
            }
            Err(e) => {
                self.on_failure(e);
                false
            }
        }
    }

    fn registered_node(&self) -> Option<(RegistryEndpoint, ResourceId)> {
        let session = self.session.as_ref()?;
        if !session.node_registered {
            return None;
        }
        session.node_id.map(|id| (session.endpoint.clone(), id))
    }

    // ── Failure handling ─────────────────────────────────────────

    /// Unreachable or lost-registration outcome of any call.
    fn on_failure(&mut self, failure: RegistryError) {
        let now = Instant::now();
        self.last_error = Some(failure.to_string());
        self.note_unavailable();

        let Some(session) = self.session.as_mut() else {
            return;
        };
        let failures = session.record_failure();
        let expired =
            failure.is_transient() && session.lease_expired(now, self.config.lease_expiry_factor);
        if failures > self.config.failure_threshold || expired {
            let reason = if expired {
                format!("no successful exchange within the lease: {failure}")
            } else {
                format!("{failures} consecutive failures: {failure}")
            };
            self.fail_over(&reason);
            return;
        }

        let delay = if failure.is_session_lost() {
            warn!(
                "Registry {} no longer holds our registration: {}",
                session.endpoint.href, failure
            );
            session.reset_registration();
            Duration::ZERO
        } else {
            warn!(
                "Registry {} failing ({} consecutive): {}",
                session.endpoint.href, failures, failure
            );
            self.config.backoff.delay_for_attempt(failures)
        };

        self.heartbeat_at = None;
        self.push_at = None;
        self.retry_at = Some(later(now, delay));
        self.transition(EngineState::Degraded);
    }

    fn fail_over(&mut self, reason: &str) {
        let until = later(Instant::now(), self.config.cooldown());
        if let Some(session) = self.session.take() {
            warn!("Abandoning registry {}: {}", session.endpoint.href, reason);
            self.locator.cool_down(&session.endpoint, until);
        }
        self.clear_timers();
        self.transition(EngineState::FailedOver);
        self.transition(EngineState::Discovering);
    }

    fn end_session(&mut self) {
        self.session = None;
        self.clear_timers();
        self.transition(EngineState::Discovering);
    }

    fn note_unavailable(&mut self) {
        if let Some(p2p) = self.p2p.as_mut() {
            p2p.record_failure();
        }
    }

    fn clear_timers(&mut self) {
        self.heartbeat_at = None;
        self.push_at = None;
        self.retry_at = None;
    }

    /// HEALTHY or DEGRADED once registered and not waiting on a retry.
    fn settle(&mut self) {
        let Some(session) = &self.session else {
            return;
        };
        if !session.node_registered || self.retry_at.is_some() {
            return;
        }
        let next = if session.has_refusals() {
            EngineState::Degraded
        } else {
            EngineState::Healthy
        };
        self.transition(next);
    }

    // ── Shutdown ─────────────────────────────────────────────────

    async fn shutdown(&mut self) {
        self.clear_timers();
        if let Some(session) = self.session.take() {
            if session.node_registered {
                self.deregister(session).await;
            }
        }
        self.transition(EngineState::Discovering);
        info!("Registration engine stopped");
    }

    /// Deletes everything the registry acknowledged, children before
    /// parents. A registry that stops answering is left to expire us.
    async fn deregister(&self, session: RegistrationSession) {
        let budget = self.call_budget(CallKind::DeleteResource);
        let endpoint = session.endpoint;
        let mut removals: Vec<(ResourceId, VersionStamp)> = session.acked.into_iter().collect();
        removals.sort_by(|a, b| {
            b.1.resource_type
                .cmp(&a.1.resource_type)
                .then_with(|| a.0.cmp(&b.0))
        });

        let client = Arc::clone(&self.client);
        let href = endpoint.href.clone();
        let deregistration = async move {
            for (id, stamp) in removals {
                let result =
                    bounded(budget, client.delete_resource(&endpoint, stamp.resource_type, id))
                        .await;
                match result {
                    Ok(()) => {}
                    Err(e) if e.is_transient() => return Err(e),
                    Err(e) => debug!("Delete of {} {} on shutdown: {}", stamp.resource_type, id, e),
                }
            }
            Ok(())
        };

        match tokio::time::timeout(self.config.deregister_timeout(), deregistration).await {
            Ok(Ok(())) => info!("Deregistered from {}", href),
            Ok(Err(e)) => warn!("Deregistration from {} incomplete, leaving it to expire: {}", href, e),
            Err(_) => warn!("Deregistration from {} timed out, leaving it to expire", href),
        }
    }

    /// Time allowed for one call of `kind`.
    fn call_budget(&self, kind: CallKind) -> Duration {
        self.config
            .request_timeout()
            .saturating_mul(self.client.round_trips(kind).max(1))
    }

    // ── Status ───────────────────────────────────────────────────

    fn transition(&mut self, to: EngineState) {
        let from = self.state;
        if from == to {
            return;
        }
        info!("Registration state {} -> {}", from, to);
        self.state = to;
        if to == EngineState::Healthy {
            self.last_error = None;
        }
        let _ = self.events.send(EngineEvent::StateChanged { from, to });
        self.publish_status();
    }

    fn status(&self) -> EngineStatus {
        let session = self.session.as_ref();
        let mut rejected: Vec<ResourceId> = session
            .map(|s| s.rejected.keys().copied().collect())
            .unwrap_or_default();
        rejected.sort();

        EngineStatus {
            state: self.state,
            endpoint: session.map(|s| s.endpoint.clone()),
            registered: session.is_some_and(|s| s.node_registered),
            session_started_at: session.map(|s| s.started_at),
            last_heartbeat_at: session.and_then(|s| s.last_heartbeat_at),
            heartbeat_interval_ms: u64::try_from(self.heartbeat_interval.as_millis())
                .unwrap_or(u64::MAX),
            consecutive_failures: session.map_or(0, |s| s.consecutive_failures),
            rejected,
            last_error: self.last_error.clone(),
        }
    }

    fn publish_status(&self) {
        let status = self.status();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

/// Runs a registry call with an upper bound; running out of time is the
/// same as an unreachable registry.
async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = RegistryResult<T>>,
) -> RegistryResult<T> {
    tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
        Err(RegistryError::Unreachable(format!(
            "no response within {limit:?}"
        )))
    })
}

/// The heartbeat interval to follow, given the one a registry reported.
fn adopt_interval(config: &EngineConfig, reported: Duration) -> Duration {
    if heartbeat_interval_in_range(reported) {
        reported
    } else {
        let fallback = config.default_heartbeat_interval();
        warn!(
            "Registry asked for a {:?} heartbeat interval; using {:?}",
            reported, fallback
        );
        fallback
    }
}

/// `now + after`, saturating far in the future instead of overflowing.
fn later(now: Instant, after: Duration) -> Instant {
    now.checked_add(after)
        .unwrap_or_else(|| now + Duration::from_secs(FAR_FUTURE_SECS))
}

const FAR_FUTURE_SECS: u64 = 86_400 * 365;

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
