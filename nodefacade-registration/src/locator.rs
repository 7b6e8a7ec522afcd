//! Registry location.
//!
//! The locator keeps the priority-ordered list of registries this node may
//! register with. The list is either fixed by configuration or fed by a
//! background discovery task; in both cases readers get an atomic snapshot
//! and a change notification whenever the ordering changes.
//!
//! Endpoints that failed recently are put on cooldown. A cooling-down
//! endpoint stays in the list (it is still advertised) but is not offered as
//! a candidate until the cooldown ends.

use crate::endpoint::{RegistryEndpoint, DEFAULT_API_VERSION};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

/// A shared, immutable view of the ordered endpoint list.
pub type EndpointList = Arc<Vec<RegistryEndpoint>>;

/// Where registries come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Registries to use instead of discovery. Non-empty disables discovery.
    pub static_registries: Vec<RegistryEndpoint>,
    /// Registration API version the node speaks.
    pub api_version: String,
    /// `http` or `https`.
    pub protocol: String,
    /// Also browse the pre-v1.3 `_nmos-registration._tcp` service type.
    pub browse_legacy: bool,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            static_registries: Vec::new(),
            api_version: DEFAULT_API_VERSION.to_string(),
            protocol: "http".to_string(),
            browse_legacy: true,
        }
    }
}

struct LocatorInner {
    is_static: bool,
    /// Keyed by advertisement name (service instance for mDNS, href for
    /// static entries).
    advertised: Mutex<HashMap<String, RegistryEndpoint>>,
    /// href -> end of cooldown.
    cooldowns: Mutex<HashMap<String, Instant>>,
    list: watch::Sender<EndpointList>,
}

/// Priority-ordered registry list with change notification.
#[derive(Clone)]
pub struct RegistryLocator {
    inner: Arc<LocatorInner>,
}

impl RegistryLocator {
    fn with_entries(is_static: bool, entries: HashMap<String, RegistryEndpoint>) -> Self {
        let ordered = order(&entries);
        let (list, _) = watch::channel(Arc::new(ordered));
        Self {
            inner: Arc::new(LocatorInner {
                is_static,
                advertised: Mutex::new(entries),
                cooldowns: Mutex::new(HashMap::new()),
                list,
            }),
        }
    }

    /// A locator whose list is fixed. Discovery advertisements are ignored.
    pub fn new_static(endpoints: Vec<RegistryEndpoint>) -> Self {
        let entries = endpoints
            .into_iter()
            .map(|e| (e.href.clone(), e))
            .collect();
        Self::with_entries(true, entries)
    }

    /// A locator fed by discovery, initially empty.
    pub fn discovering() -> Self {
        Self::with_entries(false, HashMap::new())
    }

    /// Builds the locator described by `config`.
    pub fn from_config(config: &LocatorConfig) -> Self {
        if config.static_registries.is_empty() {
            Self::discovering()
        } else {
            let endpoints = config
                .static_registries
                .iter()
                .cloned()
                .map(|e| RegistryEndpoint::new(e.href, e.priority).with_api_version(e.api_version))
                .collect();
            Self::new_static(endpoints)
        }
    }

    /// Returns whether the list is fixed by configuration.
    pub fn is_static(&self) -> bool {
        self.inner.is_static
    }

    /// Records an advertised registry. Returns whether the ordered list
    /// changed.
    pub fn advertise(&self, name: impl Into<String>, endpoint: RegistryEndpoint) -> bool {
        if self.inner.is_static {
            debug!("Ignoring advertised registry {} (static configuration)", endpoint);
            return false;
        }
        let mut advertised = self.inner.advertised.lock();
        advertised.insert(name.into(), endpoint);
        self.publish(&advertised)
    }

    /// Forgets an advertised registry. Returns whether the ordered list
    /// changed.
    pub fn withdraw(&self, name: &str) -> bool {
        if self.inner.is_static {
            return false;
        }
        let mut advertised = self.inner.advertised.lock();
        if advertised.remove(name).is_none() {
            return false;
        }
        self.publish(&advertised)
    }

    fn publish(&self, advertised: &HashMap<String, RegistryEndpoint>) -> bool {
        let ordered = order(advertised);
        self.inner.list.send_if_modified(|current| {
            if **current == ordered {
                false
            } else {
                *current = Arc::new(ordered);
                true
            }
        })
    }

    /// The current ordered list.
    pub fn endpoints(&self) -> EndpointList {
        self.inner.list.borrow().clone()
    }

    /// Subscribes to list changes.
    pub fn subscribe(&self) -> watch::Receiver<EndpointList> {
        self.inner.list.subscribe()
    }

    /// Returns whether an endpoint with this href is currently listed.
    pub fn contains(&self, href: &str) -> bool {
        self.inner.list.borrow().iter().any(|e| e.href == href)
    }

    /// Withholds `endpoint` from [`candidates`](Self::candidates) until
    /// `until`.
    pub fn cool_down(&self, endpoint: &RegistryEndpoint, until: Instant) {
        info!("Registry {} cooling down", endpoint.href);
        self.inner
            .cooldowns
            .lock()
            .insert(endpoint.href.clone(), until);
    }

    /// Returns whether `href` is cooling down at `now`.
    pub fn is_cooling_down(&self, href: &str, now: Instant) -> bool {
        self.inner
            .cooldowns
            .lock()
            .get(href)
            .is_some_and(|until| *until > now)
    }

    /// Listed endpoints that may be used at `now`, most preferred first.
    pub fn candidates(&self, now: Instant) -> Vec<RegistryEndpoint> {
        let mut cooldowns = self.inner.cooldowns.lock();
        cooldowns.retain(|_, until| *until > now);
        self.inner
            .list
            .borrow()
            .iter()
            .filter(|e| !cooldowns.contains_key(&e.href))
            .cloned()
            .collect()
    }

    /// The earliest moment a listed endpoint leaves cooldown.
    pub fn next_cooldown_expiry(&self, now: Instant) -> Option<Instant> {
        let cooldowns = self.inner.cooldowns.lock();
        self.inner
            .list
            .borrow()
            .iter()
            .filter_map(|e| cooldowns.get(&e.href).copied())
            .filter(|until| *until > now)
            .min()
    }
}

/// Orders endpoints by preference, keeping the best entry per href.
fn order(entries: &HashMap<String, RegistryEndpoint>) -> Vec<RegistryEndpoint> {
    let mut best: HashMap<&str, &RegistryEndpoint> = HashMap::new();
    for endpoint in entries.values() {
        best.entry(endpoint.href.as_str())
            .and_modify(|current| {
                if endpoint.preference(current).is_lt() {
                    *current = endpoint;
                }
            })
            .or_insert(endpoint);
    }
    let mut ordered: Vec<RegistryEndpoint> = best.into_values().cloned().collect();
    ordered.sort_by(RegistryEndpoint::preference);
    ordered
}
