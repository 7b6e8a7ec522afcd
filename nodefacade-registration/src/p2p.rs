//! Peer-to-peer fallback advertisement.
//!
//! When no registry has been usable for a while, the node advertises its own
//! resource versions in the TXT records of its `_nmos-node._tcp` service so
//! that peers can discover changes without a registry. Each resource kind
//! has a counter that wraps at 255. Advertisement stops as soon as a
//! registration succeeds.

use crate::error::EngineError;
use mdns_sd::{ServiceDaemon, ServiceInfo};
use nodefacade_types::ResourceType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// Node API service type.
pub const NODE_SERVICE: &str = "_nmos-node._tcp.local.";

/// Publishes the node's TXT records.
pub trait Announcer: Send + Sync {
    fn announce(&self, txt: &HashMap<String, String>) -> Result<(), EngineError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct P2pConfig {
    pub enabled: bool,
    /// Failed registry attempts before advertising versions.
    pub cut_in_count: u32,
    /// TXT records always present (`api_proto`, `api_ver`, ...).
    pub base_txt: HashMap<String, String>,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cut_in_count: 5,
            base_txt: HashMap::from([
                ("api_proto".to_string(), "http".to_string()),
                ("api_ver".to_string(), "v1.0,v1.1,v1.2,v1.3".to_string()),
            ]),
        }
    }
}

/// TXT key carrying the version counter for `resource_type`.
pub fn version_key(resource_type: ResourceType) -> &'static str {
    match resource_type {
        ResourceType::Node => "ver_slf",
        ResourceType::Device => "ver_dvc",
        ResourceType::Source => "ver_src",
        ResourceType::Flow => "ver_flw",
        ResourceType::Sender => "ver_snd",
        ResourceType::Receiver => "ver_rcv",
    }
}

pub struct P2pAdvertiser {
    config: P2pConfig,
    announcer: Arc<dyn Announcer>,
    active: bool,
    failures: u32,
    versions: HashMap<ResourceType, u8>,
}

impl P2pAdvertiser {
    pub fn new(config: P2pConfig, announcer: Arc<dyn Announcer>) -> Self {
        Self {
            config,
            announcer,
            active: false,
            failures: 0,
            versions: HashMap::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn version(&self, resource_type: ResourceType) -> u8 {
        self.versions.get(&resource_type).copied().unwrap_or(0)
    }

    /// Counts a failed attempt to reach any registry.
    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
        if self.config.enabled && !self.active && self.failures >= self.config.cut_in_count {
            info!(
                "No registry after {} attempts; advertising resource versions",
                self.failures
            );
            self.active = true;
            self.publish();
        }
    }

    /// A registration succeeded.
    pub fn registered(&mut self) {
        self.failures = 0;
        if self.active {
            info!("Registered; withdrawing resource version advertisement");
            self.active = false;
            self.publish();
        }
    }

    pub fn on_resource_changed(&mut self, resource_type: ResourceType) {
        if !self.active {
            return;
        }
        let counter = self.versions.entry(resource_type).or_insert(0);
        *counter = counter.wrapping_add(1);
        self.publish();
    }

    /// Records currently advertised.
    pub fn txt_records(&self) -> HashMap<String, String> {
        let mut txt = self.config.base_txt.clone();
        if self.active {
            for resource_type in nodefacade_types::REGISTRATION_ORDER {
                txt.insert(
                    version_key(resource_type).to_string(),
                    self.version(resource_type).to_string(),
                );
            }
        }
        txt
    }

    fn publish(&self) {
        if let Err(e) = self.announcer.announce(&self.txt_records()) {
            warn!("Failed to update node advertisement: {}", e);
        }
    }
}

/// Announces the node service over mDNS.
pub struct MdnsAnnouncer {
    daemon: ServiceDaemon,
    instance: String,
    host: String,
    address: IpAddr,
    port: u16,
}

impl MdnsAnnouncer {
    pub fn new(
        daemon: ServiceDaemon,
        instance: impl Into<String>,
        host: impl Into<String>,
        address: IpAddr,
        port: u16,
    ) -> Self {
        let mut host = host.into();
        if !host.ends_with(".local.") {
            host = format!("{}.local.", host.trim_end_matches('.'));
        }
        Self {
            daemon,
            instance: instance.into(),
            host,
            address,
            port,
        }
    }
}

impl Announcer for MdnsAnnouncer {
    fn announce(&self, txt: &HashMap<String, String>) -> Result<(), EngineError> {
        let address = self.address.to_string();
        let info = ServiceInfo::new(
            NODE_SERVICE,
            &self.instance,
            &self.host,
            address.as_str(),
            self.port,
            txt.clone(),
        )?;
        self.daemon.register(info)?;
        Ok(())
    }
}

/// Announcer that keeps every record set it was given.
pub mod mock {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    pub struct RecordingAnnouncer {
        announcements: Mutex<Vec<HashMap<String, String>>>,
    }

    impl RecordingAnnouncer {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn announcements(&self) -> Vec<HashMap<String, String>> {
            self.announcements.lock().clone()
        }

        pub fn last(&self) -> Option<HashMap<String, String>> {
            self.announcements.lock().last().cloned()
        }
    }

    impl Announcer for RecordingAnnouncer {
        fn announce(&self, txt: &HashMap<String, String>) -> Result<(), EngineError> {
            self.announcements.lock().push(txt.clone());
            Ok(())
        }
    }
}
