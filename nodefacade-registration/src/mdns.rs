//! Registry discovery over mDNS/DNS-SD.
//!
//! Registries advertise `_nmos-register._tcp` (and, before v1.3,
//! `_nmos-registration._tcp`) with TXT records carrying their priority,
//! supported API versions and protocol. The browser turns those
//! advertisements into [`RegistryLocator`] entries.

use crate::endpoint::RegistryEndpoint;
use crate::error::EngineError;
use crate::locator::{LocatorConfig, RegistryLocator};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Current registration service type.
pub const REGISTRATION_SERVICE: &str = "_nmos-register._tcp.local.";

/// Service type used by registries older than v1.3.
pub const LEGACY_REGISTRATION_SERVICE: &str = "_nmos-registration._tcp.local.";

pub const TXT_PRIORITY: &str = "pri";
pub const TXT_API_VERSIONS: &str = "api_ver";
pub const TXT_API_PROTOCOL: &str = "api_proto";

/// Builds an endpoint from one resolved advertisement.
///
/// Returns `None` when the advertisement is unusable for this node: no
/// parseable priority, no matching API version, or the wrong protocol.
pub fn endpoint_from_txt(
    address: IpAddr,
    port: u16,
    txt: &HashMap<String, String>,
    config: &LocatorConfig,
) -> Option<RegistryEndpoint> {
    let priority = txt.get(TXT_PRIORITY)?.trim().parse::<u32>().ok()?;

    let versions = txt.get(TXT_API_VERSIONS)?;
    if !versions
        .split(',')
        .any(|v| v.trim() == config.api_version)
    {
        return None;
    }

    let protocol = txt
        .get(TXT_API_PROTOCOL)
        .map(|p| p.trim())
        .unwrap_or("http");
    if protocol != config.protocol {
        return None;
    }

    let host = match address {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{v6}]"),
    };
    Some(
        RegistryEndpoint::new(format!("{protocol}://{host}:{port}"), priority)
            .with_api_version(config.api_version.clone()),
    )
}

/// Picks one address deterministically, IPv4 first.
fn preferred_address(addresses: &HashSet<IpAddr>) -> Option<IpAddr> {
    addresses
        .iter()
        .filter(|a| a.is_ipv4())
        .min()
        .or_else(|| addresses.iter().min())
        .copied()
}

fn txt_of(info: &ServiceInfo) -> HashMap<String, String> {
    [TXT_PRIORITY, TXT_API_VERSIONS, TXT_API_PROTOCOL]
        .into_iter()
        .filter_map(|key| {
            info.get_property_val_str(key)
                .map(|val| (key.to_string(), val.to_string()))
        })
        .collect()
}

/// Background browser feeding a [`RegistryLocator`].
pub struct MdnsBrowser {
    daemon: ServiceDaemon,
    tasks: Vec<JoinHandle<()>>,
}

impl MdnsBrowser {
    /// Starts browsing. Must be called from within a Tokio runtime.
    pub fn start(locator: RegistryLocator, config: &LocatorConfig) -> Result<Self, EngineError> {
        let daemon = ServiceDaemon::new()?;
        Self::start_with_daemon(daemon, locator, config)
    }

    /// Starts browsing on an existing daemon, e.g. one shared with the P2P
    /// announcer.
    pub fn start_with_daemon(
        daemon: ServiceDaemon,
        locator: RegistryLocator,
        config: &LocatorConfig,
    ) -> Result<Self, EngineError> {
        let mut service_types = vec![REGISTRATION_SERVICE];
        if config.browse_legacy {
            service_types.push(LEGACY_REGISTRATION_SERVICE);
        }

        let mut tasks = Vec::with_capacity(service_types.len());
        for service_type in service_types {
            let receiver = daemon.browse(service_type)?;
            let locator = locator.clone();
            let config = config.clone();
            info!("Browsing for registries on {}", service_type);
            tasks.push(tokio::spawn(async move {
                while let Ok(event) = receiver.recv_async().await {
                    handle_event(&locator, &config, event);
                }
                debug!("mDNS browse for {} ended", service_type);
            }));
        }

        Ok(Self { daemon, tasks })
    }

    /// Stops browsing and shuts the daemon down.
    pub fn stop(self) {
        for task in &self.tasks {
            task.abort();
        }
        if let Err(e) = self.daemon.shutdown() {
            warn!("mDNS daemon shutdown failed: {}", e);
        }
    }
}

fn handle_event(locator: &RegistryLocator, config: &LocatorConfig, event: ServiceEvent) {
    match event {
        ServiceEvent::ServiceResolved(info) => {
            let Some(address) = preferred_address(info.get_addresses()) else {
                debug!("Registry {} resolved without an address", info.get_fullname());
                return;
            };
            match endpoint_from_txt(address, info.get_port(), &txt_of(&info), config) {
                Some(endpoint) => {
                    let shown = endpoint.to_string();
                    if locator.advertise(info.get_fullname(), endpoint) {
                        info!("Discovered registry {}", shown);
                    }
                }
                None => debug!(
                    "Ignoring registry {}: incompatible advertisement",
                    info.get_fullname()
                ),
            }
        }
        ServiceEvent::ServiceRemoved(_, fullname) => {
            if locator.withdraw(&fullname) {
                info!("Registry {} withdrawn", fullname);
            }
        }
        other => debug!("mDNS event: {:?}", other),
    }
}
