//! Agent configuration file.

use anyhow::{Context, Result};
use nodefacade_registration::{EngineConfig, HttpRegistryConfig, LocatorConfig, P2pConfig};
use nodefacade_types::ResourceId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::info;

/// How the node describes itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Fixed node id. When absent the id is read from (or created in)
    /// `id_file`.
    pub id: Option<ResourceId>,
    pub id_file: PathBuf,
    pub label: String,
    pub description: String,
    pub hostname: String,
    /// Address advertised in the node's `href` and mDNS records.
    pub address: IpAddr,
    /// Port of the status API.
    pub http_port: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: None,
            id_file: PathBuf::from("nodefacade-node.id"),
            label: "nodefacade".to_string(),
            description: "Node facade".to_string(),
            hostname: "nodefacade".to_string(),
            address: IpAddr::from([127, 0, 0, 1]),
            http_port: 12345,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub node: NodeConfig,
    pub locator: LocatorConfig,
    pub registry: HttpRegistryConfig,
    pub engine: EngineConfig,
    pub p2p: P2pConfig,
    /// Producer events buffered ahead of the store.
    pub apply_queue_capacity: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            locator: LocatorConfig::default(),
            registry: HttpRegistryConfig::default(),
            engine: EngineConfig::default(),
            p2p: P2pConfig::default(),
            apply_queue_capacity: 256,
        }
    }
}

impl AgentConfig {
    /// Reads the configuration at `path`. No path, or a path that does not
    /// exist, means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            info!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config
            .engine
            .validate()
            .context("Invalid engine configuration")?;
        Ok(config)
    }
}

/// Returns the node id stored at `path`, creating one if the file is
/// missing.
pub fn load_or_generate_node_id(path: &Path) -> Result<ResourceId> {
    if path.exists() {
        info!("Loading node id from {:?}", path);
        let text = fs::read_to_string(path).context("Failed to read node id file")?;
        ResourceId::parse(text.trim()).context("Failed to decode node id")
    } else {
        let id = ResourceId::new();
        info!("Generating node id {} at {:?}", id, path);
        fs::write(path, id.to_string()).context("Failed to write node id file")?;
        Ok(id)
    }
}
