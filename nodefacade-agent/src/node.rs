//! The node resource this agent speaks for.

use crate::config::NodeConfig;
use chrono::Utc;
use nodefacade_registration::DEFAULT_API_VERSION;
use nodefacade_types::{Resource, ResourceId};
use serde_json::json;

/// Builds the node resource announced at startup.
pub fn node_resource(id: ResourceId, config: &NodeConfig) -> Resource {
    let href = format!("http://{}/", socket(config));
    let now = Utc::now();
    Resource::node(
        id,
        json!({
            "id": id.to_string(),
            "version": format!("{}:{}", now.timestamp(), now.timestamp_subsec_nanos()),
            "label": config.label,
            "description": config.description,
            "tags": {},
            "href": href,
            "hostname": config.hostname,
            "api": {
                "versions": [DEFAULT_API_VERSION],
                "endpoints": [{
                    "host": config.address.to_string(),
                    "port": config.http_port,
                    "protocol": "http",
                }],
            },
            "caps": {},
            "services": [],
            "clocks": [],
            "interfaces": [],
        }),
    )
}

fn socket(config: &NodeConfig) -> String {
    match config.address {
        std::net::IpAddr::V4(v4) => format!("{}:{}", v4, config.http_port),
        std::net::IpAddr::V6(v6) => format!("[{}]:{}", v6, config.http_port),
    }
}
