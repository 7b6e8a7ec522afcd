//! Configuration, node bootstrap and the HTTP status API for the node
//! facade agent.

pub mod api;
pub mod config;
pub mod node;

pub use api::{build_router, AppState};
pub use config::{load_or_generate_node_id, AgentConfig, NodeConfig};
pub use node::node_resource;
