//! Registration lifecycle for the node facade.
//!
//! Keeps a node's resources registered with an NMOS registry: finds a
//! registry, registers the node and everything under it, heartbeats, pushes
//! changes as they happen, and moves to another registry when one fails.
//!
//! # Components
//!
//! - **Locator**: the priority-ordered registry list, static or fed by mDNS
//! - **Client**: the four registry operations, over HTTP or in memory
//! - **Engine**: the state machine that drives a registration session
//! - **P2P**: version advertisement for when no registry is reachable
//!
//! ## Lifecycle
//!
//! 1. **Discovering**: wait for a node resource and a usable registry
//! 2. **Registering**: register the node, then push the snapshot
//! 3. **Healthy**: heartbeat at the registry's interval, push diffs
//! 4. **Degraded**: back off and retry; re-register if the node expired
//! 5. **Failed over**: cool the registry down and discover again
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use nodefacade_registration::{
//!     EngineConfig, HttpRegistrationClient, HttpRegistryConfig, LifecycleEngine,
//!     RegistryEndpoint, RegistryLocator,
//! };
//! use nodefacade_store::ResourceStore;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(ResourceStore::new());
//! let locator = RegistryLocator::new_static(vec![
//!     RegistryEndpoint::new("http://registry.local:8235", 10),
//! ]);
//! let config = EngineConfig::default();
//! let client = Arc::new(HttpRegistrationClient::new(&config, HttpRegistryConfig::default())?);
//! let engine = LifecycleEngine::new(store, locator, client, config)?.spawn();
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
mod backoff;
pub mod client;
mod config;
mod endpoint;
mod engine;
mod error;
pub mod http;
pub mod locator;
pub mod mdns;
pub mod p2p;
mod session;

pub use auth::AuthConfig;
pub use backoff::BackoffConfig;
pub use client::{CallKind, RegistrationClient, MAX_HEARTBEAT_INTERVAL, MIN_HEARTBEAT_INTERVAL};
pub use config::EngineConfig;
pub use endpoint::{RegistryEndpoint, DEFAULT_API_VERSION};
pub use engine::{EngineEvent, EngineHandle, EngineState, EngineStatus, LifecycleEngine};
pub use error::{EngineError, RegistryError, RegistryResult};
pub use http::{HttpRegistrationClient, HttpRegistryConfig};
pub use locator::{LocatorConfig, RegistryLocator};
pub use mdns::MdnsBrowser;
pub use p2p::{Announcer, MdnsAnnouncer, P2pAdvertiser, P2pConfig};
pub use session::RegistrationSession;
