//! Node facade agent
//!
//! Keeps this node's resources registered with an NMOS registry:
//! 1. Finds registries over DNS-SD, or uses the ones configured
//! 2. Registers the node and its resources, then heartbeats
//! 3. Fails over between registries and deregisters on Ctrl-C
//!
//! Usage:
//!   nodefacade-agent --config agent.json
//!   nodefacade-agent --registry http://registry.local:8235

use anyhow::{Context, Result};
use clap::Parser;
use mdns_sd::ServiceDaemon;
use nodefacade_agent::{
    build_router, load_or_generate_node_id, node_resource, AgentConfig, AppState,
};
use nodefacade_registration::{
    HttpRegistrationClient, LifecycleEngine, MdnsAnnouncer, MdnsBrowser, P2pAdvertiser,
    RegistryEndpoint, RegistryLocator,
};
use nodefacade_store::{spawn_apply_loop, ResourceStore};
use nodefacade_types::ResourceEvent;
use std::{path::PathBuf, sync::Arc};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "nodefacade-agent")]
#[command(about = "Registers an NMOS node with a registry and keeps it there")]
struct Args {
    /// Path to a JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Node label
    #[arg(long)]
    label: Option<String>,

    /// Port for the status API
    #[arg(long)]
    http_port: Option<u16>,

    /// Registry base URL; repeat for fallbacks in priority order. Disables discovery.
    #[arg(short, long = "registry")]
    registries: Vec<String>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { "debug" } else { "info" };
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_target(false)
        .compact()
        .init();

    let mut config = AgentConfig::load(args.config.as_deref())?;
    if let Some(label) = args.label {
        config.node.label = label;
    }
    if let Some(port) = args.http_port {
        config.node.http_port = port;
    }
    if !args.registries.is_empty() {
        config.locator.static_registries = args
            .registries
            .iter()
            .enumerate()
            .map(|(priority, href)| {
                RegistryEndpoint::new(href, priority as u32)
                    .with_api_version(config.locator.api_version.clone())
            })
            .collect();
    }

    let node_id = match config.node.id {
        Some(id) => id,
        None => load_or_generate_node_id(&config.node.id_file)?,
    };
    info!("Node ID: {}", node_id);

    let store = Arc::new(ResourceStore::new());
    let (publisher, apply_task) = spawn_apply_loop(store.clone(), config.apply_queue_capacity);
    publisher
        .publish(ResourceEvent::upsert(&node_resource(node_id, &config.node)))
        .await
        .context("Failed to store node resource")?;

    let locator = RegistryLocator::from_config(&config.locator);
    let needs_daemon = !locator.is_static() || config.p2p.enabled;
    let daemon = if needs_daemon {
        Some(ServiceDaemon::new().context("Failed to start mDNS daemon")?)
    } else {
        None
    };

    let browser = match &daemon {
        Some(daemon) if !locator.is_static() => Some(MdnsBrowser::start_with_daemon(
            daemon.clone(),
            locator.clone(),
            &config.locator,
        )?),
        _ => {
            info!("Using {} configured registries", locator.endpoints().len());
            None
        }
    };

    let client = Arc::new(HttpRegistrationClient::new(&config.engine, config.registry.clone())?);
    let mut engine = LifecycleEngine::new(store.clone(), locator, client, config.engine.clone())?;
    if let Some(daemon) = daemon.as_ref().filter(|_| config.p2p.enabled) {
        let announcer = MdnsAnnouncer::new(
            daemon.clone(),
            config.node.label.clone(),
            config.node.hostname.clone(),
            config.node.address,
            config.node.http_port,
        );
        engine = engine.with_p2p(P2pAdvertiser::new(config.p2p.clone(), Arc::new(announcer)));
    }
    let engine = engine.spawn();

    let state = AppState::new(store.clone(), engine.watch_status());
    let http_port = config.node.http_port;
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", http_port))
        .await
        .with_context(|| format!("Failed to bind status API on port {}", http_port))?;
    info!("Status API listening on 0.0.0.0:{}", http_port);
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, build_router(state)).await {
            warn!("Status API stopped: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");

    if let Err(e) = engine.shutdown().await {
        warn!("Engine shutdown: {}", e);
    }
    if let Some(browser) = browser {
        browser.stop();
    } else if let Some(daemon) = daemon {
        let _ = daemon.shutdown();
    }
    server.abort();

    drop(publisher);
    let _ = apply_task.await;
    info!("Stopped");
    Ok(())
}
