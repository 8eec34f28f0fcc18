// src/main.rs

//! The main entry point for the Mastermind coordinator.

use anyhow::Result;
use mastermind::config::Config;
use mastermind::core::balancer::Balancer;
use mastermind::core::balancer::weights::DynamicKnobs;
use mastermind::core::infrastructure::Infrastructure;
use mastermind::core::inventory::{CachedInventory, StaticInventory};
use mastermind::core::namespaces::NamespaceRegistry;
use mastermind::core::session::{MemoryBackend, Session};
use mastermind::core::timed_queue::TimedQueue;
use mastermind::core::topology::ClusterState;
use mastermind::core::updater::NodeInfoUpdater;
use mastermind::core::worker::Worker;
use parking_lot::RwLock;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::filter::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();
    if args.contains(&"--version".to_string()) {
        println!("Mastermind version {VERSION}");
        return Ok(());
    }

    // The configuration path can be provided via a --config flag; otherwise
    // it defaults to "mastermind.toml".
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("mastermind.toml");

    let config = Config::from_file(config_path)?;

    let log_level =
        env::var("RUST_LOG").unwrap_or_else(|_| format!("mastermind={}", config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .compact()
        .with_ansi(true)
        .init();

    info!("Starting Mastermind coordinator v{VERSION}...");

    // The storage client is pluggable; the built-in backend keeps everything
    // in process memory and is intended for development. Production
    // deployments embed a real client through the library API.
    let backend = Arc::new(MemoryBackend::new());
    warn!("no external storage client wired in; using the in-memory backend");

    let timeout = Duration::from_secs(config.storage.wait_timeout);
    let storage = Session::new(backend.clone(), timeout);
    let meta = Session::new(backend, timeout).scoped(config.metadata.groups.clone());

    let state = Arc::new(RwLock::new(ClusterState::new()));
    let inventory = Arc::new(CachedInventory::new(Arc::new(StaticInventory::new(
        config.inventory.dc_by_host.clone(),
        config.inventory.default_dc.clone(),
    ))));
    let infrastructure = Arc::new(Infrastructure::new());
    let knobs = Arc::new(DynamicKnobs::new(
        (config.reconciler.nodes_reload_period * 3) as f64,
    ));

    let queue = TimedQueue::new();
    queue.start();

    let updater = NodeInfoUpdater::new(
        state.clone(),
        storage.clone(),
        meta.clone(),
        queue.clone(),
        config.reconciler.clone(),
        knobs.clone(),
    );
    updater.clone().start();

    let namespaces = NamespaceRegistry::new(meta.clone());
    let balancer = Arc::new(Balancer::new(
        state,
        storage,
        meta,
        inventory,
        infrastructure,
        namespaces,
        config.balancer.clone(),
        knobs,
    ));
    let _worker = Worker::new(balancer, updater);

    info!("coordinator is running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    queue.shutdown();
    Ok(())
}
