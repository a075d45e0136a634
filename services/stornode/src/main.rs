// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Storage Node Service
//!
//! Runs a single storage target:
//!
//! - Loads persisted cluster metadata from the config directory
//! - Restarts a resilver interrupted by the previous run
//! - Reloads tunables from CONFIG_FILE on SIGUSR1
//! - Aborts running jobs on shutdown

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{debug, info};

use stornode::config::NodeConfig;
use stornode::metrics;
use stornode::{Collaborators, LoopbackSyncer, NoTransport, TargetNode};

fn print_version() {
    let version = env!("CARGO_PKG_VERSION");
    let name = env!("CARGO_PKG_NAME");
    let buildstamp = option_env!("STAMP").unwrap_or("no-STAMP");
    println!("{} {} ({})", name, version, buildstamp);
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --version and --help
    let args: Vec<String> = std::env::args().collect();
    #[allow(clippy::never_loop)] // Intentional: early return on first recognized arg
    for arg in &args[1..] {
        match arg.as_str() {
            "-V" | "--version" => {
                print_version();
                return Ok(());
            }
            "-h" | "--help" => {
                print_version();
                println!("Usage: {} [OPTIONS]", args[0]);
                println!();
                println!("Options:");
                println!("  -h, --help       Display this information");
                println!("  -V, --version    Display the program's version number");
                println!();
                println!("Environment variables:");
                println!("  STORNODE_ID      This node's ID in the cluster map (required)");
                println!("  MOUNTPATHS       Comma-separated mountpath directories (required)");
                println!(
                    "  CONFIG_DIR       Directory for persisted metadata (default: /var/lib/stornode)"
                );
                println!(
                    "  CONFIG_FILE      Path to JSON config file for SIGUSR1 reloading (optional)"
                );
                println!("  RUST_LOG         Log filter (default: stornode=info)");
                return Ok(());
            }
            _ => {
                eprintln!("Unknown option: {}", arg);
                std::process::exit(1);
            }
        }
    }

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "stornode=info".to_string()),
        ))
        .init();

    print_version();
    metrics::register_metrics();

    let config = NodeConfig::from_env().context("Failed to load configuration")?;
    info!(
        node_id = %config.node_id,
        config_dir = %config.config_dir.display(),
        mountpaths = config.mountpaths.len(),
        "configuration loaded"
    );
    let (config_tx, config_rx) = watch::channel(config.clone());

    // Start config file watcher if CONFIG_FILE is set (Unix only)
    #[cfg(unix)]
    if let Ok(config_file) = std::env::var("CONFIG_FILE") {
        use std::path::PathBuf;

        let config_path = PathBuf::from(&config_file);
        if tokio::fs::try_exists(&config_path).await.unwrap_or(false) {
            tokio::spawn(NodeConfig::start_config_watcher(
                config_path,
                config.clone(),
                config_tx,
            ));
            info!(
                config_file = %config_file,
                "Config watcher started - send SIGUSR1 to reload"
            );
        } else {
            tracing::warn!(
                config_file = %config_file,
                "CONFIG_FILE specified but file does not exist, config reloading disabled"
            );
        }
    }

    // No cluster transport: metadata distribution loops back to this node
    let syncer = Arc::new(LoopbackSyncer::new());
    let node = Arc::new(
        TargetNode::new(
            config_rx.clone(),
            Collaborators {
                sender: Arc::new(NoTransport),
                syncer: syncer.clone(),
                capacity: None,
            },
        )
        .context("Failed to create node")?,
    );
    syncer.bind(&node);

    node.load_metadata().await;
    if let Some(id) = node
        .resume_interrupted()
        .context("Failed to resume interrupted jobs")?
    {
        info!(xact_id = %id, "resumed resilver");
    }

    // Push reloaded tunables into components that cache them
    let reloader = Arc::clone(&node);
    let mut updates = config_rx;
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let config = updates.borrow_and_update().clone();
            reloader.apply_config(&config);
        }
    });

    info!("Storage node running");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");
    node.shutdown().await;
    debug!(metrics = %metrics::gather_metrics(), "final metrics");
    Ok(())
}
