//! federationd - swarm federation state reconciliation daemon
//!
//! Serves the sync endpoint and management API, registers bootstrap peers,
//! pulls their full state once, then gossips deltas on a fixed interval.

use anyhow::Context;
use clap::Parser;
use federation_core::NodeId;
use federation_net::HttpTransport;
use federationd::config::Config;
use federationd::server::router;
use federationd::{AntiEntropy, FederatedState};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse configuration
    let config = Config::parse();
    init_logging(&config);

    info!(
        "federationd v{} - swarm federation state reconciliation",
        env!("CARGO_PKG_VERSION")
    );

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }

    if let Err(e) = run(config).await {
        error!("Daemon error: {:#}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn init_logging(config: &Config) {
    let level = if config.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "federationd={level},federation_net={level},federation_core={level}"
        ))
    });
    let json = config.log_format == "json";

    tracing_subscriber::registry()
        .with(filter)
        .with((!json).then(|| fmt::layer()))
        .with(json.then(|| fmt::layer().json()))
        .init();
}

async fn run(config: Config) -> anyhow::Result<()> {
    let node_id = NodeId::new(config.node_id());
    let state = Arc::new(FederatedState::new(node_id.clone()));
    let transport = Arc::new(HttpTransport::new(config.rpc_timeout())?);
    let engine = Arc::new(AntiEntropy::new(
        state.clone(),
        transport,
        config.anti_entropy(),
    ));

    let mut bootstrap = Vec::new();
    for peer in &config.bootstrap {
        match state.add_peer(peer.into()) {
            Ok(()) => bootstrap.push(NodeId::new(peer.id.as_str())),
            Err(e) => warn!("Skipping bootstrap peer {}: {}", peer.id, e),
        }
    }

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    info!("Node {} listening on {}", node_id, config.listen);

    engine.spawn_bootstrap(bootstrap);
    let sync_loop = engine.spawn();

    let app = router(state, config.max_body_bytes);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    engine.shutdown().await;
    if let Err(e) = sync_loop.await {
        warn!("Anti-entropy task ended abnormally: {}", e);
    }
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
