//! mk8s Node Agent
//!
//! Registers this node with the control plane, recovers pods assigned to it,
//! then converges local pods with the node's event feed while reporting
//! liveness via heartbeats.
//!
//! ## Architecture
//!
//! - **Registration**: the control plane assigns the node's identity
//! - **Recovery**: pods already assigned to the node are reattached or restarted
//! - **Event Loop**: pod add/update/remove events drive the pod manager
//! - **Heartbeat**: node status and local pods, reported periodically
//! - **Runtime**: abstracts container operations (mock in dev)

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mk8s_node_agent::config::Config;
use mk8s_node_agent::{
    ControlPlaneClient, HostStatusSource, HttpEventSubscriber, MockRuntime, NodeAgent, PodManager,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str())),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        api_server_url = %config.api_server_url,
        hostname = %config.node_hostname,
        ip = %config.node_ip,
        labels = ?config.node_labels,
        "Starting mk8s node agent"
    );

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let client = Arc::new(ControlPlaneClient::new(&config)?);
    let runtime = Arc::new(MockRuntime::new());
    let pods = Arc::new(PodManager::new(runtime));
    let status_source = Arc::new(HostStatusSource::new(
        config.node_hostname.clone(),
        config.node_ip.clone(),
    ));
    let subscriber = HttpEventSubscriber::new(
        Arc::clone(&client),
        config.event_poll_interval,
        config.event_batch_limit,
    );

    let agent = NodeAgent::new(config, client, pods, status_source);
    let running = match agent.start(&subscriber, shutdown_rx).await {
        Ok(running) => running,
        Err(e) => {
            error!(error = ?e, "Node agent startup failed");
            return Err(e);
        }
    };

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = running.event_loop => {
            match result {
                Ok(Ok(())) => info!("Event loop exited normally"),
                Ok(Err(e)) => error!(error = %e, "Event loop ended"),
                Err(e) => error!(error = %e, "Event loop task panicked"),
            }
        }
    }

    // Signal shutdown to all loops
    let _ = shutdown_tx.send(true);

    info!("Waiting for loops to shut down...");
    let drain = async {
        let _ = running.heartbeat.await;
        let _ = running.delivery.await;
    };
    if tokio::time::timeout(std::time::Duration::from_secs(5), drain)
        .await
        .is_err()
    {
        warn!("Loops did not stop within 5s");
    }

    info!("Node agent shutdown complete");
    Ok(())
}
