//! mk8s Proxy Agent
//!
//! Converges service NAT rules and hosts-file entries on this node with the
//! control plane's services, endpoints and DNS records.
//!
//! ## Architecture
//!
//! - **Service sync**: renders services and endpoints into iptables DNAT rules
//! - **DNS sync**: maintains a managed block in the hosts file
//! - **Status report**: forwards freshly synced snapshots

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mk8s_proxy_agent::config::Config;
use mk8s_proxy_agent::{
    ControlPlaneClient, DryRunApplier, EtcHostsController, IptablesController, IptablesRestore,
    LogSink, ProxyAgent, RuleController,
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
        sync_interval_secs = config.sync_interval.as_secs(),
        report_interval_ms = config.report_interval.as_millis() as u64,
        hosts_file = %config.hosts_file.display(),
        iptables_dry_run = config.iptables_dry_run,
        "Starting mk8s proxy agent"
    );

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let client = Arc::new(ControlPlaneClient::new(&config)?);
    let rules: Arc<dyn RuleController> = if config.iptables_dry_run {
        Arc::new(IptablesController::new(DryRunApplier))
    } else {
        Arc::new(IptablesController::new(IptablesRestore))
    };
    let hosts = Arc::new(EtcHostsController::new(config.hosts_file.clone()));

    let agent = Arc::new(ProxyAgent::new(
        client,
        rules,
        hosts,
        Arc::new(LogSink),
        config.sync_interval,
        config.report_interval,
    ));

    if let Err(e) = agent.init().await {
        error!(error = %e, "Proxy agent initialization failed");
        return Err(e).context("Proxy agent initialization failed");
    }

    let running = agent.spawn(shutdown_rx);

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    // Signal shutdown to all loops
    let _ = shutdown_tx.send(true);

    info!("Waiting for loops to shut down...");
    if tokio::time::timeout(Duration::from_secs(5), running.join())
        .await
        .is_err()
    {
        warn!("Loops did not stop within 5s");
    }

    info!("Proxy agent shutdown complete");
    Ok(())
}
