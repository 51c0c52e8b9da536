//! Proxy agent control loops.
//!
//! Three independently scheduled loops share one `StatusCache`:
//!
//! ```text
//! service sync (P1) --publish--+
//!                              +--> StatusCache --pending/ack--> report (P2)
//! dns sync (P1)     --publish--+
//! ```
//!
//! A failing firing aborts without touching the cache. The next firing
//! recomputes the full desired state from scratch.

use std::sync::Arc;
use std::time::Duration;

use mk8s_reconcile::{run_periodic, SyncError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::client::ControlPlaneClient;
use crate::hosts::HostsController;
use crate::rules::RuleController;
use crate::status::{StatusCache, StatusSink};

/// Handles of the spawned loops.
pub struct RunningProxy {
    pub service_sync: JoinHandle<()>,
    pub dns_sync: JoinHandle<()>,
    pub report: JoinHandle<()>,
}

impl RunningProxy {
    /// Wait for every loop to exit.
    pub async fn join(self) {
        let _ = tokio::join!(self.service_sync, self.dns_sync, self.report);
    }
}

pub struct ProxyAgent {
    client: Arc<ControlPlaneClient>,
    rules: Arc<dyn RuleController>,
    hosts: Arc<dyn HostsController>,
    cache: Arc<StatusCache>,
    sink: Arc<dyn StatusSink>,
    sync_interval: Duration,
    report_interval: Duration,
}

impl ProxyAgent {
    pub fn new(
        client: Arc<ControlPlaneClient>,
        rules: Arc<dyn RuleController>,
        hosts: Arc<dyn HostsController>,
        sink: Arc<dyn StatusSink>,
        sync_interval: Duration,
        report_interval: Duration,
    ) -> Self {
        Self {
            client,
            rules,
            hosts,
            cache: Arc::new(StatusCache::new()),
            sink,
            sync_interval,
            report_interval,
        }
    }

    pub fn cache(&self) -> Arc<StatusCache> {
        Arc::clone(&self.cache)
    }

    /// Initialize both controllers. Failure is fatal to startup.
    pub async fn init(&self) -> Result<(), SyncError> {
        self.rules.init().await?;
        self.hosts.init().await?;
        Ok(())
    }

    /// One service-sync firing: fetch, compute, commit, then publish.
    pub async fn sync_services_once(&self) -> Result<(), SyncError> {
        let services = self.client.fetch_services().await?;
        let endpoints = self.client.fetch_endpoints().await?;

        let status = self.rules.sync_config(&services, &endpoints).await?;
        self.rules.commit().await?;

        let rule_count = status.rule_count;
        let generation = self.cache.publish_services(status).await;
        debug!(
            services = services.len(),
            endpoints = endpoints.len(),
            rule_count,
            generation,
            "Service sync complete"
        );
        Ok(())
    }

    /// One DNS-sync firing.
    pub async fn sync_dns_once(&self) -> Result<(), SyncError> {
        let records = self.client.fetch_dns().await?;
        let status = self.hosts.sync_config(&records).await?;

        let entries = status.entries.len();
        let generation = self.cache.publish_dns(status).await;
        debug!(records = records.len(), entries, generation, "DNS sync complete");
        Ok(())
    }

    /// One report firing. Snapshots published while the report is in flight
    /// stay dirty for the next firing.
    pub async fn report_once(&self) -> Result<(), SyncError> {
        let report = self.cache.pending().await;
        if report.is_empty() {
            return Ok(());
        }

        self.sink.send(&report).await?;

        let (services, dns) = self.cache.acknowledge(&report).await;
        debug!(
            services_cleared = services,
            dns_cleared = dns,
            "Status report acknowledged"
        );
        Ok(())
    }

    /// Spawn the three loops. Syncs fire immediately, the report loop waits
    /// one period first.
    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> RunningProxy {
        info!(
            sync_interval_ms = self.sync_interval.as_millis() as u64,
            report_interval_ms = self.report_interval.as_millis() as u64,
            "Starting proxy agent loops"
        );

        let agent = Arc::clone(self);
        let rx = shutdown.clone();
        let service_sync = tokio::spawn(async move {
            run_periodic("service_sync", agent.sync_interval, true, rx, || {
                agent.sync_services_once()
            })
            .await
        });

        let agent = Arc::clone(self);
        let rx = shutdown.clone();
        let dns_sync = tokio::spawn(async move {
            run_periodic("dns_sync", agent.sync_interval, true, rx, || {
                agent.sync_dns_once()
            })
            .await
        });

        let agent = Arc::clone(self);
        let report = tokio::spawn(async move {
            run_periodic("status_report", agent.report_interval, false, shutdown, || {
                agent.report_once()
            })
            .await
        });

        RunningProxy {
            service_sync,
            dns_sync,
            report,
        }
    }
}
