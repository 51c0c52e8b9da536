//! Shared status cache and report sink.
//!
//! The service sync and DNS sync loops publish snapshots here after a fully
//! successful firing; the report loop drains them. Every read or write of a
//! snapshot together with its dirty flag happens under the one mutex, and the
//! mutex is never held across I/O.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mk8s_reconcile::{DirtySlot, Pending, SyncError};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

// =============================================================================
// Snapshots
// =============================================================================

/// Enforced NAT state of one service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRuleStatus {
    pub cluster_ip: String,
    pub ports: Vec<u16>,
    pub backends: usize,
}

/// Snapshot produced by a successful service sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicesStatus {
    /// Per-service state, keyed by service key.
    pub services: BTreeMap<String, ServiceRuleStatus>,
    pub rule_count: usize,
    pub synced_at: Option<DateTime<Utc>>,
}

/// Snapshot produced by a successful DNS sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsStatus {
    /// Managed hosts entries, host to IP.
    pub entries: BTreeMap<String, String>,
    pub synced_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Cache
// =============================================================================

/// Dirty snapshots copied out of the cache for one report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusReport {
    pub services: Option<Pending<ServicesStatus>>,
    pub dns: Option<Pending<DnsStatus>>,
}

impl StatusReport {
    pub fn is_empty(&self) -> bool {
        self.services.is_none() && self.dns.is_none()
    }
}

#[derive(Debug, Default)]
struct CacheState {
    services: DirtySlot<ServicesStatus>,
    dns: DirtySlot<DnsStatus>,
}

/// Latest synchronized snapshots plus their dirty flags.
#[derive(Debug, Default)]
pub struct StatusCache {
    state: Mutex<CacheState>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the services snapshot and mark it dirty.
    pub async fn publish_services(&self, status: ServicesStatus) -> u64 {
        self.state.lock().await.services.publish(status)
    }

    /// Replace the DNS snapshot and mark it dirty.
    pub async fn publish_dns(&self, status: DnsStatus) -> u64 {
        self.state.lock().await.dns.publish(status)
    }

    /// Copy every dirty snapshot with its generation.
    pub async fn pending(&self) -> StatusReport {
        let state = self.state.lock().await;
        StatusReport {
            services: state.services.pending(),
            dns: state.dns.pending(),
        }
    }

    /// Clear the flags of the snapshots in `report` that are still current.
    ///
    /// Returns `(services_cleared, dns_cleared)`.
    pub async fn acknowledge(&self, report: &StatusReport) -> (bool, bool) {
        let mut state = self.state.lock().await;
        let services = report
            .services
            .as_ref()
            .is_some_and(|p| state.services.acknowledge(p.generation));
        let dns = report
            .dns
            .as_ref()
            .is_some_and(|p| state.dns.acknowledge(p.generation));
        (services, dns)
    }

    pub async fn is_service_dirty(&self) -> bool {
        self.state.lock().await.services.is_dirty()
    }

    pub async fn is_dns_dirty(&self) -> bool {
        self.state.lock().await.dns.is_dirty()
    }

    pub async fn services(&self) -> ServicesStatus {
        self.state.lock().await.services.value().clone()
    }

    pub async fn dns(&self) -> DnsStatus {
        self.state.lock().await.dns.value().clone()
    }
}

// =============================================================================
// Sink
// =============================================================================

/// Destination of status reports.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn send(&self, report: &StatusReport) -> Result<(), SyncError>;
}

/// Logs a summary of each report.
///
/// The control plane has no status endpoint for the proxy agent yet.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl StatusSink for LogSink {
    async fn send(&self, report: &StatusReport) -> Result<(), SyncError> {
        if let Some(services) = &report.services {
            info!(
                generation = services.generation,
                services = services.value.services.len(),
                rules = services.value.rule_count,
                "Services status report"
            );
        }
        if let Some(dns) = &report.dns {
            info!(
                generation = dns.generation,
                entries = dns.value.entries.len(),
                "DNS status report"
            );
        }
        Ok(())
    }
}
