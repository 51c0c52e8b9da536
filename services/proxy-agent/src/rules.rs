//! NAT rule controller.
//!
//! Renders the desired service set into DNAT rules in a dedicated
//! `MK8S-SERVICES` chain of the `nat` table:
//!
//! ```text
//! PREROUTING / OUTPUT
//!   -> MK8S-SERVICES
//!        -d <clusterIP>/32 -p tcp --dport <port> -m statistic --mode nth ... -j DNAT
//!        -p tcp --dport <nodePort> -m addrtype --dst-type LOCAL ... -j DNAT
//! ```
//!
//! `sync_config` only computes; `commit` replaces the chain contents in one
//! `iptables-restore --noflush` transaction.

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use mk8s_api::{Endpoint, Service, ServicePort, ServiceType};
use mk8s_reconcile::SyncError;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::status::{ServiceRuleStatus, ServicesStatus};

/// Chain holding every service rule.
pub const SERVICES_CHAIN: &str = "MK8S-SERVICES";

const MAX_COMMENT_LEN: usize = 255;

/// Built-in chains that jump to `SERVICES_CHAIN`.
const HOOK_CHAINS: [&str; 2] = ["PREROUTING", "OUTPUT"];

/// Local enforcement of service NAT rules.
#[async_trait]
pub trait RuleController: Send + Sync {
    async fn init(&self) -> Result<(), SyncError>;

    /// Compute the rule change for the desired state without applying it.
    async fn sync_config(
        &self,
        services: &[Service],
        endpoints: &[Endpoint],
    ) -> Result<ServicesStatus, SyncError>;

    /// Apply the change computed by the last `sync_config`.
    async fn commit(&self) -> Result<(), SyncError>;
}

// =============================================================================
// Appliers
// =============================================================================

/// Host side of the rule controller.
#[async_trait]
pub trait RuleApplier: Send + Sync {
    /// Make sure the services chain exists and is hooked.
    async fn ensure_chain(&self) -> Result<()>;

    /// Feed a payload to `iptables-restore --noflush`.
    async fn restore(&self, payload: &str) -> Result<()>;
}

/// Applies rules with the iptables binaries.
#[derive(Debug, Default)]
pub struct IptablesRestore;

#[async_trait]
impl RuleApplier for IptablesRestore {
    async fn ensure_chain(&self) -> Result<()> {
        if run_iptables(&["-t", "nat", "-L", SERVICES_CHAIN, "-n"]).await.is_err() {
            run_iptables(&["-t", "nat", "-N", SERVICES_CHAIN]).await?;
        }

        for hook in HOOK_CHAINS {
            let jump = ["-t", "nat", "-C", hook, "-j", SERVICES_CHAIN];
            if run_iptables(&jump).await.is_err() {
                run_iptables(&["-t", "nat", "-I", hook, "-j", SERVICES_CHAIN]).await?;
            }
        }
        Ok(())
    }

    async fn restore(&self, payload: &str) -> Result<()> {
        use std::process::Stdio;
        use tokio::io::AsyncWriteExt;

        let mut child = Command::new("iptables-restore")
            .arg("--noflush")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to execute iptables-restore")?;

        let mut stdin = child
            .stdin
            .take()
            .context("iptables-restore stdin unavailable")?;
        stdin.write_all(payload.as_bytes()).await?;
        drop(stdin);

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("iptables-restore failed: {}", stderr.trim());
        }
        Ok(())
    }
}

/// Run an `iptables` command and return result.
async fn run_iptables(args: &[&str]) -> Result<()> {
    let output = Command::new("iptables")
        .args(args)
        .output()
        .await
        .context("failed to execute iptables command")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("iptables {} failed: {}", args.join(" "), stderr.trim());
    }

    Ok(())
}

/// Logs payloads instead of touching the host.
#[derive(Debug, Default)]
pub struct DryRunApplier;

#[async_trait]
impl RuleApplier for DryRunApplier {
    async fn ensure_chain(&self) -> Result<()> {
        info!(chain = SERVICES_CHAIN, "[DRY RUN] Ensuring services chain");
        Ok(())
    }

    async fn restore(&self, payload: &str) -> Result<()> {
        info!(payload = %payload, "[DRY RUN] iptables-restore --noflush");
        Ok(())
    }
}

// =============================================================================
// Controller
// =============================================================================

#[derive(Debug, Default)]
struct RuleState {
    /// Rules last committed to the host. `None` until the first commit, since
    /// the chain may still hold rules from a previous process.
    applied: Option<Vec<String>>,
    /// Rules computed by `sync_config` that differ from `applied`.
    pending: Option<Vec<String>>,
}

/// Rule controller backed by iptables.
pub struct IptablesController<A> {
    applier: A,
    state: Mutex<RuleState>,
}

impl<A: RuleApplier> IptablesController<A> {
    pub fn new(applier: A) -> Self {
        Self {
            applier,
            state: Mutex::new(RuleState::default()),
        }
    }

    pub fn applier(&self) -> &A {
        &self.applier
    }

    /// Rules currently committed to the host.
    pub async fn applied_rules(&self) -> Vec<String> {
        self.state.lock().await.applied.clone().unwrap_or_default()
    }
}

#[async_trait]
impl<A: RuleApplier> RuleController for IptablesController<A> {
    async fn init(&self) -> Result<(), SyncError> {
        self.applier
            .ensure_chain()
            .await
            .map_err(|e| SyncError::convergence(format!("{e:#}")))?;
        info!(chain = SERVICES_CHAIN, "Rule controller initialized");
        Ok(())
    }

    async fn sync_config(
        &self,
        services: &[Service],
        endpoints: &[Endpoint],
    ) -> Result<ServicesStatus, SyncError> {
        let (rules, services_status) = render_rules(services, endpoints);
        let rule_count = rules.len();

        let mut state = self.state.lock().await;
        if state.applied.as_ref() == Some(&rules) {
            debug!(rule_count, "Service rules already converged");
            state.pending = None;
        } else {
            let applied = state.applied.as_deref().unwrap_or_default();
            let (added, removed) = diff_counts(applied, &rules);
            info!(rule_count, added, removed, "Service rules changed");
            state.pending = Some(rules);
        }

        Ok(ServicesStatus {
            services: services_status,
            rule_count,
            synced_at: Some(Utc::now()),
        })
    }

    async fn commit(&self) -> Result<(), SyncError> {
        let Some(pending) = self.state.lock().await.pending.clone() else {
            return Ok(());
        };

        let payload = restore_payload(&pending);
        self.applier
            .restore(&payload)
            .await
            .map_err(|e| SyncError::convergence(format!("{e:#}")))?;

        let mut state = self.state.lock().await;
        if state.pending.as_ref() == Some(&pending) {
            state.pending = None;
        }
        info!(rule_count = pending.len(), "Service rules committed");
        state.applied = Some(pending);
        Ok(())
    }
}

// =============================================================================
// Rendering
// =============================================================================

fn render_rules(
    services: &[Service],
    endpoints: &[Endpoint],
) -> (Vec<String>, BTreeMap<String, ServiceRuleStatus>) {
    let by_service: HashMap<&str, &Endpoint> =
        endpoints.iter().map(|e| (e.service_key(), e)).collect();

    let mut sorted: Vec<&Service> = services.iter().collect();
    sorted.sort_by(|a, b| a.key().cmp(b.key()));

    let mut rules = Vec::new();
    let mut statuses = BTreeMap::new();

    for service in sorted {
        let key = service.key();
        if key.is_empty() {
            warn!("Service without id or name, skipping");
            continue;
        }

        let cluster_ip = service.spec.cluster_ip.trim();
        if cluster_ip.is_empty() || cluster_ip.eq_ignore_ascii_case("none") {
            debug!(service = %key, "Service has no cluster IP, skipping");
            continue;
        }
        if cluster_ip.parse::<std::net::Ipv4Addr>().is_err() {
            warn!(service = %key, cluster_ip = %cluster_ip, "Invalid cluster IP, skipping");
            continue;
        }

        let endpoint = by_service.get(key).copied();
        let backends: Vec<&str> = endpoint
            .map(|e| {
                e.addresses
                    .iter()
                    .map(|a| a.ip.as_str())
                    .filter(|ip| {
                        let valid = ip.parse::<std::net::Ipv4Addr>().is_ok();
                        if !valid {
                            warn!(service = %key, ip = %ip, "Invalid backend IP, skipping");
                        }
                        valid
                    })
                    .collect()
            })
            .unwrap_or_default();

        for port in &service.spec.ports {
            let target = target_port(port, endpoint);
            let comment =
                sanitize_comment(&format!("{}:{}", service_label(service), port_label(port)));

            let cluster_match = format!(
                "-d {cluster_ip}/32 -p {proto} -m {proto} --dport {port}",
                proto = port.protocol.as_str(),
                port = port.port,
            );
            push_dnat(&mut rules, &cluster_match, &comment, &backends, target);

            if let (ServiceType::NodePort, Some(node_port)) =
                (service.spec.service_type, port.node_port)
            {
                let node_match = format!(
                    "-p {proto} -m {proto} --dport {node_port} -m addrtype --dst-type LOCAL",
                    proto = port.protocol.as_str(),
                );
                push_dnat(&mut rules, &node_match, &comment, &backends, target);
            }
        }

        statuses.insert(
            key.to_string(),
            ServiceRuleStatus {
                cluster_ip: cluster_ip.to_string(),
                ports: service.spec.ports.iter().map(|p| p.port).collect(),
                backends: backends.len(),
            },
        );
    }

    (rules, statuses)
}

/// One DNAT rule per backend, spread round-robin with `statistic --mode nth`.
///
/// Backend `i` of `n` matches every `(n - i)`th packet that fell through the
/// rules before it; the last backend takes the rest.
fn push_dnat(rules: &mut Vec<String>, matcher: &str, comment: &str, backends: &[&str], target: u16) {
    let n = backends.len();
    for (i, ip) in backends.iter().enumerate() {
        let statistic = if i + 1 < n {
            format!(" -m statistic --mode nth --every {} --packet 0", n - i)
        } else {
            String::new()
        };
        rules.push(format!(
            "-A {SERVICES_CHAIN} {matcher} -m comment --comment \"{comment}\"{statistic} -j DNAT --to-destination {ip}:{target}"
        ));
    }
}

/// Backend port: the endpoint port with the same name, else `targetPort`, else `port`.
fn target_port(port: &ServicePort, endpoint: Option<&Endpoint>) -> u16 {
    let named = endpoint.and_then(|e| {
        e.ports
            .iter()
            .find(|p| !port.name.is_empty() && p.name == port.name)
            .map(|p| p.port)
    });
    named
        .or((port.target_port != 0).then_some(port.target_port))
        .unwrap_or(port.port)
}

/// Replace anything that could break out of the quoted comment, and cap it
/// below the 256-byte comment limit.
fn sanitize_comment(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_COMMENT_LEN)
        .collect()
}

fn service_label(service: &Service) -> String {
    let namespace = if service.metadata.namespace.is_empty() {
        "default"
    } else {
        &service.metadata.namespace
    };
    format!("{}/{}", namespace, service.metadata.name)
}

fn port_label(port: &ServicePort) -> String {
    if port.name.is_empty() {
        port.port.to_string()
    } else {
        port.name.clone()
    }
}

fn restore_payload(rules: &[String]) -> String {
    let mut payload = String::from("*nat\n");
    // Declaring the chain flushes it, even with --noflush.
    payload.push_str(&format!(":{SERVICES_CHAIN} - [0:0]\n"));
    for rule in rules {
        payload.push_str(rule);
        payload.push('\n');
    }
    payload.push_str("COMMIT\n");
    payload
}

fn diff_counts(old: &[String], new: &[String]) -> (usize, usize) {
    let added = new.iter().filter(|r| !old.contains(r)).count();
    let removed = old.iter().filter(|r| !new.contains(r)).count();
    (added, removed)
}
