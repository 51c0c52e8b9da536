//! Hosts-file controller.
//!
//! Owns a delimited block at the end of the hosts file and rewrites it to
//! match the desired DNS records. Lines outside the block are preserved.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use mk8s_api::DnsRecord;
use mk8s_reconcile::SyncError;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::status::DnsStatus;

pub const BLOCK_BEGIN: &str = "# BEGIN mk8s managed hosts";
pub const BLOCK_END: &str = "# END mk8s managed hosts";

/// Local enforcement of DNS records.
#[async_trait]
pub trait HostsController: Send + Sync {
    async fn init(&self) -> Result<(), SyncError>;

    /// Converge the local name table to `records`.
    async fn sync_config(&self, records: &[DnsRecord]) -> Result<DnsStatus, SyncError>;
}

/// Edits a hosts file in place.
#[derive(Debug, Clone)]
pub struct EtcHostsController {
    path: PathBuf,
}

impl EtcHostsController {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl HostsController for EtcHostsController {
    async fn init(&self) -> Result<(), SyncError> {
        read_hosts(&self.path)
            .await
            .map_err(|e| SyncError::convergence(format!("{e:#}")))?;
        info!(path = %self.path.display(), "Hosts controller initialized");
        Ok(())
    }

    async fn sync_config(&self, records: &[DnsRecord]) -> Result<DnsStatus, SyncError> {
        let entries = desired_entries(records);

        let current = read_hosts(&self.path)
            .await
            .map_err(|e| SyncError::convergence(format!("{e:#}")))?;
        let rendered = render(&current, &entries);

        if rendered == current {
            debug!(entries = entries.len(), "Hosts file already converged");
        } else {
            write_hosts(&self.path, &rendered)
                .await
                .map_err(|e| SyncError::convergence(format!("{e:#}")))?;
            info!(
                path = %self.path.display(),
                entries = entries.len(),
                "Hosts file updated"
            );
        }

        Ok(DnsStatus {
            entries,
            synced_at: Some(Utc::now()),
        })
    }
}

/// Host to IP map for valid records. The first record for a host wins.
fn desired_entries(records: &[DnsRecord]) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();

    for record in records {
        let host = record.host.trim();
        let ip = record.ip.trim();

        if !valid_hostname(host) {
            warn!(host = %record.host, "Invalid DNS host, skipping");
            continue;
        }
        if ip.parse::<IpAddr>().is_err() {
            warn!(host = %host, ip = %record.ip, "Invalid DNS IP, skipping");
            continue;
        }

        if let Some(existing) = entries.get(host) {
            if existing != ip {
                warn!(host = %host, kept = %existing, ignored = %ip, "Conflicting DNS records");
            }
            continue;
        }
        entries.insert(host.to_string(), ip.to_string());
    }

    entries
}

fn valid_hostname(host: &str) -> bool {
    !host.is_empty()
        && host.len() <= 253
        && !host.starts_with(['-', '.'])
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_')
}

/// Replace the managed block in `current` with `entries`.
///
/// An empty entry set removes the block entirely.
fn render(current: &str, entries: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(current.len());
    // Lines after a BEGIN marker, held until the matching END shows up.
    let mut block: Option<Vec<&str>> = None;

    for line in current.lines() {
        let trimmed = line.trim();
        if trimmed == BLOCK_BEGIN {
            if let Some(held) = block.replace(Vec::new()) {
                push_lines(&mut out, &held);
            }
            continue;
        }

        match block {
            Some(_) if trimmed == BLOCK_END => block = None,
            Some(ref mut held) => held.push(line),
            None => push_lines(&mut out, &[line]),
        }
    }

    // An unterminated block is not ours to drop: keep its lines, minus the marker.
    if let Some(held) = block {
        warn!("Managed hosts block has no end marker, keeping its lines");
        push_lines(&mut out, &held);
    }

    if entries.is_empty() {
        return out;
    }

    if !out.is_empty() && !out.ends_with("\n\n") {
        out.push('\n');
    }
    out.push_str(BLOCK_BEGIN);
    out.push('\n');
    for (host, ip) in entries {
        out.push_str(&format!("{ip}\t{host}\n"));
    }
    out.push_str(BLOCK_END);
    out.push('\n');
    out
}

fn push_lines(out: &mut String, lines: &[&str]) {
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
}

async fn read_hosts(path: &Path) -> Result<String> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e).with_context(|| format!("Failed to read hosts file {}", path.display())),
    }
}

async fn write_hosts(path: &Path, content: &str) -> Result<()> {
    let tmp: PathBuf = path.with_extension("mk8s.tmp");
    fs::write(&tmp, content)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).await.with_context(|| {
        format!(
            "Failed to move hosts file into place ({} -> {})",
            tmp.display(),
            path.display()
        )
    })?;

    Ok(())
}
